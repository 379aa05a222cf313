// klep/src/cli/remove.rs
use clap::Args;
use klep_common::config::Config;
use klep_common::error::Result;
use tokio::sync::broadcast;
use tracing::instrument;

use super::status;

#[derive(Debug, Args)]
pub struct RemoveArgs {
    #[arg(required = true)]
    name: String,
}

impl RemoveArgs {
    #[instrument(skip(self, config), fields(name = %self.name))]
    pub async fn run(&self, config: &Config) -> Result<()> {
        let (event_tx, event_rx) = broadcast::channel(256);
        let driver = super::project_driver(config, event_tx)?;
        let status_handle = tokio::spawn(status::handle_events(event_rx));

        let result = driver.remove(&self.name).await;
        drop(driver);
        status_handle.await.ok();
        status::report(result)
    }
}
