// klep/src/cli/install.rs
use clap::Args;
use klep_common::config::Config;
use klep_common::dependency::search::SearchMode;
use klep_common::error::Result;
use tokio::sync::broadcast;
use tracing::instrument;

use super::status;

/// Resolves everything declared in klep.json and rewrites klep.lock.
#[derive(Debug, Args)]
pub struct InstallArgs {
    #[arg(long)]
    fast: bool,
}

impl InstallArgs {
    #[instrument(skip(self, config))]
    pub async fn run(&self, config: &Config) -> Result<()> {
        let mode = if self.fast {
            SearchMode::Fast
        } else {
            SearchMode::Optimal
        };
        let (event_tx, event_rx) = broadcast::channel(256);
        let driver = super::project_driver(config, event_tx)?;
        let status_handle = tokio::spawn(status::handle_events(event_rx));

        let result = driver.refresh(mode).await;
        drop(driver);
        status_handle.await.ok();
        status::report(result)
    }
}
