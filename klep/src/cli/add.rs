// klep/src/cli/add.rs
use clap::Args;
use klep_common::config::Config;
use klep_common::dependency::definition::Dependency;
use klep_common::dependency::search::SearchMode;
use klep_common::dependency::LATEST;
use klep_common::error::{KlepError, Result};
use klep_core::InstallRequest;
use tokio::sync::broadcast;
use tracing::instrument;

use super::status;

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Repository address (https, ssh, git, file or a local path)
    url: String,

    /// Name to declare the dependency under; defaults to the repository name
    #[arg(long)]
    name: Option<String>,

    /// Tag, branch, commit, semver expression or "latest"
    #[arg(long, default_value = LATEST)]
    version: String,

    /// Stop at the first consistent assignment instead of the cheapest one
    #[arg(long)]
    fast: bool,
}

impl AddArgs {
    #[instrument(skip(self, config), fields(url = %self.url))]
    pub async fn run(&self, config: &Config) -> Result<()> {
        let name = match &self.name {
            Some(name) => name.clone(),
            None => Dependency::name_from_url(&self.url).ok_or_else(|| {
                KlepError::Argument(format!(
                    "cannot derive a name from '{}', pass --name",
                    self.url
                ))
            })?,
        };
        let mode = if self.fast {
            SearchMode::Fast
        } else {
            SearchMode::Optimal
        };

        let (event_tx, event_rx) = broadcast::channel(256);
        let driver = super::project_driver(config, event_tx)?;
        let status_handle = tokio::spawn(status::handle_events(event_rx));

        let result = driver
            .install(InstallRequest::new(name, &self.url, &self.version, mode))
            .await;
        drop(driver);
        status_handle.await.ok();
        status::report(result)
    }
}
