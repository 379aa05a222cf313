// klep/src/cli.rs
//! Defines the command-line argument structure using clap.
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use klep_aio::store::{FileManifestStore, FileSnapshotStore};
use klep_common::error::Result;
use klep_common::pipeline::ResolutionEvent;
use klep_common::Config;
use klep_core::{RemoteOracle, ResolutionDriver};
use tokio::sync::broadcast;

pub mod add;
pub mod install;
pub mod list;
pub mod remove;
pub mod status;

use crate::cli::add::AddArgs;
use crate::cli::install::InstallArgs;
use crate::cli::list::List;
use crate::cli::remove::RemoveArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "klep", bin_name = "klep")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Add(AddArgs),
    Install(InstallArgs),
    Remove(RemoveArgs),
    List(List),
}

impl Command {
    pub async fn run(&self, config: &Config) -> Result<()> {
        match self {
            Self::Add(command) => command.run(config).await,
            Self::Install(command) => command.run(config).await,
            Self::Remove(command) => command.run(config).await,
            Self::List(command) => command.run(config),
        }
    }
}

/// A driver over the project's `klep.json`/`klep.lock`, reporting to `event_tx`.
pub fn project_driver(
    config: &Config,
    event_tx: broadcast::Sender<ResolutionEvent>,
) -> Result<ResolutionDriver> {
    let oracle = Arc::new(RemoteOracle::new(config)?);
    Ok(ResolutionDriver::new(
        config.clone(),
        oracle,
        Arc::new(FileManifestStore::for_config(config)),
        Arc::new(FileSnapshotStore::for_config(config)),
    )
    .with_events(event_tx))
}
