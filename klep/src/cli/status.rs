// klep/src/cli/status.rs
//! Renders resolution progress and outcomes on the terminal.
use std::time::{Duration, Instant};

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use klep_common::error::{KlepError, Result};
use klep_common::pipeline::{ResolutionEvent, ResolutionState};
use klep_core::InstallResult;
use tokio::sync::broadcast;

fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue.bold} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Follows one run until every sender is gone. Warnings are collected and
/// printed after the spinner is cleared.
pub async fn handle_events(mut event_rx: broadcast::Receiver<ResolutionEvent>) {
    let spinner = create_spinner("Resolving dependencies...");
    let start = Instant::now();
    let mut fetched = 0usize;
    let mut warnings = Vec::new();

    loop {
        match event_rx.recv().await {
            Ok(event) => match event {
                ResolutionEvent::StateChanged { to, .. } => match to {
                    ResolutionState::BuildingGraph => {
                        spinner.set_message("Building dependency graph...")
                    }
                    ResolutionState::Searching => spinner.set_message("Searching for a resolution..."),
                    state if state.is_terminal() => {
                        spinner.set_message(format!("Resolution {state:?}"))
                    }
                    _ => {}
                },
                ResolutionEvent::NodeFetched { name, reference } => {
                    fetched += 1;
                    spinner.set_message(format!("[{fetched}] fetched {name} ({reference})"));
                }
                ResolutionEvent::GraphBuilt { nodes, names } => {
                    spinner.set_message(format!("Graph built: {nodes} nodes, {names} names"));
                }
                ResolutionEvent::SearchFinished { cost, expansions } => {
                    spinner.set_message(format!(
                        "Resolved with cost {cost} after {expansions} expansions"
                    ));
                }
                ResolutionEvent::LogWarn { message } => warnings.push(message),
                ResolutionEvent::SnapshotWritten { .. } | ResolutionEvent::RunFailed { .. } => {}
            },
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(_)) => {
                // Missed progress lines only.
            }
        }
    }

    spinner.finish_and_clear();
    for warning in &warnings {
        println!("{} {}", "Warning:".yellow().bold(), warning);
    }
    tracing::debug!("Resolution finished in {:.2}s", start.elapsed().as_secs_f64());
}

/// Prints the outcome of a run. A failed run comes back as its error.
pub fn report(result: InstallResult) -> Result<()> {
    if let Some(error) = result.error {
        if let KlepError::Conflict(conflicts) = &error {
            for conflict in conflicts {
                eprintln!(
                    "{} {}: {} vs {}",
                    "Conflict".red().bold(),
                    conflict.name.bold(),
                    conflict.requested,
                    conflict.existing
                );
            }
        }
        return Err(error);
    }
    let entries = result
        .resolution
        .map(|snapshot| snapshot.dependencies.len())
        .unwrap_or(0);
    println!(
        "{}{}",
        "==> ".bold().blue(),
        format!("Locked {entries} dependencies").bold()
    );
    Ok(())
}
