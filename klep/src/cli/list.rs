// klep/src/cli/list.rs
use clap::Args;
use colored::Colorize;
use klep_aio::store::{FileManifestStore, FileSnapshotStore};
use klep_common::config::Config;
use klep_common::dependency::reference::ReferenceKind;
use klep_common::error::Result;
use klep_common::store::{ManifestStore, SnapshotStore};
use prettytable::{format, Cell, Row, Table};

/// Shows what klep.lock currently records.
#[derive(Args, Debug)]
pub struct List {
    /// Also print the reconciled warnings of each entry
    #[arg(long)]
    pub warnings: bool,
}

impl List {
    pub fn run(&self, config: &Config) -> Result<()> {
        let Some(snapshot) = FileSnapshotStore::for_config(config).load_snapshot()? else {
            println!("{}", "No klep.lock found; run 'klep install' first".yellow());
            return Ok(());
        };
        if snapshot.is_empty() {
            println!("{}", "0 dependencies locked".yellow());
            return Ok(());
        }
        let manifest = FileManifestStore::for_config(config).load_manifest()?;

        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        table.add_row(Row::new(vec![
            Cell::new("Name").style_spec("b"),
            Cell::new("Kind").style_spec("b"),
            Cell::new("Locked").style_spec("b"),
            Cell::new("Requested").style_spec("b"),
            Cell::new("Direct?").style_spec("b"),
        ]));
        for (name, entry) in &snapshot.dependencies {
            let kind_style = match entry.reference.kind {
                ReferenceKind::SemVer => "Fg",
                ReferenceKind::Hash => "Fy",
                _ => "Fc",
            };
            table.add_row(Row::new(vec![
                Cell::new(name).style_spec("Fb"),
                Cell::new(&entry.reference.kind.to_string()).style_spec(kind_style),
                Cell::new(&entry.reference.to_string()),
                Cell::new(&entry.requested.join(", ")),
                Cell::new(if manifest.contains(name) { "✔" } else { "" }),
            ]));
        }
        table.printstd();
        println!(
            "{}",
            format!("{} dependencies locked", snapshot.dependencies.len()).bold()
        );

        if self.warnings {
            for (name, entry) in &snapshot.dependencies {
                for warning in &entry.warnings {
                    println!("{} {}: {}", "Warning:".yellow().bold(), name, warning);
                }
            }
        }
        Ok(())
    }
}
