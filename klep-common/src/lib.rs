// klep-common/src/lib.rs
pub mod config;
pub mod dependency;
pub mod error;
pub mod model;
pub mod oracle;
pub mod pipeline;
pub mod store;

pub use config::Config;
pub use error::{KlepError, Result};
pub use model::{Manifest, Snapshot};
pub use oracle::RepositoryOracle;
pub use store::{ManifestStore, SnapshotStore};
