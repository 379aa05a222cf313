// klep-common/src/model/mod.rs
// Documents persisted in a project directory.
pub mod manifest;
pub mod snapshot;

pub use manifest::{DeclaredEntry, Manifest};
pub use snapshot::{Snapshot, SnapshotEntry, SNAPSHOT_FORMAT_VERSION};
