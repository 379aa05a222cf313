// klep-aio/src/lib.rs
//! Blocking I/O for klep: project documents on disk and git repositories.

pub mod fs;
pub mod git2;
pub mod json_io;
pub mod store;

pub use fs::atomic_write_file;
pub use git2::{list_remote_refs, revision_for, LocalOracle, RemoteRefs};
pub use json_io::{read_document, write_json};
pub use store::{declared_from_documents, FileManifestStore, FileSnapshotStore};
