// klep-core/src/lib.rs

pub mod graph;
pub mod install;
pub mod oracle;

pub use graph::{GraphBuilder, Pin};
pub use install::{InstallRequest, InstallResult, ResolutionDriver};
pub use oracle::RemoteOracle;
