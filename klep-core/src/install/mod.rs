// klep-core/src/install/mod.rs
pub mod driver;

pub use driver::{InstallRequest, InstallResult, ResolutionDriver};
