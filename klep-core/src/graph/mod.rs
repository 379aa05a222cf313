// klep-core/src/graph/mod.rs
pub mod builder;

pub use builder::{GraphBuilder, Pin};
