// klep-common/src/dependency/mod.rs
pub mod conflict;
pub mod definition;
pub mod graph;
pub mod reference;
pub mod search;

pub use conflict::{ConflictResolver, ConflictSeverity, DependencyConflict};
pub use definition::Dependency;
pub use graph::{DependencyGraph, DependencyNode, GraphArena, NodeId};
pub use reference::{classify, Operator, ReferenceKind, VersionReference, LATEST};
pub use search::{
    Assignment, AssignedName, ConstrainedSearch, ResolutionAttempt, SearchBackend, SearchMode,
    SearchOptions,
};
