use std::sync::Arc;

use thiserror::Error;

use crate::dependency::conflict::DependencyConflict;

#[derive(Error, Debug, Clone)]
pub enum KlepError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Semantic Versioning Error: {0}")]
    SemVer(#[from] Arc<semver::Error>),

    #[error("Git Error: {0}")]
    Git(#[from] Arc<git2::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Parsing Error in {0}: {1}")]
    Parsing(&'static str, String),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Repository Error for '{address}': {message}")]
    Repository { address: String, message: String },

    #[error("{}", format_conflicts(.0))]
    Conflict(Vec<DependencyConflict>),

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("No satisfying assignment found after {expansions} expansions (unresolved: {})", .blocked.join(", "))]
    SearchExhausted {
        expansions: usize,
        blocked: Vec<String>,
    },

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl KlepError {
    pub fn repository(address: impl Into<String>, message: impl Into<String>) -> Self {
        KlepError::Repository {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Errors that invalidate the graph itself and stop a run immediately.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            KlepError::Conflict(_) | KlepError::SearchExhausted { .. }
        )
    }
}

fn format_conflicts(conflicts: &[DependencyConflict]) -> String {
    let mut out = format!("{} unresolvable dependency conflict(s):", conflicts.len());
    for c in conflicts {
        out.push_str(&format!(
            "\n  - {}: requested {} but {} is already required",
            c.name, c.requested, c.existing
        ));
    }
    out
}

impl From<std::io::Error> for KlepError {
    fn from(err: std::io::Error) -> Self {
        KlepError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for KlepError {
    fn from(err: reqwest::Error) -> Self {
        KlepError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for KlepError {
    fn from(err: serde_json::Error) -> Self {
        KlepError::Json(Arc::new(err))
    }
}

impl From<semver::Error> for KlepError {
    fn from(err: semver::Error) -> Self {
        KlepError::SemVer(Arc::new(err))
    }
}

impl From<git2::Error> for KlepError {
    fn from(err: git2::Error) -> Self {
        KlepError::Git(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, KlepError>;
