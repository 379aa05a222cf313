// klep-common/src/dependency/definition.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KlepError, Result};

/// A dependency as written in a manifest or found in a fetched snapshot,
/// before its version string has been classified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub url: String,
    pub version: String,
    /// Glob rules selecting which files of the checkout are kept.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extract: Vec<String>,
    /// Folder the checkout is placed in, relative to the project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

impl Dependency {
    pub fn new(name: impl Into<String>, url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            version: version.into(),
            extract: Vec::new(),
            folder: None,
        }
    }

    /// Derives a dependency name from the last path segment of a repository
    /// address, without a trailing `.git`.
    pub fn name_from_url(url: &str) -> Option<String> {
        let segment = url
            .trim_end_matches('/')
            .rsplit(['/', ':'])
            .next()?
            .trim_end_matches(".git");
        if segment.is_empty() {
            None
        } else {
            Some(segment.to_string())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(KlepError::Argument(format!(
                "dependency from '{}' has an empty name",
                self.url
            )));
        }
        if self.url.trim().is_empty() {
            return Err(KlepError::Argument(format!(
                "dependency '{}' has an empty repository url",
                self.name
            )));
        }
        if self.version.trim().is_empty() {
            return Err(KlepError::Argument(format!(
                "dependency '{}' has an empty version",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.version, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_derived_from_urls() {
        assert_eq!(
            Dependency::name_from_url("https://github.com/acme/lib.git").as_deref(),
            Some("lib")
        );
        assert_eq!(
            Dependency::name_from_url("git@github.com:acme/tools/").as_deref(),
            Some("tools")
        );
        assert_eq!(Dependency::name_from_url("/"), None);
    }

    #[test]
    fn empty_fields_are_argument_errors() {
        let dep = Dependency::new("lib", "https://example.com/lib", " ");
        assert!(matches!(dep.validate(), Err(KlepError::Argument(_))));
        assert!(Dependency::new("lib", "https://example.com/lib", "^1.0.0")
            .validate()
            .is_ok());
    }
}
