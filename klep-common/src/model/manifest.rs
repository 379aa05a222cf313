// klep-common/src/model/manifest.rs
//! The project manifest (`klep.json`): what the user asked for.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dependency::definition::Dependency;
use crate::error::{KlepError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclaredEntry {
    pub url: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extract: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, DeclaredEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, DeclaredEntry>,
}

impl Manifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(text)
            .map_err(|e| KlepError::Parsing("manifest", e.to_string()))?;
        for dep in manifest.declared() {
            dep.validate()?;
        }
        Ok(manifest)
    }

    /// Runtime and development declarations. Development entries never
    /// shadow a runtime entry of the same name.
    pub fn declared(&self) -> Vec<Dependency> {
        let runtime = self.dependencies.iter();
        let dev = self
            .dev_dependencies
            .iter()
            .filter(|(name, _)| !self.dependencies.contains_key(*name));
        runtime.chain(dev).map(|(name, e)| to_dependency(name, e)).collect()
    }

    /// Adds or replaces a runtime declaration.
    pub fn upsert(&mut self, dep: &Dependency) {
        self.dev_dependencies.remove(&dep.name);
        self.dependencies.insert(
            dep.name.clone(),
            DeclaredEntry {
                url: dep.url.clone(),
                version: dep.version.clone(),
                extract: dep.extract.clone(),
                folder: dep.folder.clone(),
            },
        );
    }

    /// Drops a declaration; returns whether one existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let runtime = self.dependencies.remove(name).is_some();
        let dev = self.dev_dependencies.remove(name).is_some();
        runtime || dev
    }

    pub fn is_dev_entry(&self, dep: &Dependency) -> bool {
        self.dev_dependencies
            .get(&dep.name)
            .is_some_and(|e| to_dependency(&dep.name, e) == *dep)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }
}

fn to_dependency(name: &str, entry: &DeclaredEntry) -> Dependency {
    Dependency {
        name: name.to_string(),
        url: entry.url.clone(),
        version: entry.version.clone(),
        extract: entry.extract.clone(),
        folder: entry.folder.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_runtime_and_dev_dependencies() {
        let manifest = Manifest::from_json(
            r#"{
                "name": "app",
                "dependencies": {
                    "lib": {"url": "https://example.com/lib", "version": "^1.0.0", "extract": ["src/**"]}
                },
                "devDependencies": {
                    "lib": {"url": "https://example.com/lib", "version": "main"},
                    "bench": {"url": "https://example.com/bench", "version": "latest", "folder": "tools"}
                }
            }"#,
        )
        .unwrap();

        let declared = manifest.declared();
        assert_eq!(declared.len(), 2);
        assert_eq!(declared[0].name, "lib");
        assert_eq!(declared[0].version, "^1.0.0");
        assert_eq!(declared[0].extract, vec!["src/**".to_string()]);
        assert_eq!(declared[1].folder.as_deref(), Some("tools"));
    }

    #[test]
    fn unknown_fields_are_parse_errors() {
        let err = Manifest::from_json(r#"{"name": "app", "registry": "x"}"#).unwrap_err();
        assert!(matches!(err, KlepError::Parsing("manifest", _)));
    }

    #[test]
    fn empty_versions_are_rejected() {
        let err = Manifest::from_json(
            r#"{"dependencies": {"lib": {"url": "https://example.com/lib", "version": ""}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, KlepError::Argument(_)));
    }

    #[test]
    fn upsert_moves_dev_entries_to_runtime() {
        let mut manifest = Manifest::new("app");
        manifest.dev_dependencies.insert(
            "lib".into(),
            DeclaredEntry {
                url: "https://example.com/lib".into(),
                version: "main".into(),
                extract: Vec::new(),
                folder: None,
            },
        );
        manifest.upsert(&Dependency::new("lib", "https://example.com/lib", "^2.0.0"));
        assert!(manifest.dev_dependencies.is_empty());
        assert_eq!(manifest.dependencies["lib"].version, "^2.0.0");
        assert!(manifest.remove("lib"));
        assert!(!manifest.contains("lib"));
    }
}
