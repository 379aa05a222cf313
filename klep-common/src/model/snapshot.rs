// klep-common/src/model/snapshot.rs
//! The resolved snapshot (`klep.lock`): one concrete reference per name.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dependency::definition::Dependency;
use crate::dependency::reference::VersionReference;
use crate::dependency::search::Assignment;
use crate::error::{KlepError, Result};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub url: String,
    pub reference: VersionReference,
    /// Every reference that was requested for this name when it was resolved.
    #[serde(default)]
    pub requested: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    pub dependencies: BTreeMap<String, SnapshotEntry>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            dependencies: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    pub fn from_json(text: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(text)
            .map_err(|e| KlepError::Parsing("snapshot", e.to_string()))?;
        if snapshot.version != SNAPSHOT_FORMAT_VERSION {
            return Err(KlepError::Parsing(
                "snapshot",
                format!(
                    "unsupported format version {} (expected {})",
                    snapshot.version, SNAPSHOT_FORMAT_VERSION
                ),
            ));
        }
        Ok(snapshot)
    }

    pub fn from_assignment(assignment: &Assignment) -> Self {
        let dependencies = assignment
            .entries
            .iter()
            .map(|entry| {
                let mut requested: Vec<String> =
                    entry.requests.iter().map(VersionReference::key).collect();
                requested.dedup();
                (
                    entry.name.clone(),
                    SnapshotEntry {
                        url: entry.url.clone(),
                        reference: entry.reference.clone(),
                        requested,
                        warnings: entry.warnings(),
                    },
                )
            })
            .collect();
        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            dependencies,
        }
    }

    pub fn get(&self, name: &str) -> Option<&SnapshotEntry> {
        self.dependencies.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Warnings in `self` that `previous` did not already record for the
    /// same name, repository and reference.
    pub fn fresh_warnings(&self, previous: &Snapshot) -> Vec<String> {
        let mut fresh = Vec::new();
        for (name, entry) in &self.dependencies {
            let known = previous
                .get(name)
                .filter(|old| old.url == entry.url && old.reference.same_point(&entry.reference));
            for warning in &entry.warnings {
                if !known.is_some_and(|old| old.warnings.contains(warning)) {
                    fresh.push(warning.clone());
                }
            }
        }
        fresh
    }

    /// The locked references as declarations, for repositories whose
    /// dependencies are read from their own snapshot.
    pub fn as_declared(&self) -> Vec<Dependency> {
        self.dependencies
            .iter()
            .map(|(name, entry)| Dependency::new(name, &entry.url, entry.reference.spec_string()))
            .collect()
    }
}
