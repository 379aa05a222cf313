// klep-aio/src/store.rs
//! File-backed manifest and snapshot stores.
use std::path::{Path, PathBuf};

use klep_common::config::Config;
use klep_common::dependency::definition::Dependency;
use klep_common::error::Result;
use klep_common::model::{Manifest, Snapshot};
use klep_common::store::{ManifestStore, SnapshotStore};
use tracing::debug;

use crate::json_io::{read_document, write_json};

/// Declared dependencies of a fetched repository: its snapshot when it
/// has one, its manifest otherwise, nothing when it has neither.
pub fn declared_from_documents(
    snapshot: Option<&str>,
    manifest: Option<&str>,
) -> Result<Vec<Dependency>> {
    if let Some(text) = snapshot {
        return Ok(Snapshot::from_json(text)?.as_declared());
    }
    if let Some(text) = manifest {
        return Ok(Manifest::from_json(text)?.declared());
    }
    Ok(Vec::new())
}

#[derive(Debug, Clone)]
pub struct FileManifestStore {
    path: PathBuf,
}

impl FileManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_config(config: &Config) -> Self {
        Self::new(config.manifest_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn default_name(&self) -> String {
        self.path
            .parent()
            .and_then(|dir| dir.canonicalize().ok())
            .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "project".to_string())
    }
}

impl ManifestStore for FileManifestStore {
    fn load_manifest(&self) -> Result<Manifest> {
        match read_document(&self.path, Manifest::from_json)? {
            Some(manifest) => Ok(manifest),
            None => {
                debug!("No manifest at {}, starting empty", self.path.display());
                Ok(Manifest::new(self.default_name()))
            }
        }
    }

    fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        write_json(&self.path, manifest)
    }
}

#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_config(config: &Config) -> Self {
        Self::new(config.snapshot_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        read_document(&self.path, Snapshot::from_json)
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        write_json(&self.path, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use klep_common::dependency::reference::VersionReference;
    use klep_common::error::KlepError;
    use klep_common::model::SnapshotEntry;

    use super::*;

    #[test]
    fn missing_manifest_is_empty_and_named_after_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("my-app");
        fs::create_dir(&project).unwrap();
        let store = FileManifestStore::new(project.join("klep.json"));

        let manifest = store.load_manifest().unwrap();
        assert_eq!(manifest.name, "my-app");
        assert!(store.load_declared().unwrap().is_empty());
    }

    #[test]
    fn declared_dependencies_round_trip_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path().join("klep.json"));
        let lib = Dependency::new("lib", "https://example.com/lib", "^1.2.0");
        store.save_declared(std::slice::from_ref(&lib)).unwrap();

        assert_eq!(store.load_declared().unwrap(), vec![lib]);
        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains(r#""version": "^1.2.0""#));
    }

    #[test]
    fn malformed_documents_are_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("klep.json"), "{ not json").unwrap();
        fs::write(dir.path().join("klep.lock"), r#"{"dependencies": []}"#).unwrap();

        let manifests = FileManifestStore::new(dir.path().join("klep.json"));
        let snapshots = FileSnapshotStore::new(dir.path().join("klep.lock"));
        assert!(matches!(
            manifests.load_manifest(),
            Err(KlepError::Parsing("manifest", _))
        ));
        assert!(matches!(
            snapshots.load_snapshot(),
            Err(KlepError::Parsing("snapshot", _))
        ));
    }

    #[test]
    fn snapshots_are_absent_until_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("klep.lock"));
        assert!(store.load_snapshot().unwrap().is_none());

        let mut snapshot = Snapshot::default();
        snapshot.dependencies.insert(
            "lib".into(),
            SnapshotEntry {
                url: "https://example.com/lib".into(),
                reference: VersionReference::tag("v1.0.0"),
                requested: vec!["v1.0.0".into()],
                warnings: Vec::new(),
            },
        );
        store.save_snapshot(&snapshot).unwrap();
        assert_eq!(store.load_snapshot().unwrap(), Some(snapshot));
    }

    #[test]
    fn snapshots_take_precedence_over_manifests() {
        let snapshot = r#"{"version": 1, "dependencies": {"util": {"url": "https://example.com/util", "reference": {"kind": "tag", "value": "v2.0.0"}}}}"#;
        let manifest = r#"{"dependencies": {"util": {"url": "https://example.com/util", "version": "^1.0.0"}}}"#;
        let declared = declared_from_documents(Some(snapshot), Some(manifest)).unwrap();
        assert_eq!(declared[0].version, "v2.0.0");
        let declared = declared_from_documents(None, Some(manifest)).unwrap();
        assert_eq!(declared[0].version, "^1.0.0");
        assert!(declared_from_documents(None, None).unwrap().is_empty());
    }
}
