// klep-common/src/store.rs
//! Persistence seams for the two project documents.
use crate::dependency::definition::Dependency;
use crate::error::Result;
use crate::model::{Manifest, Snapshot};

/// Where the project's declared dependencies live.
pub trait ManifestStore: Send + Sync {
    /// The current manifest. A project without one yields an empty manifest.
    fn load_manifest(&self) -> Result<Manifest>;

    fn save_manifest(&self, manifest: &Manifest) -> Result<()>;

    fn load_declared(&self) -> Result<Vec<Dependency>> {
        Ok(self.load_manifest()?.declared())
    }

    /// Replaces the runtime declarations with `declared`. Entries identical
    /// to an existing development declaration stay development entries.
    fn save_declared(&self, declared: &[Dependency]) -> Result<()> {
        let mut manifest = self.load_manifest()?;
        manifest.dependencies.clear();
        for dep in declared {
            if manifest.is_dev_entry(dep) {
                continue;
            }
            manifest.upsert(dep);
        }
        self.save_manifest(&manifest)
    }
}

/// Where the last accepted resolution lives.
pub trait SnapshotStore: Send + Sync {
    /// The previous snapshot, or `None` when the project was never resolved.
    fn load_snapshot(&self) -> Result<Option<Snapshot>>;

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()>;
}
