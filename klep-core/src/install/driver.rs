// klep-core/src/install/driver.rs
//! One resolution run: build the graph, search it, persist the result.
use std::sync::Arc;

use klep_common::config::Config;
use klep_common::dependency::definition::Dependency;
use klep_common::dependency::reference::VersionReference;
use klep_common::dependency::search::{ConstrainedSearch, SearchBackend, SearchMode, SearchOptions};
use klep_common::error::{KlepError, Result};
use klep_common::model::{Manifest, Snapshot};
use klep_common::oracle::RepositoryOracle;
use klep_common::pipeline::{ResolutionEvent, ResolutionState};
use klep_common::store::{ManifestStore, SnapshotStore};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::graph::{GraphBuilder, Pin};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub name: String,
    pub url: String,
    pub version: String,
    pub mode: SearchMode,
}

impl InstallRequest {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        version: impl Into<String>,
        mode: SearchMode,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            version: version.into(),
            mode,
        }
    }

    fn dependency(&self) -> Dependency {
        Dependency::new(&self.name, &self.url, &self.version)
    }
}

#[derive(Debug, Clone)]
pub struct InstallResult {
    pub success: bool,
    /// Soft conflicts reconciled by this run that were not already recorded.
    pub warnings: Vec<String>,
    /// The accepted snapshot, when the run succeeded.
    pub resolution: Option<Snapshot>,
    pub error: Option<KlepError>,
}

impl InstallResult {
    fn succeeded(snapshot: Snapshot, warnings: Vec<String>) -> Self {
        Self {
            success: true,
            warnings,
            resolution: Some(snapshot),
            error: None,
        }
    }

    fn failed(error: KlepError) -> Self {
        Self {
            success: false,
            warnings: Vec::new(),
            resolution: None,
            error: Some(error),
        }
    }

    /// The hard conflicts that blocked the run, if that is why it failed.
    pub fn conflicts(&self) -> &[klep_common::dependency::DependencyConflict] {
        match &self.error {
            Some(KlepError::Conflict(conflicts)) => conflicts,
            _ => &[],
        }
    }
}

/// State of a single run. Nothing here outlives the run.
struct RunContext<'a> {
    state: ResolutionState,
    events: Option<&'a broadcast::Sender<ResolutionEvent>>,
}

impl<'a> RunContext<'a> {
    fn new(events: Option<&'a broadcast::Sender<ResolutionEvent>>) -> Self {
        Self {
            state: ResolutionState::Idle,
            events,
        }
    }

    fn transition(&mut self, to: ResolutionState) {
        debug!("Resolution state {:?} -> {:?}", self.state, to);
        self.emit(ResolutionEvent::StateChanged {
            from: self.state,
            to,
        });
        self.state = to;
    }

    fn emit(&self, event: ResolutionEvent) {
        if let Some(tx) = self.events {
            tx.send(event).ok();
        }
    }
}

struct Accepted {
    snapshot: Snapshot,
    warnings: Vec<String>,
}

pub struct ResolutionDriver {
    config: Config,
    oracle: Arc<dyn RepositoryOracle>,
    manifests: Arc<dyn ManifestStore>,
    snapshots: Arc<dyn SnapshotStore>,
    backend: SearchBackend,
    event_tx: Option<broadcast::Sender<ResolutionEvent>>,
}

impl ResolutionDriver {
    pub fn new(
        config: Config,
        oracle: Arc<dyn RepositoryOracle>,
        manifests: Arc<dyn ManifestStore>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            config,
            oracle,
            manifests,
            snapshots,
            backend: SearchBackend::AStar,
            event_tx: None,
        }
    }

    pub fn with_backend(mut self, backend: SearchBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_events(mut self, event_tx: broadcast::Sender<ResolutionEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Adds (or replaces) one declaration and re-resolves the project.
    /// Nothing is written unless the whole graph resolves.
    #[instrument(skip(self), fields(name = %request.name, version = %request.version))]
    pub async fn install(&self, request: InstallRequest) -> InstallResult {
        let dependency = request.dependency();
        let outcome = async {
            dependency.validate()?;
            let original = self.manifests.load_manifest()?;
            let mut manifest = original.clone();
            manifest.upsert(&dependency);
            self.resolve(&manifest, Some(&original), request.mode).await
        }
        .await;
        self.finish(outcome)
    }

    /// Re-resolves the declared set as it is.
    #[instrument(skip(self))]
    pub async fn refresh(&self, mode: SearchMode) -> InstallResult {
        let outcome = async {
            let manifest = self.manifests.load_manifest()?;
            self.resolve(&manifest, None, mode).await
        }
        .await;
        self.finish(outcome)
    }

    /// Drops a declaration and re-resolves what is left.
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> InstallResult {
        let outcome = async {
            let original = self.manifests.load_manifest()?;
            let mut manifest = original.clone();
            if !manifest.remove(name) {
                return Err(KlepError::Argument(format!(
                    "'{name}' is not a declared dependency"
                )));
            }
            self.resolve(&manifest, Some(&original), SearchMode::Optimal)
                .await
        }
        .await;
        self.finish(outcome)
    }

    /// Writes the edited manifest (when there is one) and then the snapshot.
    /// If the snapshot cannot be written the previous manifest is put back.
    fn persist(
        &self,
        run: &RunContext<'_>,
        manifest: &Manifest,
        original: Option<&Manifest>,
        snapshot: &Snapshot,
    ) -> Result<()> {
        match original {
            Some(original) => {
                self.manifests.save_manifest(manifest)?;
                if let Err(e) = self.snapshots.save_snapshot(snapshot) {
                    warn!("Snapshot write failed, restoring the previous manifest: {}", e);
                    if let Err(restore) = self.manifests.save_manifest(original) {
                        error!("Could not restore the manifest of {}: {}", original.name, restore);
                    }
                    return Err(e);
                }
            }
            None => self.snapshots.save_snapshot(snapshot)?,
        }
        run.emit(ResolutionEvent::SnapshotWritten {
            entries: snapshot.dependencies.len(),
        });
        Ok(())
    }

    fn finish(&self, outcome: Result<Accepted>) -> InstallResult {
        match outcome {
            Ok(accepted) => InstallResult::succeeded(accepted.snapshot, accepted.warnings),
            Err(e) => {
                if e.is_fatal() {
                    error!("Resolution aborted: {}", e);
                } else {
                    warn!("Resolution failed: {}", e);
                }
                InstallResult::failed(e)
            }
        }
    }

    /// One run. `original` is the stored manifest when `manifest` is an edit
    /// of it that must be written alongside the snapshot.
    async fn resolve(
        &self,
        manifest: &Manifest,
        original: Option<&Manifest>,
        mode: SearchMode,
    ) -> Result<Accepted> {
        let mut run = RunContext::new(self.event_tx.as_ref());
        match self.resolve_in(&mut run, manifest, original, mode).await {
            Ok(accepted) => {
                run.transition(ResolutionState::Succeeded);
                Ok(accepted)
            }
            Err(e) => {
                run.emit(ResolutionEvent::run_failed(&e));
                run.transition(ResolutionState::Failed);
                Err(e)
            }
        }
    }

    async fn resolve_in(
        &self,
        run: &mut RunContext<'_>,
        manifest: &Manifest,
        original: Option<&Manifest>,
        mode: SearchMode,
    ) -> Result<Accepted> {
        let declared = manifest.declared();
        let previous = self.snapshots.load_snapshot()?.unwrap_or_default();

        run.transition(ResolutionState::BuildingGraph);
        let mut builder = GraphBuilder::new(Arc::clone(&self.oracle), &self.config);
        if let Some(tx) = &self.event_tx {
            builder = builder.with_events(tx.clone());
        }
        let pins = pins_from(&previous, &declared);
        let graph = match builder.build_project(&manifest.name, &declared, &pins).await {
            Err(KlepError::Repository { address, message }) if !pins.is_empty() => {
                // A pinned reference may no longer exist upstream.
                warn!(
                    "Snapshot pins could not be expanded ({}: {}); resolving without them",
                    address, message
                );
                builder.build_project(&manifest.name, &declared, &[]).await?
            }
            other => other?,
        };

        run.transition(ResolutionState::Searching);
        for (_, node) in graph.nodes() {
            for warning in &node.warnings {
                warn!("{}", warning);
            }
        }
        let options = SearchOptions::from_config(&self.config, mode).with_backend(self.backend);
        let assignment = ConstrainedSearch::new(&graph, options).run()?;
        run.emit(ResolutionEvent::SearchFinished {
            cost: assignment.cost,
            expansions: assignment.expansions,
        });
        info!(
            "Resolved {} dependencies (cost {}, {} expansions)",
            assignment.entries.len(),
            assignment.cost,
            assignment.expansions
        );

        let snapshot = Snapshot::from_assignment(&assignment);
        let warnings = snapshot.fresh_warnings(&previous);
        self.persist(run, manifest, original, &snapshot)?;
        for warning in &warnings {
            run.emit(ResolutionEvent::LogWarn {
                message: warning.clone(),
            });
        }
        Ok(Accepted { snapshot, warnings })
    }
}

/// Previous choices that can still be offered: same repository as any
/// current declaration of the name. Commits resolved from `latest` are
/// pinned as plain hashes.
fn pins_from(previous: &Snapshot, declared: &[Dependency]) -> Vec<Pin> {
    previous
        .dependencies
        .iter()
        .filter(|(name, entry)| {
            declared
                .iter()
                .find(|d| &d.name == *name)
                .is_none_or(|d| d.url == entry.url)
        })
        .map(|(name, entry)| Pin {
            name: name.clone(),
            url: entry.url.clone(),
            reference: VersionReference {
                latest: false,
                ..entry.reference.clone()
            },
        })
        .collect()
}
