// Shared fixtures for the klep-core integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use klep_common::config::Config;
use klep_common::dependency::definition::Dependency;
use klep_common::dependency::reference::VersionReference;
use klep_common::error::{KlepError, Result};
use klep_common::model::{Manifest, Snapshot};
use klep_common::oracle::RepositoryOracle;
use klep_common::store::{ManifestStore, SnapshotStore};

pub fn url(name: &str) -> String {
    format!("https://example.com/{name}")
}

pub fn dep(name: &str, version: &str) -> Dependency {
    Dependency::new(name, url(name), version)
}

pub fn sv(raw: &str) -> VersionReference {
    VersionReference::parse_semver(raw).unwrap()
}

#[derive(Default)]
struct Repo {
    head: String,
    tags: Vec<String>,
    branches: Vec<String>,
    /// Declarations keyed by the reference's spec string.
    at: HashMap<String, Vec<Dependency>>,
    everywhere: Vec<Dependency>,
    delay: Option<Duration>,
}

/// Repositories held in memory, keyed by `https://example.com/<name>`.
#[derive(Default)]
pub struct MemoryOracle {
    repos: HashMap<String, Repo>,
    listings: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn repo_mut(&mut self, name: &str) -> &mut Repo {
        self.repos.entry(url(name)).or_insert_with(|| Repo {
            head: format!("{name}-head"),
            branches: vec!["main".to_string()],
            ..Repo::default()
        })
    }

    /// A repository with no dependencies of its own.
    pub fn repo(mut self, name: &str) -> Self {
        self.repo_mut(name);
        self
    }

    /// `deps` are declared at every reference of `name`.
    pub fn declares(mut self, name: &str, deps: Vec<Dependency>) -> Self {
        self.repo_mut(name).everywhere = deps;
        self
    }

    /// `deps` are declared by `name` at the reference spelled `reference`.
    pub fn declares_at(mut self, name: &str, reference: &str, deps: Vec<Dependency>) -> Self {
        self.repo_mut(name).at.insert(reference.to_string(), deps);
        self
    }

    pub fn head(mut self, name: &str, commit: &str) -> Self {
        self.repo_mut(name).head = commit.to_string();
        self
    }

    pub fn tags(mut self, name: &str, tags: &[&str]) -> Self {
        self.repo_mut(name).tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn slow(mut self, name: &str, delay: Duration) -> Self {
        self.repo_mut(name).delay = Some(delay);
        self
    }

    /// How many times the declarations of `name` were fetched.
    pub fn listings(&self, name: &str) -> usize {
        self.listings
            .lock()
            .unwrap()
            .get(&url(name))
            .copied()
            .unwrap_or(0)
    }

    /// Most declaration listings that were ever running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn get(&self, address: &str) -> Result<&Repo> {
        self.repos
            .get(address)
            .ok_or_else(|| KlepError::repository(address, "no such repository"))
    }
}

impl RepositoryOracle for MemoryOracle {
    fn exists(&self, address: &str) -> Result<bool> {
        Ok(self.repos.contains_key(address))
    }

    fn list_tags(&self, address: &str) -> Result<Vec<String>> {
        Ok(self.get(address)?.tags.clone())
    }

    fn list_branches(&self, address: &str) -> Result<Vec<String>> {
        Ok(self.get(address)?.branches.clone())
    }

    fn head_commit(&self, address: &str) -> Result<String> {
        Ok(self.get(address)?.head.clone())
    }

    fn declared_dependencies(
        &self,
        address: &str,
        reference: &VersionReference,
    ) -> Result<Vec<Dependency>> {
        let repo = self.get(address)?;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = repo.delay {
            std::thread::sleep(delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        *self
            .listings
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default() += 1;
        Ok(repo
            .at
            .get(&reference.spec_string())
            .unwrap_or(&repo.everywhere)
            .clone())
    }
}

/// Manifest and snapshot kept in memory, with write counters.
#[derive(Default)]
pub struct MemoryProject {
    manifest: Mutex<Option<Manifest>>,
    snapshot: Mutex<Option<Snapshot>>,
    manifest_writes: AtomicUsize,
    snapshot_writes: AtomicUsize,
    reject_snapshots: AtomicBool,
}

impl MemoryProject {
    pub fn new(name: &str, declared: &[Dependency]) -> Arc<Self> {
        let mut manifest = Manifest::new(name);
        for dep in declared {
            manifest.upsert(dep);
        }
        Arc::new(Self {
            manifest: Mutex::new(Some(manifest)),
            ..Self::default()
        })
    }

    pub fn with_snapshot(self: Arc<Self>, snapshot: Snapshot) -> Arc<Self> {
        *self.snapshot.lock().unwrap() = Some(snapshot);
        self
    }

    /// Every later snapshot write fails as a full disk would.
    pub fn rejecting_snapshots(self: Arc<Self>) -> Arc<Self> {
        self.reject_snapshots.store(true, Ordering::SeqCst);
        self
    }

    pub fn manifest(&self) -> Manifest {
        self.manifest.lock().unwrap().clone().unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.snapshot.lock().unwrap().clone()
    }

    pub fn writes(&self) -> (usize, usize) {
        (
            self.manifest_writes.load(Ordering::SeqCst),
            self.snapshot_writes.load(Ordering::SeqCst),
        )
    }
}

impl ManifestStore for MemoryProject {
    fn load_manifest(&self) -> Result<Manifest> {
        Ok(self.manifest())
    }

    fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.manifest_writes.fetch_add(1, Ordering::SeqCst);
        *self.manifest.lock().unwrap() = Some(manifest.clone());
        Ok(())
    }
}

impl SnapshotStore for MemoryProject {
    fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        Ok(self.snapshot())
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        if self.reject_snapshots.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("disk full").into());
        }
        self.snapshot_writes.fetch_add(1, Ordering::SeqCst);
        *self.snapshot.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::for_project(std::env::temp_dir());
    config.query_timeout = Duration::from_secs(5);
    config.max_concurrent_queries = 4;
    config
}
