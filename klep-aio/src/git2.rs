/*
File: klep-aio/src/git2.rs
Purpose: Synchronous git access using git2: remote ref listing and reads
from local repositories.
*/
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{BranchType, Direction, ObjectType, Remote, Repository};
use klep_common::config::{MANIFEST_FILENAME, SNAPSHOT_FILENAME};
use klep_common::dependency::definition::Dependency;
use klep_common::dependency::reference::{ReferenceKind, VersionReference};
use klep_common::error::{KlepError, Result};
use klep_common::oracle::RepositoryOracle;
use tracing::{debug, error};

use crate::store::declared_from_documents;

/// Refs advertised by a remote, without the `refs/...` prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRefs {
    pub head: Option<String>,
    pub branches: Vec<String>,
    pub tags: Vec<String>,
}

/// Connects to `address` and lists its refs, like `git ls-remote`.
/// Contains blocking network I/O.
pub fn list_remote_refs(address: &str) -> Result<RemoteRefs> {
    debug!("Listing remote refs for {}", address);
    let mut remote = Remote::create_detached(address).map_err(|e| {
        error!("Failed create remote for {}: {}", address, e);
        KlepError::repository(address, format!("invalid remote: {}", e.message()))
    })?;
    remote.connect(Direction::Fetch).map_err(|e| {
        debug!("Failed connect to {}: {}", address, e);
        KlepError::repository(address, format!("cannot connect: {}", e.message()))
    })?;

    let mut refs = RemoteRefs::default();
    let heads = remote
        .list()
        .map_err(|e| KlepError::repository(address, format!("cannot list refs: {}", e.message())))?;
    for head in heads {
        let name = head.name();
        if name == "HEAD" {
            refs.head = Some(head.oid().to_string());
        } else if let Some(branch) = name.strip_prefix("refs/heads/") {
            refs.branches.push(branch.to_string());
        } else if let Some(tag) = name.strip_prefix("refs/tags/") {
            // Peeled entries ("v1.0.0^{}") repeat a tag already listed.
            if !tag.ends_with("^{}") {
                refs.tags.push(tag.to_string());
            }
        }
    }
    remote
        .disconnect()
        .map_err(|e| debug!("Disconnect from {} failed: {}", address, e))
        .ok();
    debug!(
        "{}: {} branch(es), {} tag(s)",
        address,
        refs.branches.len(),
        refs.tags.len()
    );
    Ok(refs)
}

/// The git revision to read for `reference`: the best matching tag for a
/// SemVer reference, the value itself otherwise.
pub fn revision_for(address: &str, reference: &VersionReference, tags: &[String]) -> Result<String> {
    if reference.kind != ReferenceKind::SemVer {
        return Ok(reference.value.clone());
    }
    reference
        .best_tag(tags)
        .map(str::to_string)
        .ok_or_else(|| KlepError::repository(address, format!("no tag satisfies {reference}")))
}

/// Filesystem path of a local repository address (`file://` URL or path).
pub fn local_path(address: &str) -> Option<PathBuf> {
    if let Some(path) = address.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if address.contains("://") || address.contains('@') {
        return None;
    }
    Some(PathBuf::from(address))
}

/// Answers oracle queries from repositories on the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalOracle {
    base: Option<PathBuf>,
}

impl LocalOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative addresses against `base`.
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    fn path_of(&self, address: &str) -> Option<PathBuf> {
        let path = local_path(address)?;
        Some(match &self.base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        })
    }

    fn open(&self, address: &str) -> Result<Repository> {
        let path = self
            .path_of(address)
            .ok_or_else(|| KlepError::repository(address, "not a local repository address"))?;
        Repository::open(&path).map_err(|e| {
            debug!("Failed open repo {}: {}", path.display(), e);
            KlepError::repository(address, format!("cannot open repository: {}", e.message()))
        })
    }
}

impl RepositoryOracle for LocalOracle {
    fn exists(&self, address: &str) -> Result<bool> {
        Ok(self
            .path_of(address)
            .is_some_and(|path| Repository::open(path).is_ok()))
    }

    fn list_tags(&self, address: &str) -> Result<Vec<String>> {
        let repo = self.open(address)?;
        let names = repo.tag_names(None).map_err(|e| KlepError::Git(Arc::new(e)))?;
        Ok(names.iter().flatten().map(str::to_string).collect())
    }

    fn list_branches(&self, address: &str) -> Result<Vec<String>> {
        let repo = self.open(address)?;
        let mut branches = Vec::new();
        for branch in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                branches.push(name.to_string());
            }
        }
        Ok(branches)
    }

    fn head_commit(&self, address: &str) -> Result<String> {
        let repo = self.open(address)?;
        let commit = repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    fn declared_dependencies(
        &self,
        address: &str,
        reference: &VersionReference,
    ) -> Result<Vec<Dependency>> {
        let repo = self.open(address)?;
        let tags = if reference.kind == ReferenceKind::SemVer {
            self.list_tags(address)?
        } else {
            Vec::new()
        };
        let revision = revision_for(address, reference, &tags)?;
        let commit = repo
            .revparse_single(&revision)
            .and_then(|object| object.peel_to_commit())
            .map_err(|e| {
                KlepError::repository(address, format!("unknown revision '{revision}': {}", e.message()))
            })?;
        let tree = commit.tree()?;
        let snapshot = read_blob(&repo, &tree, SNAPSHOT_FILENAME)?;
        let manifest = read_blob(&repo, &tree, MANIFEST_FILENAME)?;
        declared_from_documents(snapshot.as_deref(), manifest.as_deref())
    }
}

fn read_blob(repo: &Repository, tree: &git2::Tree<'_>, file: &str) -> Result<Option<String>> {
    let entry = match tree.get_path(Path::new(file)) {
        Ok(entry) => entry,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if entry.kind() != Some(ObjectType::Blob) {
        return Ok(None);
    }
    let object = entry.to_object(repo)?;
    let blob = object
        .as_blob()
        .ok_or_else(|| KlepError::Generic(format!("{file} is not a blob")))?;
    let text = std::str::from_utf8(blob.content())
        .map_err(|e| KlepError::Parsing("repository document", format!("{file}: {e}")))?;
    Ok(Some(text.to_string()))
}
