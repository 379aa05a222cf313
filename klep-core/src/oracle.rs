// klep-core/src/oracle.rs
//! Oracle for repositories reached over the network.
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use klep_aio::git2::{list_remote_refs, local_path, revision_for, LocalOracle, RemoteRefs};
use klep_aio::store::declared_from_documents;
use klep_common::config::{Config, MANIFEST_FILENAME, SNAPSHOT_FILENAME};
use klep_common::dependency::definition::Dependency;
use klep_common::dependency::reference::{ReferenceKind, VersionReference};
use klep_common::error::{KlepError, Result};
use klep_common::oracle::RepositoryOracle;
use klep_net::{validate_url, RawDocumentFetcher};
use tracing::debug;

/// Lists refs with git's smart protocol and reads `klep.lock`/`klep.json`
/// through the host's raw-content endpoint. Local addresses are served by
/// a [`LocalOracle`].
///
/// Ref listings are cached per address for the lifetime of the oracle.
pub struct RemoteOracle {
    fetcher: RawDocumentFetcher,
    local: LocalOracle,
    refs: Mutex<HashMap<String, RemoteRefs>>,
}

impl RemoteOracle {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            fetcher: RawDocumentFetcher::new(config)?,
            local: LocalOracle::with_base(config.project_root()),
            refs: Mutex::new(HashMap::new()),
        })
    }

    fn is_local(&self, address: &str) -> bool {
        local_path(address).is_some()
    }

    fn refs(&self, address: &str) -> Result<RemoteRefs> {
        if let Some(refs) = self
            .refs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
        {
            return Ok(refs.clone());
        }
        validate_url(address)?;
        let refs = list_remote_refs(address)?;
        self.refs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.to_string(), refs.clone());
        Ok(refs)
    }
}

impl RepositoryOracle for RemoteOracle {
    fn exists(&self, address: &str) -> Result<bool> {
        if self.is_local(address) {
            return self.local.exists(address);
        }
        match self.refs(address) {
            Ok(_) => Ok(true),
            Err(KlepError::Repository { message, .. }) => {
                debug!("{} is not reachable: {}", address, message);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn list_tags(&self, address: &str) -> Result<Vec<String>> {
        if self.is_local(address) {
            return self.local.list_tags(address);
        }
        Ok(self.refs(address)?.tags)
    }

    fn list_branches(&self, address: &str) -> Result<Vec<String>> {
        if self.is_local(address) {
            return self.local.list_branches(address);
        }
        Ok(self.refs(address)?.branches)
    }

    fn head_commit(&self, address: &str) -> Result<String> {
        if self.is_local(address) {
            return self.local.head_commit(address);
        }
        self.refs(address)?
            .head
            .ok_or_else(|| KlepError::repository(address, "remote does not advertise HEAD"))
    }

    fn declared_dependencies(
        &self,
        address: &str,
        reference: &VersionReference,
    ) -> Result<Vec<Dependency>> {
        if self.is_local(address) {
            return self.local.declared_dependencies(address, reference);
        }
        let tags = if reference.kind == ReferenceKind::SemVer {
            self.list_tags(address)?
        } else {
            Vec::new()
        };
        let revision = revision_for(address, reference, &tags)?;
        debug!("Reading declarations of {} at {}", address, revision);

        let snapshot = self.fetcher.fetch(address, &revision, SNAPSHOT_FILENAME)?;
        let manifest = match snapshot {
            Some(_) => None,
            None => self.fetcher.fetch(address, &revision, MANIFEST_FILENAME)?,
        };
        declared_from_documents(snapshot.as_deref(), manifest.as_deref())
    }
}
