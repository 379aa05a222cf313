// klep-common/src/oracle.rs
//! Read-only questions the resolver asks about a repository.
use crate::dependency::definition::Dependency;
use crate::dependency::reference::{ReferenceKind, VersionReference};
use crate::error::Result;

/// Answers existence, ref listings, head commit and declared dependencies
/// for a repository address.
///
/// Every method is blocking, idempotent and free of side effects on the
/// project. Callers that need deadlines or fan-out limits wrap the calls.
pub trait RepositoryOracle: Send + Sync {
    fn exists(&self, address: &str) -> Result<bool>;

    fn list_tags(&self, address: &str) -> Result<Vec<String>>;

    fn list_branches(&self, address: &str) -> Result<Vec<String>>;

    fn head_commit(&self, address: &str) -> Result<String>;

    /// Dependencies the repository itself declares at `reference`, read from
    /// its snapshot when it has one and from its manifest otherwise.
    fn declared_dependencies(
        &self,
        address: &str,
        reference: &VersionReference,
    ) -> Result<Vec<Dependency>>;

    /// Kind of `raw` in this repository. Anything that is neither a semver
    /// expression nor a known branch or tag is taken to be a commit.
    fn classify(&self, address: &str, raw: &str) -> Result<ReferenceKind> {
        if VersionReference::parse_semver(raw).is_some() {
            return Ok(ReferenceKind::SemVer);
        }
        if self.list_branches(address)?.iter().any(|b| b == raw) {
            return Ok(ReferenceKind::Branch);
        }
        if self.list_tags(address)?.iter().any(|t| t == raw) {
            return Ok(ReferenceKind::Tag);
        }
        Ok(ReferenceKind::Hash)
    }
}
