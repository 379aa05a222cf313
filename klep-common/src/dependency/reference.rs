//! Typed version references and their classification.
//!
//! A requested version string is one of four incompatible kinds of reference:
//! a semantic-version literal or range, a tag, a branch, or an opaque commit
//! hash. The `"latest"` sentinel is classified as the repository's current
//! head commit but remembers where it came from so conflict arbitration can
//! let any concrete pin win over it.
use std::cmp::Ordering;
use std::fmt;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KlepError, Result};
use crate::oracle::RepositoryOracle;

pub const LATEST: &str = "latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    SemVer,
    Tag,
    Branch,
    Hash,
}

impl ReferenceKind {
    /// Reproducibility strength used to arbitrate between kinds.
    ///
    /// SemVer > Hash > Tag > Branch: a range is auditable and still pins a
    /// release line, a hash is immutable but opaque, a tag can be re-pointed
    /// and a branch moves on every push.
    pub fn safety_rank(self) -> u8 {
        match self {
            Self::SemVer => 3,
            Self::Hash => 2,
            Self::Tag => 1,
            Self::Branch => 0,
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SemVer => "semver",
            Self::Tag => "tag",
            Self::Branch => "branch",
            Self::Hash => "hash",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "^")]
    Caret,
    #[serde(rename = "~")]
    Tilde,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<=")]
    LessEq,
    #[serde(rename = ">=")]
    GreaterEq,
    #[serde(rename = "!=")]
    NotEq,
}

impl Operator {
    // Two-character operators first so "<=" is not read as "<".
    const PREFIXES: [(&'static str, Option<Operator>); 8] = [
        ("<=", Some(Operator::LessEq)),
        (">=", Some(Operator::GreaterEq)),
        ("!=", Some(Operator::NotEq)),
        ("^", Some(Operator::Caret)),
        ("~", Some(Operator::Tilde)),
        ("<", Some(Operator::Less)),
        (">", Some(Operator::Greater)),
        ("=", None),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Caret => "^",
            Self::Tilde => "~",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessEq => "<=",
            Self::GreaterEq => ">=",
            Self::NotEq => "!=",
        }
    }

    /// Splits one leading operator off `raw`.
    pub fn split(raw: &str) -> (Option<Operator>, &str) {
        for (prefix, op) in Self::PREFIXES {
            if let Some(rest) = raw.strip_prefix(prefix) {
                return (op, rest.trim_start());
            }
        }
        (None, raw)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionReference {
    pub kind: ReferenceKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub latest: bool,
}

impl VersionReference {
    pub fn semver(operator: Option<Operator>, value: impl Into<String>) -> Self {
        Self {
            kind: ReferenceKind::SemVer,
            value: value.into(),
            operator,
            latest: false,
        }
    }

    pub fn tag(value: impl Into<String>) -> Self {
        Self::pinned(ReferenceKind::Tag, value)
    }

    pub fn branch(value: impl Into<String>) -> Self {
        Self::pinned(ReferenceKind::Branch, value)
    }

    pub fn hash(value: impl Into<String>) -> Self {
        Self::pinned(ReferenceKind::Hash, value)
    }

    /// The `"latest"` sentinel resolved against the repository head.
    pub fn latest(head_commit: impl Into<String>) -> Self {
        Self {
            kind: ReferenceKind::Hash,
            value: head_commit.into(),
            operator: None,
            latest: true,
        }
    }

    pub fn pinned(kind: ReferenceKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            operator: None,
            latest: false,
        }
    }

    /// Parses `raw` as a semantic-version literal (with an optional operator)
    /// or a comma-separated range expression. Returns `None` for anything else.
    pub fn parse_semver(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed == "*" {
            return Some(Self::semver(None, "*"));
        }
        let (operator, rest) = Operator::split(trimmed);
        if Version::parse(rest).is_ok() {
            return Some(Self::semver(operator, rest));
        }
        // Partial versions and ranges. A bare number without an operator
        // stays a commit or branch name.
        if operator.is_none() && !trimmed.contains(['.', ',']) {
            return None;
        }
        if operator == Some(Operator::NotEq) || VersionReq::parse(trimmed).is_err() {
            return None;
        }
        match operator {
            Some(op) if !rest.contains(',') => Some(Self::semver(Some(op), rest)),
            _ => Some(Self::semver(None, trimmed)),
        }
    }

    /// Same kind, value and operator. The `latest` marker is ignored: a
    /// latest request whose head equals a pinned hash points at the same commit.
    pub fn same_point(&self, other: &Self) -> bool {
        self.kind == other.kind && self.value == other.value && self.operator == other.operator
    }

    pub fn safety_rank(&self) -> u8 {
        self.kind.safety_rank()
    }

    /// Identity used in graph keys (`url@key`).
    pub fn key(&self) -> String {
        if self.latest {
            LATEST.to_string()
        } else {
            self.spec_string()
        }
    }

    /// A string that classifies back to this reference's point.
    pub fn spec_string(&self) -> String {
        match self.operator {
            Some(op) => format!("{op}{}", self.value),
            None => self.value.clone(),
        }
    }

    /// Anything but one complete `x.y.z` literal.
    fn is_range_expression(&self) -> bool {
        Version::parse(&self.value).is_err()
    }

    fn literal(&self) -> Option<Version> {
        if self.kind != ReferenceKind::SemVer || self.is_range_expression() {
            return None;
        }
        Version::parse(&self.value).ok()
    }

    fn requirement(&self) -> Option<VersionReq> {
        if self.kind != ReferenceKind::SemVer {
            return None;
        }
        let expr = match self.operator {
            Some(Operator::NotEq) => return None,
            Some(op) => format!("{op}{}", self.value),
            None if self.is_range_expression() => self.value.clone(),
            None => format!("={}", self.value),
        };
        VersionReq::parse(&expr).ok()
    }

    /// Major version of the literal, or of the range's lower bound.
    pub fn major(&self) -> Option<u64> {
        match self.literal() {
            Some(v) => Some(v.major),
            None => self.floor().map(|v| v.major),
        }
    }

    /// Smallest version this SemVer reference admits.
    pub fn floor(&self) -> Option<Version> {
        if self.kind != ReferenceKind::SemVer {
            return None;
        }
        if let Some(v) = self.literal() {
            return Some(match self.operator {
                Some(Operator::Greater) => Version::new(v.major, v.minor, v.patch + 1),
                Some(Operator::Less | Operator::LessEq | Operator::NotEq) => Version::new(0, 0, 0),
                _ => v,
            });
        }
        let req = self.requirement()?;
        let floor = req
            .comparators
            .iter()
            .filter(|c| {
                matches!(
                    c.op,
                    semver::Op::Exact
                        | semver::Op::Wildcard
                        | semver::Op::GreaterEq
                        | semver::Op::Greater
                        | semver::Op::Caret
                        | semver::Op::Tilde
                )
            })
            .map(|c| {
                let v = Version::new(c.major, c.minor.unwrap_or(0), c.patch.unwrap_or(0));
                if c.op == semver::Op::Greater {
                    Version::new(v.major, v.minor, v.patch + 1)
                } else {
                    v
                }
            })
            .max()
            .unwrap_or_else(|| Version::new(0, 0, 0));
        Some(floor)
    }

    /// Whether `version` is admitted by this SemVer reference.
    pub fn matches(&self, version: &Version) -> bool {
        if self.kind != ReferenceKind::SemVer {
            return false;
        }
        if self.operator == Some(Operator::NotEq) {
            return self.literal().is_some_and(|v| &v != version);
        }
        self.requirement().is_some_and(|req| req.matches(version))
    }

    /// Choosing `self` honours `request` without further negotiation.
    pub fn satisfies(&self, request: &VersionReference) -> bool {
        if self.same_point(request) {
            return true;
        }
        if self.kind != ReferenceKind::SemVer || request.kind != ReferenceKind::SemVer {
            return false;
        }
        match self.floor() {
            Some(floor) => request.matches(&floor),
            None => false,
        }
    }

    /// Highest tag (optionally `v`-prefixed) admitted by a SemVer reference.
    pub fn best_tag<'a>(&self, tags: &'a [String]) -> Option<&'a str> {
        tags.iter()
            .filter_map(|tag| {
                let bare = tag.strip_prefix('v').unwrap_or(tag);
                Version::parse(bare).ok().map(|v| (v, tag.as_str()))
            })
            .filter(|(v, _)| self.matches(v))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, tag)| tag)
    }

    /// Orders two SemVer references by their floor, lowest first.
    pub fn cmp_floor(&self, other: &Self) -> Ordering {
        self.floor().cmp(&other.floor())
    }
}

impl fmt::Display for VersionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.latest {
            let short: String = self.value.chars().take(12).collect();
            return write!(f, "latest ({short})");
        }
        match self.kind {
            ReferenceKind::SemVer => write!(f, "{}", self.spec_string()),
            kind => write!(f, "{kind} {}", self.value),
        }
    }
}

/// Classifies a requested version string for the repository at `address`.
///
/// Fails with a repository error when the oracle cannot confirm the
/// repository exists, so nothing is resolved against an unreachable source.
pub fn classify(
    oracle: &dyn RepositoryOracle,
    address: &str,
    raw: &str,
) -> Result<VersionReference> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(KlepError::Argument(format!(
            "empty version requested for '{address}'"
        )));
    }
    if !oracle.exists(address)? {
        return Err(KlepError::repository(
            address,
            "repository is not reachable locally or remotely",
        ));
    }
    if raw == LATEST {
        let head = oracle.head_commit(address)?;
        debug!("Classified '{}' for {} as head commit {}", raw, address, head);
        return Ok(VersionReference::latest(head));
    }
    if let Some(reference) = VersionReference::parse_semver(raw) {
        return Ok(reference);
    }
    let kind = oracle.classify(address, raw)?;
    debug!("Classified '{}' for {} as {}", raw, address, kind);
    Ok(VersionReference::pinned(kind, raw))
}
