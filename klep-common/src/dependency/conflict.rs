// klep-common/src/dependency/conflict.rs
//! Arbitration between two references requested for the same dependency.
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::reference::{ReferenceKind, VersionReference};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConflictSeverity {
    /// Both sides are honoured by the resolution.
    None,
    /// Reconcilable; installation proceeds with a warning.
    Soft,
    /// Blocks installation.
    Hard,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyConflict {
    pub name: String,
    pub requested: VersionReference,
    pub existing: VersionReference,
    pub resolution: VersionReference,
}

impl DependencyConflict {
    pub fn severity(&self) -> ConflictSeverity {
        if self.requested.same_point(&self.existing) {
            return ConflictSeverity::None;
        }
        if is_hard_pair(&self.requested, &self.existing) {
            return ConflictSeverity::Hard;
        }
        if self.requested.kind == ReferenceKind::SemVer
            && self.existing.kind == ReferenceKind::SemVer
            && self.resolution.satisfies(&self.requested)
            && self.resolution.satisfies(&self.existing)
        {
            return ConflictSeverity::None;
        }
        ConflictSeverity::Soft
    }

    pub fn is_hard(&self) -> bool {
        self.severity() == ConflictSeverity::Hard
    }

    /// Same two references, regardless of which side asked first.
    pub fn same_pair(&self, other: &DependencyConflict) -> bool {
        self.name == other.name
            && ((self.requested.same_point(&other.requested)
                && self.existing.same_point(&other.existing))
                || (self.requested.same_point(&other.existing)
                    && self.existing.same_point(&other.requested)))
    }

    pub fn warning(&self) -> String {
        format!(
            "{}: {} and {} disagree, using {}",
            self.name, self.requested, self.existing, self.resolution
        )
    }
}

impl fmt::Display for DependencyConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: requested {}, existing {}, resolved to {}",
            self.name, self.requested, self.existing, self.resolution
        )
    }
}

fn is_hard_pair(a: &VersionReference, b: &VersionReference) -> bool {
    if a.same_point(b) || a.latest || b.latest {
        return false;
    }
    if a.kind != b.kind {
        return true;
    }
    if a.kind == ReferenceKind::SemVer {
        return a.major() != b.major();
    }
    // Same kind means same rank: two different pins of equal strength.
    a.safety_rank() == b.safety_rank() && a.value != b.value
}

pub struct ConflictResolver;

impl ConflictResolver {
    pub fn resolve(
        name: &str,
        requested: &VersionReference,
        existing: &VersionReference,
    ) -> DependencyConflict {
        let resolution = Self::winner(requested, existing).clone();
        DependencyConflict {
            name: name.to_string(),
            requested: requested.clone(),
            existing: existing.clone(),
            resolution,
        }
    }

    pub fn is_hard(conflict: &DependencyConflict) -> bool {
        conflict.is_hard()
    }

    fn winner<'a>(
        requested: &'a VersionReference,
        existing: &'a VersionReference,
    ) -> &'a VersionReference {
        if requested.same_point(existing) {
            return requested;
        }
        match (requested.latest, existing.latest) {
            (true, false) => return existing,
            (false, true) => return requested,
            (true, true) => return requested,
            (false, false) => {}
        }
        match requested.safety_rank().cmp(&existing.safety_rank()) {
            Ordering::Greater => requested,
            Ordering::Less => existing,
            Ordering::Equal if requested.kind == ReferenceKind::SemVer => {
                if requested.satisfies(existing) {
                    requested
                } else if existing.satisfies(requested) {
                    existing
                } else if requested.cmp_floor(existing) == Ordering::Less {
                    existing
                } else {
                    requested
                }
            }
            Ordering::Equal => requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sv(raw: &str) -> VersionReference {
        VersionReference::parse_semver(raw).unwrap()
    }

    fn all_kinds() -> Vec<VersionReference> {
        vec![
            sv("^1.2.0"),
            sv("~2.0.1"),
            sv(">=0.3.0, <0.5.0"),
            VersionReference::tag("v1.0.0"),
            VersionReference::branch("main"),
            VersionReference::hash("abcd1234"),
            VersionReference::latest("ffff0000"),
        ]
    }

    #[test]
    fn identical_references_never_conflict() {
        for reference in all_kinds() {
            let conflict = ConflictResolver::resolve("lib", &reference, &reference.clone());
            assert_eq!(conflict.resolution, reference);
            assert!(!ConflictResolver::is_hard(&conflict));
            assert_eq!(conflict.severity(), ConflictSeverity::None);
        }
    }

    #[test]
    fn differing_semver_majors_are_hard() {
        let pairs = [("^1.0.0", "^2.0.0"), ("1.9.9", ">=3.0.0"), ("~0.1.0", "^1.0.0")];
        for (a, b) in pairs {
            assert!(ConflictResolver::resolve("lib", &sv(a), &sv(b)).is_hard(), "{a} vs {b}");
            assert!(ConflictResolver::resolve("lib", &sv(b), &sv(a)).is_hard(), "{b} vs {a}");
        }
    }

    #[test]
    fn latest_never_beats_a_pin() {
        let latest = VersionReference::latest("ffff0000");
        for pin in all_kinds().into_iter().filter(|r| !r.latest) {
            let forward = ConflictResolver::resolve("lib", &latest, &pin);
            let backward = ConflictResolver::resolve("lib", &pin, &latest);
            assert_eq!(forward.resolution, pin);
            assert_eq!(backward.resolution, pin);
            assert!(!forward.is_hard());
        }
    }

    #[test]
    fn overlapping_ranges_resolve_to_the_tighter_one() {
        let conflict = ConflictResolver::resolve("lib", &sv("^1.0.0"), &sv("^1.2.0"));
        assert_eq!(conflict.resolution, sv("^1.2.0"));
        assert_eq!(conflict.severity(), ConflictSeverity::None);
    }

    #[test]
    fn kind_mismatch_is_hard_and_rank_decides_the_winner() {
        let tag = VersionReference::tag("v1.0.0");
        let hash = VersionReference::hash("abcd1234");
        let conflict = ConflictResolver::resolve("lib", &tag, &hash);
        assert!(conflict.is_hard());
        assert_eq!(conflict.resolution, hash);

        let branch = VersionReference::branch("main");
        let conflict = ConflictResolver::resolve("lib", &branch, &sv("^1.0.0"));
        assert_eq!(conflict.resolution, sv("^1.0.0"));
    }

    #[test]
    fn equal_rank_pins_with_different_values_are_hard() {
        let a = VersionReference::branch("main");
        let b = VersionReference::branch("develop");
        assert!(ConflictResolver::resolve("lib", &a, &b).is_hard());
    }

    #[test]
    fn same_major_disjoint_ranges_are_soft() {
        let conflict = ConflictResolver::resolve("lib", &sv("~1.2.0"), &sv("~1.4.0"));
        assert_eq!(conflict.severity(), ConflictSeverity::Soft);
        assert_eq!(conflict.resolution, sv("~1.4.0"));
    }
}
