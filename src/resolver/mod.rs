//! Pure resolution logic: revision compatibility and election.
//!
//! These functions answer two questions for the fetch coordinator and the
//! dissect phase: can two endpoints referring to the same logical package
//! share a single resolved revision, and which candidate (if any) satisfies
//! every requirement recorded against a package.

use semver::{Comparator, Op, Version, VersionReq};

use crate::types::endpoint::{Arena, Endpoint, EndpointId};
use crate::types::target::{self, Target};

/// Whether `candidate` can reuse the revision already resolved (or being
/// resolved) for `resolved`.
///
/// With a known resolved version the check is a plain satisfies query.
/// Without one, two ranges are considered shareable when they agree on
/// their highest cap: the strongest upper constraint dominates, so lower
/// bounds are deliberately not compared.
pub fn are_compatible(candidate: &Endpoint, resolved: &Endpoint) -> bool {
    if candidate.has_same_target(resolved) {
        return true;
    }

    let candidate_target = Target::parse(&candidate.target);

    if let Some(version) = resolved.semver_version() {
        return match candidate_target {
            Target::Version(v) => v == version,
            Target::Range(req) => req.matches(&version),
            Target::Other(_) => false,
        };
    }

    match (candidate_target, Target::parse(&resolved.target)) {
        (Target::Version(x), Target::Version(y)) => x == y,
        (Target::Version(x), Target::Range(req)) => req.matches(&x),
        (Target::Range(req), Target::Version(y)) => req.matches(&y),
        (Target::Range(a), Target::Range(b)) => match (highest_cap(&a), highest_cap(&b)) {
            (Some(ca), Some(cb)) => ca == cb,
            _ => false,
        },
        _ => false,
    }
}

/// The strongest upper constraint of a range: the maximum version among its
/// comparators together with the comparator kind.
///
/// Returns `None` for unbounded ranges such as `*`.
pub fn highest_cap(req: &VersionReq) -> Option<(Version, Op)> {
    req.comparators
        .iter()
        .map(|c| (comparator_version(c), c.op))
        .max_by(|a, b| a.0.cmp(&b.0))
}

fn comparator_version(c: &Comparator) -> Version {
    let mut v = Version::new(c.major, c.minor.unwrap_or(0), c.patch.unwrap_or(0));
    v.pre = c.pre.clone();
    v
}

/// Elect a single revision from the candidate set, or report a conflict.
///
/// `semvers` must be sorted descending by version. A lone non-semver with no
/// semver candidates wins by default; otherwise the only automatic winner is
/// a semver candidate whose version satisfies every other candidate's
/// requested target.
pub fn elect_suitable(
    arena: &Arena,
    semvers: &[EndpointId],
    non_semvers: &[EndpointId],
) -> Option<EndpointId> {
    if semvers.is_empty() {
        if non_semvers.len() == 1 {
            return Some(non_semvers[0]);
        }
        return None;
    }

    if !non_semvers.is_empty() {
        return None;
    }

    semvers.iter().copied().find(|&subject| {
        let version = match arena[subject].semver_version() {
            Some(v) => v,
            None => return false,
        };
        semvers.iter().all(|&candidate| {
            subject == candidate
                || arena[candidate].has_same_target(&arena[subject])
                || satisfies(&version, &arena[candidate].target)
        })
    })
}

/// Whether a concrete version satisfies a target string.
pub fn satisfies(version: &Version, target_str: &str) -> bool {
    match Target::parse(target_str) {
        Target::Version(v) => *version == v,
        Target::Range(req) => req.matches(version),
        Target::Other(_) => false,
    }
}

/// Whether a resolution value (a range, version, release or `*`) can be
/// matched as a range against candidate versions.
pub fn resolution_range(value: &str) -> Option<VersionReq> {
    target::parse_range(value)
}

/// Order candidates for conflict display and tie-breaking: ascending by
/// version, unversioned candidates first, then by dependant count so the
/// most-required candidate ranks last within a version.
pub fn sort_conflict_picks(arena: &Arena, picks: &mut [EndpointId]) {
    picks.sort_by(|&a, &b| {
        let va = arena[a].semver_version();
        let vb = arena[b].semver_version();
        match (va, vb) {
            (Some(va), Some(vb)) if va != vb => va.cmp(&vb),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            _ => arena[b].dependants.len().cmp(&arena[a].dependants.len()),
        }
    });
}

/// Order semver candidates for election: descending by version, with
/// wildcard-targeted endpoints last among equals.
pub fn sort_semvers_desc(arena: &Arena, semvers: &mut [EndpointId]) {
    semvers.sort_by(|&a, &b| {
        let va = arena[a].semver_version();
        let vb = arena[b].semver_version();
        vb.cmp(&va).then_with(|| {
            let wa = arena[a].target == "*";
            let wb = arena[b].target == "*";
            wa.cmp(&wb)
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PkgMeta;
    use crate::types::endpoint::Endpoint;

    fn endpoint(arena: &mut Arena, target: &str, version: Option<&str>) -> EndpointId {
        let mut ep = Endpoint::new("src", target, Some("pkg".into()));
        if let Some(v) = version {
            ep.pkg_meta = Some(PkgMeta {
                name: Some("pkg".into()),
                version: Some(v.into()),
                ..Default::default()
            });
        }
        arena.alloc(ep)
    }

    #[test]
    fn equal_targets_are_compatible() {
        let mut arena = Arena::default();
        let a = endpoint(&mut arena, "some-branch", None);
        let b = endpoint(&mut arena, "some-branch", None);
        assert!(are_compatible(&arena[a], &arena[b]));
        assert!(are_compatible(&arena[b], &arena[a]));
    }

    #[test]
    fn version_vs_version_requires_equality() {
        let mut arena = Arena::default();
        let a = endpoint(&mut arena, "1.0.0", None);
        let b = endpoint(&mut arena, "1.0.1", None);
        let c = endpoint(&mut arena, "1.0.0", None);
        assert!(!are_compatible(&arena[a], &arena[b]));
        assert!(are_compatible(&arena[a], &arena[c]));
    }

    #[test]
    fn range_vs_version_checks_membership() {
        let mut arena = Arena::default();
        let range = endpoint(&mut arena, "^1.0.0", None);
        let inside = endpoint(&mut arena, "1.4.0", None);
        let outside = endpoint(&mut arena, "2.0.0", None);
        assert!(are_compatible(&arena[range], &arena[inside]));
        assert!(are_compatible(&arena[inside], &arena[range]));
        assert!(!are_compatible(&arena[range], &arena[outside]));
    }

    #[test]
    fn resolved_version_dominates_target_comparison() {
        let mut arena = Arena::default();
        let resolved = endpoint(&mut arena, "^1.0.0", Some("1.2.3"));
        let fits = endpoint(&mut arena, "~1.2.0", None);
        let misses = endpoint(&mut arena, "~1.1.0", None);
        assert!(are_compatible(&arena[fits], &arena[resolved]));
        assert!(!are_compatible(&arena[misses], &arena[resolved]));
    }

    #[test]
    fn ranges_share_when_caps_match() {
        let a = target::parse_range("<2.0.0").unwrap();
        let b = target::parse_range(">=1.0.0, <2.0.0").unwrap();
        assert_eq!(highest_cap(&a), highest_cap(&b));

        let caret = target::parse_range("^1.0.0").unwrap();
        let tilde = target::parse_range("~1.0.0").unwrap();
        // Same cap version but different comparator kind.
        assert_ne!(highest_cap(&caret), highest_cap(&tilde));
    }

    #[test]
    fn star_has_no_cap() {
        let star = target::parse_range("*").unwrap();
        assert_eq!(highest_cap(&star), None);
    }

    #[test]
    fn elects_version_satisfying_all_ranges() {
        let mut arena = Arena::default();
        let a = endpoint(&mut arena, "^1.0.0", Some("1.2.3"));
        let b = endpoint(&mut arena, "~1.2.0", Some("1.2.3"));
        let mut semvers = vec![a, b];
        sort_semvers_desc(&arena, &mut semvers);
        let elected = elect_suitable(&arena, &semvers, &[]).unwrap();
        assert!(satisfies(
            &arena[elected].semver_version().unwrap(),
            "^1.0.0"
        ));
        assert!(satisfies(
            &arena[elected].semver_version().unwrap(),
            "~1.2.0"
        ));
    }

    #[test]
    fn incompatible_ranges_conflict() {
        let mut arena = Arena::default();
        let a = endpoint(&mut arena, "^1.0.0", Some("1.9.0"));
        let b = endpoint(&mut arena, "^2.0.0", Some("2.1.0"));
        let mut semvers = vec![a, b];
        sort_semvers_desc(&arena, &mut semvers);
        assert_eq!(elect_suitable(&arena, &semvers, &[]), None);
    }

    #[test]
    fn lone_non_semver_wins_by_default() {
        let mut arena = Arena::default();
        let branch = endpoint(&mut arena, "master", None);
        assert_eq!(elect_suitable(&arena, &[], &[branch]), Some(branch));

        let other = endpoint(&mut arena, "develop", None);
        assert_eq!(elect_suitable(&arena, &[], &[branch, other]), None);
    }

    #[test]
    fn mixed_kinds_conflict() {
        let mut arena = Arena::default();
        let semver = endpoint(&mut arena, "^1.0.0", Some("1.0.0"));
        let branch = endpoint(&mut arena, "master", None);
        assert_eq!(elect_suitable(&arena, &[semver], &[branch]), None);
    }

    #[test]
    fn conflict_picks_sort_ascending_with_unversioned_first() {
        let mut arena = Arena::default();
        let high = endpoint(&mut arena, "^2.0.0", Some("2.1.0"));
        let low = endpoint(&mut arena, "^1.0.0", Some("1.9.0"));
        let branch = endpoint(&mut arena, "master", None);
        let mut picks = vec![high, low, branch];
        sort_conflict_picks(&arena, &mut picks);
        assert_eq!(picks, vec![branch, low, high]);
    }
}
