//! Decomposed dependency endpoints.
//!
//! An [`Endpoint`] is one requested revision of a logical package: an
//! opaque transport `source`, a requested `target` revision and an optional
//! logical `name`. Endpoints form a graph (dependants and dependencies) that
//! can be cyclic, so nodes live in an [`Arena`] and reference each other by
//! [`EndpointId`].

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Index, IndexMut};
use std::path::PathBuf;

use crate::manifest::PkgMeta;

/// Index of an endpoint inside the [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(pub usize);

/// A decomposed dependency specification and its fetch state.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Logical name. Unknown until requested by name or fetched.
    pub name: Option<String>,
    /// Name as first requested, before any rename via manifest.
    pub initial_name: Option<String>,
    /// Previous name when the fetched manifest declared a different one.
    pub old_name: Option<String>,
    /// Opaque transport address.
    pub source: String,
    /// Requested revision: semver version or range, branch/tag, or `*`.
    pub target: String,
    /// Original target before wildcard promotion, when it was `*`.
    pub original_target: Option<String>,
    /// Manifest contents after fetch.
    pub pkg_meta: Option<PkgMeta>,
    /// Materialized source directory produced by the transport.
    pub canonical_dir: Option<PathBuf>,
    /// Endpoints that depend on this one.
    pub dependants: BTreeSet<EndpointId>,
    /// Declared dependency key to child endpoint.
    pub dependencies: BTreeMap<String, EndpointId>,
    /// Set on user-added top-level targets.
    pub newly: bool,
    /// Propagates from parent; blocks stored-resolution application.
    pub unresolvable: bool,
    /// The transport cannot select among revisions for this source.
    pub untargetable: bool,
    /// Installed out-of-tree; skipped by the deployer.
    pub linked: bool,
}

impl Endpoint {
    pub fn new(source: impl Into<String>, target: impl Into<String>, name: Option<String>) -> Self {
        Self {
            initial_name: name.clone(),
            name,
            old_name: None,
            source: source.into(),
            target: target.into(),
            original_target: None,
            pkg_meta: None,
            canonical_dir: None,
            dependants: BTreeSet::new(),
            dependencies: BTreeMap::new(),
            newly: false,
            unresolvable: false,
            untargetable: false,
            linked: false,
        }
    }

    /// Resolved id: the logical-package key used across the lookup tables.
    pub fn rid(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => source_slug(&self.source),
        }
    }

    /// Fetch id: the dedup key for in-flight fetches. Two requests for the
    /// same source but different targets do not share a fetch.
    pub fn fid(&self) -> String {
        format!("{}#{}", self.source, self.target)
    }

    /// Strict identity used for deduping the target list.
    pub fn id(&self) -> String {
        format!(
            "{}%{}#{}",
            self.name.as_deref().unwrap_or(""),
            self.source,
            self.target
        )
    }

    /// Key under which a rename of this endpoint is recorded. Named
    /// endpoints rename from their name; anonymous ones from the request
    /// itself.
    pub fn rename_key(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}/{}", self.source, self.target),
        }
    }

    /// Whether both endpoints request the same revision.
    pub fn has_same_target(&self, other: &Endpoint) -> bool {
        self.target == other.target
    }

    /// The manifest version parsed as semver, when present.
    pub fn semver_version(&self) -> Option<semver::Version> {
        self.pkg_meta.as_ref().and_then(|m| m.semver_version())
    }

    /// Rename the endpoint, recording the previous name.
    pub fn rename(&mut self, new_name: String) {
        self.old_name = self.name.take();
        self.name = Some(new_name);
    }

    /// Snapshot of the identifying fields, for reporting and errors.
    pub fn as_ref_triple(&self) -> crate::repository::EndpointRef {
        crate::repository::EndpointRef {
            name: self.name.clone(),
            source: self.source.clone(),
            target: self.target.clone(),
        }
    }
}

/// Normalized form of a source address, used as the rid of unnamed
/// endpoints.
pub fn source_slug(source: &str) -> String {
    let trimmed = source.trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string()
}

/// Best-effort logical name from a source address.
pub fn guess_name(source: &str) -> String {
    let slug = source_slug(source);
    let tail = slug.rsplit(['/', ':']).next().unwrap_or(&slug);
    tail.to_string()
}

/// Decompose a manifest dependency entry into `(source, target)`.
///
/// `value` is either `source#target`, a bare version/range (the key names
/// the package), or a bare source address.
pub fn decompose(key: &str, value: &str) -> (String, String) {
    let value = value.trim();

    if let Some((source, target)) = value.rsplit_once('#') {
        let target = if target.is_empty() { "*" } else { target };
        return (source.to_string(), target.to_string());
    }

    if value.is_empty() || value == "*" || value == "latest" {
        return (key.to_string(), "*".to_string());
    }

    if looks_like_source(value) {
        return (value.to_string(), "*".to_string());
    }

    // Version, range, branch or tag: the key names the package.
    (key.to_string(), value.to_string())
}

fn looks_like_source(value: &str) -> bool {
    value.contains('/')
        || value.contains(':')
        || value.starts_with('.')
        || value.ends_with(".git")
}

/// Drop duplicate requests, keeping the last occurrence of each
/// `(name|source, target)` pair.
pub fn uniquify(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut seen = BTreeSet::new();
    let mut kept = Vec::new();

    for endpoint in endpoints.into_iter().rev() {
        let key = (
            endpoint
                .name
                .clone()
                .unwrap_or_else(|| endpoint.source.clone()),
            endpoint.target.clone(),
        );
        if seen.insert(key) {
            kept.push(endpoint);
        }
    }

    kept.reverse();
    kept
}

/// Arena owning every endpoint of a resolution run.
#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<Endpoint>,
}

impl Arena {
    pub fn alloc(&mut self, endpoint: Endpoint) -> EndpointId {
        let id = EndpointId(self.nodes.len());
        self.nodes.push(endpoint);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Union the dependants of `from` into `into`.
    pub fn merge_dependants(&mut self, from: EndpointId, into: EndpointId) {
        let moved: Vec<EndpointId> = self.nodes[from.0].dependants.iter().copied().collect();
        for dependant in moved {
            if dependant != into {
                self.nodes[into.0].dependants.insert(dependant);
            }
        }
    }
}

impl Index<EndpointId> for Arena {
    type Output = Endpoint;

    fn index(&self, id: EndpointId) -> &Endpoint {
        &self.nodes[id.0]
    }
}

impl IndexMut<EndpointId> for Arena {
    fn index_mut(&mut self, id: EndpointId) -> &mut Endpoint {
        &mut self.nodes[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rid_prefers_name_over_source() {
        let mut ep = Endpoint::new("git://host/org/repo.git", "^1.0.0", None);
        assert_eq!(ep.rid(), "git://host/org/repo");
        ep.rename("repo".to_string());
        assert_eq!(ep.rid(), "repo");
        assert_eq!(ep.old_name, None);
    }

    #[test]
    fn fid_separates_targets() {
        let a = Endpoint::new("repo", "^1.0.0", Some("a".into()));
        let b = Endpoint::new("repo", "^2.0.0", Some("a".into()));
        assert_ne!(a.fid(), b.fid());
        assert_eq!(a.rid(), b.rid());
    }

    #[test]
    fn rename_key_of_anonymous_endpoint_is_the_request() {
        let ep = Endpoint::new("repo", "v1", None);
        assert_eq!(ep.rename_key(), "repo/v1");
    }

    #[test]
    fn guesses_names_from_source_tails() {
        assert_eq!(guess_name("git://host/org/repo.git"), "repo");
        assert_eq!(guess_name("org/repo"), "repo");
        assert_eq!(guess_name("jquery"), "jquery");
    }

    #[test]
    fn decomposes_dependency_values() {
        assert_eq!(
            decompose("jquery", "^1.8.0"),
            ("jquery".into(), "^1.8.0".into())
        );
        assert_eq!(
            decompose("jquery", "org/jquery#2.0.0"),
            ("org/jquery".into(), "2.0.0".into())
        );
        assert_eq!(decompose("jquery", "*"), ("jquery".into(), "*".into()));
        assert_eq!(
            decompose("jquery", "org/jquery"),
            ("org/jquery".into(), "*".into())
        );
        assert_eq!(
            decompose("jquery", "master"),
            ("jquery".into(), "master".into())
        );
    }

    #[test]
    fn uniquify_keeps_last_occurrence() {
        let endpoints = vec![
            Endpoint::new("a", "1.0.0", Some("a".into())),
            Endpoint::new("b", "*", Some("b".into())),
            Endpoint::new("a", "1.0.0", Some("a".into())),
        ];
        let kept = uniquify(endpoints);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].source, "b");
        assert_eq!(kept[1].source, "a");
    }

    #[test]
    fn uniquify_is_idempotent() {
        let endpoints = vec![
            Endpoint::new("a", "1.0.0", Some("a".into())),
            Endpoint::new("a", "^1.0.0", Some("a".into())),
        ];
        let once = uniquify(endpoints);
        let twice = uniquify(once.clone());
        assert_eq!(once.len(), twice.len());
    }
}
