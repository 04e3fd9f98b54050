//! The result report returned by a resolution run.
//!
//! One entry per deployed component, with its dependency subtree expanded
//! recursively. The dependency graph can be cyclic, so expansion carries
//! the ancestor chain and skips children already on it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::manifest::PkgMeta;
use crate::ops::resolve::Manager;
use crate::repository::EndpointRef;
use crate::types::endpoint::{Arena, EndpointId};

/// Deployed component data, shaped for serialization.
#[derive(Debug, Clone, Serialize)]
pub struct PackageData {
    pub endpoint: EndpointRef,
    #[serde(rename = "canonicalDir", skip_serializing_if = "Option::is_none")]
    pub canonical_dir: Option<PathBuf>,
    #[serde(rename = "pkgMeta", skip_serializing_if = "Option::is_none")]
    pub pkg_meta: Option<PkgMeta>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, PackageData>,
    #[serde(rename = "nrDependants")]
    pub nr_dependants: usize,
}

/// Report of a completed run, keyed by logical package.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    #[serde(flatten)]
    pub packages: BTreeMap<String, PackageData>,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl Manager {
    pub(crate) fn report(&self, dissected: &BTreeMap<String, EndpointId>) -> Report {
        let mut packages = BTreeMap::new();
        for (rid, &id) in dissected {
            let mut ancestors = Vec::new();
            packages.insert(rid.clone(), to_data(&self.arena, id, &mut ancestors));
        }
        Report { packages }
    }
}

/// Expand one endpoint into report data, guarding against cycles via the
/// ancestor id chain.
pub fn to_data(arena: &Arena, id: EndpointId, ancestors: &mut Vec<String>) -> PackageData {
    let endpoint = &arena[id];
    ancestors.push(endpoint.id());

    let mut dependencies = BTreeMap::new();
    for (key, &child) in &endpoint.dependencies {
        if ancestors.contains(&arena[child].id()) {
            continue;
        }
        dependencies.insert(key.clone(), to_data(arena, child, ancestors));
    }

    ancestors.pop();

    PackageData {
        endpoint: endpoint.as_ref_triple(),
        canonical_dir: endpoint.canonical_dir.clone(),
        pkg_meta: endpoint.pkg_meta.clone(),
        dependencies,
        nr_dependants: endpoint.dependants.len(),
    }
}
