//! The transport contract consumed by the core.
//!
//! Concrete resolvers (git, filesystem, registry) live in the embedding
//! application. The core only asks them to materialize one revision of a
//! source into a canonical directory.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::manifest::PkgMeta;

/// Identifying snapshot of an endpoint, handed to transports and attached
/// to errors and reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: String,
    pub target: String,
}

impl std::fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}={}#{}", name, self.source, self.target),
            None => write!(f, "{}#{}", self.source, self.target),
        }
    }
}

/// Result of materializing one revision of a source.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Directory holding the materialized revision. Must outlive
    /// deployment; temporary directories are the transport's concern.
    pub canonical_dir: PathBuf,
    /// Manifest contents for the materialized revision.
    pub pkg_meta: PkgMeta,
    /// Whether the transport can select among revisions for this source.
    /// False for e.g. a plain filesystem link.
    pub targetable: bool,
}

/// A transport capable of materializing component revisions.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Materialize the revision requested by `endpoint`.
    async fn fetch(&self, endpoint: &EndpointRef) -> Result<Fetched>;

    /// List the known revisions of a source. Not used by the resolution
    /// algorithm itself; exposed for front-ends.
    async fn versions(&self, _source: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
