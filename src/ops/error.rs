//! Domain-specific errors for the resolution engine.

use serde::Serialize;
use thiserror::Error;

use crate::manifest::ManifestError;
use crate::repository::EndpointRef;

/// One selectable candidate of an unresolved conflict, carried by
/// [`ManagerError::Conflict`] for diagnostic display.
#[derive(Debug, Clone, Serialize)]
pub struct PickInfo {
    pub endpoint: EndpointRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Names of the endpoints requiring this candidate.
    pub dependants: Vec<String>,
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("already working on a resolve")]
    Working,

    #[error("unable to find a suitable version for {name}")]
    Conflict { name: String, picks: Vec<PickInfo> },

    #[error("failed to fetch {endpoint}: {message}")]
    Fetch {
        endpoint: EndpointRef,
        message: String,
    },

    #[error("prompt failed: {0}")]
    Prompt(String),

    #[error("hook failed: {0}")]
    Hook(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("{0}")]
    Other(String),
}

impl ManagerError {
    /// Stable error code for callers that dispatch on it.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            ManagerError::Working => Some("EWORKING"),
            ManagerError::Conflict { .. } => Some("ECONFLICT"),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ManagerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}
