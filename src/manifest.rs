//! Component manifest (`gitsu.json` / `.gitsu.json`) handling.
//!
//! A component ships a `gitsu.json` at its root; the deployer writes an
//! annotated copy as `.gitsu.json` next to the deployed files. Unknown
//! fields are preserved round-trip so user manifests are never stripped.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Manifest filename inside a fetched component.
pub const MANIFEST: &str = "gitsu.json";
/// Annotated manifest written next to a deployed component.
pub const INSTALLED_MANIFEST: &str = ".gitsu.json";
/// In-place update signal: swapped over `.gitsu.json` without a file copy.
pub const INCOMING_MANIFEST: &str = ".gitsu.json.new";
/// User override manifest, always preserved across redeploys.
pub const CUSTOM_MANIFEST: &str = "gitsu.custom.json";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Parsed manifest contents.
///
/// Underscore-prefixed fields are annotations the engine writes during
/// deployment; they never appear in a component's own `gitsu.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkgMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    #[serde(rename = "devDependencies", skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,

    /// Patterns the transport strips when materializing the component.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,

    /// Patterns that must survive redeployment.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keep: Vec<String>,

    #[serde(rename = "_source", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(rename = "_target", skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(rename = "_originalSource", skip_serializing_if = "Option::is_none")]
    pub original_source: Option<String>,

    /// Concrete release the transport materialized, e.g. a tag or commit.
    #[serde(rename = "_release", skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    #[serde(rename = "_resolution", skip_serializing_if = "Option::is_none")]
    pub resolution: Option<serde_json::Value>,

    /// Set when the component was requested directly by the user.
    #[serde(rename = "_direct", skip_serializing_if = "Option::is_none")]
    pub direct: Option<bool>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PkgMeta {
    /// Load a manifest from a file path.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load a component's own manifest (`gitsu.json`) from its directory.
    pub fn read_manifest(dir: &Path) -> Result<Option<Self>, ManifestError> {
        let path = dir.join(MANIFEST);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::load(&path)?))
    }

    /// Load the annotated manifest (`.gitsu.json`) of a deployed component.
    pub fn read_installed(dir: &Path) -> Result<Option<Self>, ManifestError> {
        let path = dir.join(INSTALLED_MANIFEST);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::load(&path)?))
    }

    /// Pretty-print the manifest to a file.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// The manifest version parsed as a semantic version, if it is one.
    pub fn semver_version(&self) -> Option<semver::Version> {
        self.version
            .as_deref()
            .and_then(|v| semver::Version::parse(v).ok())
    }
}

/// Scan a components directory, reading every `.gitsu.json` into an
/// installed-state table keyed by directory name.
///
/// Unreadable or unannotated entries are skipped; the engine treats them as
/// not installed.
pub fn scan_installed(components_dir: &Path) -> Result<BTreeMap<String, PkgMeta>, ManifestError> {
    let mut installed = BTreeMap::new();

    if !components_dir.exists() {
        return Ok(installed);
    }

    for entry in fs::read_dir(components_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        match PkgMeta::read_installed(&entry.path()) {
            Ok(Some(meta)) => {
                installed.insert(name, meta);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("Skipping unreadable component {}: {}", name, err);
            }
        }
    }

    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_manifest_with_annotations() {
        let json = r#"{
            "name": "backbone",
            "version": "1.2.0",
            "main": "backbone.js",
            "dependencies": { "underscore": "^1.8.0" },
            "keep": ["config/*.json"],
            "_target": "^1.0.0",
            "_release": "1.2.0"
        }"#;

        let meta: PkgMeta = serde_json::from_str(json).unwrap();
        assert_eq!(meta.name.as_deref(), Some("backbone"));
        assert_eq!(meta.dependencies["underscore"], "^1.8.0");
        assert_eq!(meta.keep, vec!["config/*.json"]);
        assert_eq!(meta.target.as_deref(), Some("^1.0.0"));
        assert_eq!(
            meta.semver_version(),
            Some(semver::Version::new(1, 2, 0))
        );
    }

    #[test]
    fn preserves_unknown_fields() {
        let json = r#"{ "name": "a", "homepage": "https://example.org" }"#;
        let meta: PkgMeta = serde_json::from_str(json).unwrap();
        let out = serde_json::to_string(&meta).unwrap();
        assert!(out.contains("homepage"));
        assert!(out.contains("example.org"));
    }

    #[test]
    fn scan_reads_annotated_components_only() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        fs::create_dir_all(&a).unwrap();
        let meta = PkgMeta {
            name: Some("a".into()),
            version: Some("1.0.0".into()),
            ..Default::default()
        };
        meta.save(&a.join(INSTALLED_MANIFEST)).unwrap();

        // A bare directory with no annotations does not count as installed.
        fs::create_dir_all(dir.path().join("b")).unwrap();

        let installed = scan_installed(dir.path()).unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed["a"].version.as_deref(), Some("1.0.0"));
    }
}
