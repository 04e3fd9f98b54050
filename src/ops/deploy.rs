//! The deployment stage.
//!
//! Materializes elected revisions into the components directory. Existing
//! installs are purged and re-copied, except for entries matching the keep
//! patterns, which survive in place. An install with a pending
//! `.gitsu.json.new` takes the in-place fast path: only the metadata is
//! swapped.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use glob::Pattern;
use walkdir::WalkDir;

use crate::manifest::{self, PkgMeta};
use crate::ops::error::ManagerError;
use crate::ops::resolve::Manager;
use crate::repository::EndpointRef;
use crate::types::endpoint::EndpointId;

/// Lifecycle hook capability. The script runner lives in the embedding
/// application; the engine only signals the boundaries.
#[async_trait]
pub trait Hooks: Send + Sync {
    async fn preinstall(&self, packages: &[EndpointRef]) -> Result<()>;
    async fn postinstall(&self, packages: &[EndpointRef]) -> Result<()>;
}

/// Default hooks that do nothing.
#[derive(Debug, Default, Clone)]
pub struct NoopHooks;

#[async_trait]
impl Hooks for NoopHooks {
    async fn preinstall(&self, _packages: &[EndpointRef]) -> Result<()> {
        Ok(())
    }

    async fn postinstall(&self, _packages: &[EndpointRef]) -> Result<()> {
        Ok(())
    }
}

impl Manager {
    pub(crate) async fn deploy(
        &mut self,
        suitables: &BTreeMap<String, EndpointId>,
        dissected: &BTreeMap<String, EndpointId>,
    ) -> Result<(), ManagerError> {
        if !dissected.is_empty() {
            fs::create_dir_all(&self.config.components_dir)?;

            let planned: Vec<EndpointRef> = dissected
                .values()
                .map(|&id| self.arena[id].as_ref_triple())
                .collect();

            self.hooks
                .preinstall(&planned)
                .await
                .map_err(|e| ManagerError::Hook(format!("preinstall: {e:#}")))?;

            for (rid, &id) in dissected {
                self.deploy_one(rid, id, suitables)?;
            }

            self.hooks
                .postinstall(&planned)
                .await
                .map_err(|e| ManagerError::Hook(format!("postinstall: {e:#}")))?;
        }

        self.reconcile(suitables);
        Ok(())
    }

    fn deploy_one(
        &mut self,
        rid: &str,
        id: EndpointId,
        suitables: &BTreeMap<String, EndpointId>,
    ) -> Result<(), ManagerError> {
        let dst = self.config.components_dir.join(rid);
        let version = self.arena[id]
            .pkg_meta
            .as_ref()
            .and_then(|m| m.version.clone());
        self.reporter.installing(rid, version.as_deref());

        // In-place update fast path: the transport refreshed the install
        // tree already and left the new metadata beside it.
        let incoming = dst.join(manifest::INCOMING_MANIFEST);
        if incoming.exists() {
            fs::rename(&incoming, dst.join(manifest::INSTALLED_MANIFEST))?;
            self.annotate(&dst, id)?;
            self.reporter.done(rid, "updated in place");
            return Ok(());
        }

        let canonical = self.arena[id]
            .canonical_dir
            .clone()
            .ok_or_else(|| ManagerError::Other(format!("{} has no canonical dir", rid)))?;

        let keep = self.keep_patterns(rid, id, &dst, suitables);
        purge_deploy(&canonical, &dst, &keep)?;
        self.annotate(&dst, id)?;
        self.reporter.done(rid, "installed");
        Ok(())
    }

    /// Patterns that must survive this redeploy: the keep arrays of the
    /// existing install and of the incoming manifest, the custom manifest,
    /// and the first path segment of any elected component nested under
    /// this one.
    fn keep_patterns(
        &self,
        rid: &str,
        id: EndpointId,
        dst: &Path,
        suitables: &BTreeMap<String, EndpointId>,
    ) -> Vec<Pattern> {
        let mut raw: Vec<String> = Vec::new();

        if let Ok(Some(existing)) = PkgMeta::read_installed(dst) {
            raw.extend(existing.keep);
        }
        if let Some(meta) = &self.arena[id].pkg_meta {
            raw.extend(meta.keep.iter().cloned());
        }
        raw.push(manifest::CUSTOM_MANIFEST.to_string());

        let prefix = format!("{}/", rid);
        for other in suitables.keys() {
            if let Some(sub) = other.strip_prefix(&prefix) {
                if let Some(first) = sub.split('/').next() {
                    if !first.is_empty() {
                        raw.push(first.to_string());
                    }
                }
            }
        }

        raw.sort();
        raw.dedup();

        raw.iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    self.reporter
                        .warning(&format!("Ignoring invalid keep pattern {:?}: {}", p, err));
                    None
                }
            })
            .collect()
    }

    /// Rewrite the installed metadata with the requested target, the
    /// original source and the direct marker.
    fn annotate(&self, dst: &Path, id: EndpointId) -> Result<(), ManagerError> {
        let ep = &self.arena[id];
        let mut meta = match PkgMeta::read_installed(dst)? {
            Some(meta) => meta,
            None => ep.pkg_meta.clone().unwrap_or_default(),
        };

        meta.target = Some(ep.target.clone());
        meta.original_source = Some(ep.source.clone());
        if ep.newly {
            meta.direct = Some(true);
        }

        meta.save(&dst.join(manifest::INSTALLED_MANIFEST))?;
        Ok(())
    }

    /// Close the endpoint graph over the elected revisions: every
    /// dependency edge and dependant backlink of an elected endpoint points
    /// at the elected revision of that package.
    pub(crate) fn reconcile(&mut self, suitables: &BTreeMap<String, EndpointId>) {
        for &id in suitables.values() {
            let edges: Vec<(String, EndpointId)> = self.arena[id]
                .dependencies
                .iter()
                .map(|(k, &v)| (k.clone(), v))
                .collect();
            for (key, child) in edges {
                let child_rid = self.arena[child].rid();
                if let Some(&elected) = suitables.get(&child_rid) {
                    if elected != child {
                        self.arena[id].dependencies.insert(key, elected);
                        self.arena[elected].dependants.insert(id);
                    }
                }
            }

            let dependants: Vec<EndpointId> =
                self.arena[id].dependants.iter().copied().collect();
            let remapped: BTreeSet<EndpointId> = dependants
                .into_iter()
                .map(|d| {
                    let rid = self.arena[d].rid();
                    suitables.get(&rid).copied().unwrap_or(d)
                })
                .collect();
            self.arena[id].dependants = remapped;
        }
    }
}

/// Whether a relative path, or any of its ancestors, matches a keep
/// pattern.
fn kept(rel: &Path, keep: &[Pattern]) -> bool {
    rel.ancestors()
        .filter(|a| !a.as_os_str().is_empty())
        .any(|a| keep.iter().any(|p| p.matches_path(a)))
}

/// Remove everything under `dst` except kept entries, then copy `src` over
/// it without overwriting what was kept.
fn purge_deploy(src: &Path, dst: &Path, keep: &[Pattern]) -> Result<(), ManagerError> {
    let mut preexisting: BTreeSet<PathBuf> = BTreeSet::new();

    if dst.exists() {
        for entry in WalkDir::new(dst).min_depth(1).into_iter().flatten() {
            if let Ok(rel) = entry.path().strip_prefix(dst) {
                preexisting.insert(rel.to_path_buf());
            }
        }

        // Purge, children before parents so emptied directories go too.
        for entry in WalkDir::new(dst)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .flatten()
        {
            let Ok(rel) = entry.path().strip_prefix(dst) else {
                continue;
            };
            if kept(rel, keep) {
                continue;
            }
            if entry.file_type().is_dir() {
                // Fails while kept children remain, which is intended.
                let _ = fs::remove_dir(entry.path());
            } else {
                fs::remove_file(entry.path())?;
            }
        }
    } else {
        fs::create_dir_all(dst)?;
    }

    for entry in WalkDir::new(src).min_depth(1).into_iter().flatten() {
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        // Files that matched a keep pattern and were already present must
        // not be overwritten.
        if kept(rel, keep) && preexisting.contains(rel) {
            continue;
        }

        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}
