//! The dissect phase: elect one revision per logical package.
//!
//! Runs once all fetches have quiesced. Candidates are partitioned into
//! semver and non-semver sets, wildcards of newly added targets are
//! promoted to tilde ranges, and a single revision is elected per rid
//! through (in order): version intersection, a stored resolution, the
//! force-latest policy, or the interactive prompt.

use std::collections::BTreeMap;

use crate::manifest;
use crate::ops::error::{ManagerError, PickInfo};
use crate::ops::resolve::Manager;
use crate::resolver;
use crate::types::endpoint::EndpointId;

/// The elected revisions of a run: every logical package, and the subset
/// that actually needs deploying.
pub(crate) type Elected = (
    BTreeMap<String, EndpointId>,
    BTreeMap<String, EndpointId>,
);

impl Manager {
    pub(crate) async fn dissect(&mut self) -> Result<Elected, ManagerError> {
        let mut suitables = BTreeMap::new();

        let rids: Vec<String> = self.resolved.keys().cloned().collect();
        for rid in rids {
            // Entries kept under an old name only serve dependants that
            // still reference it; the renamed rid gets the election.
            if self.renamed.contains_key(&rid) {
                continue;
            }

            let candidates = self.resolved[&rid].clone();
            if candidates.is_empty() {
                continue;
            }

            let (mut semvers, non_semvers): (Vec<EndpointId>, Vec<EndpointId>) = candidates
                .iter()
                .copied()
                .partition(|&id| self.arena[id].semver_version().is_some());

            resolver::sort_semvers_desc(&self.arena, &mut semvers);
            self.promote_wildcards(&semvers);

            let elected = match resolver::elect_suitable(&self.arena, &semvers, &non_semvers) {
                Some(id) => id,
                None => {
                    let mut all = candidates;
                    self.resolve_conflict(&rid, &mut all).await?
                }
            };

            suitables.insert(rid, elected);
        }

        // Garbage-collect resolutions for packages that no longer
        // conflict.
        let conflicted = self.conflicted.clone();
        self.resolutions.retain(|rid, _| conflicted.contains(rid));

        let dissected = self.filter_for_deployment(&suitables);
        Ok((suitables, dissected))
    }

    /// Wildcard targets of newly added, targetable endpoints are promoted
    /// to a tilde range on the fetched version, so the choice is persisted
    /// as a real constraint.
    fn promote_wildcards(&mut self, semvers: &[EndpointId]) {
        for &id in semvers {
            let ep = &self.arena[id];
            if !(ep.newly && ep.target == "*" && !ep.untargetable) {
                continue;
            }
            if let Some(version) = ep.semver_version() {
                let ep = &mut self.arena[id];
                ep.original_target = Some("*".to_string());
                ep.target = format!("~{}", version);
            }
        }
    }

    /// Decide a conflicted package: stored resolution, force-latest,
    /// otherwise fail or prompt.
    async fn resolve_conflict(
        &mut self,
        rid: &str,
        candidates: &mut Vec<EndpointId>,
    ) -> Result<EndpointId, ManagerError> {
        self.conflicted.insert(rid.to_string());
        resolver::sort_conflict_picks(&self.arena, candidates);

        if let Some(pick) = self.apply_stored_resolution(rid, candidates) {
            return Ok(pick);
        }

        if self.config.force_latest {
            let pick = *candidates.last().expect("conflict with no candidates");
            tracing::debug!("Force-latest elected {} for {}", self.arena[pick].target, rid);
            self.store_resolution(rid, pick);
            return Ok(pick);
        }

        if !self.config.interactive || self.prompt.is_none() {
            return Err(ManagerError::Conflict {
                name: rid.to_string(),
                picks: self.pick_infos(candidates),
            });
        }

        self.prompt_for_pick(rid, candidates).await
    }

    /// Try to satisfy the conflict from a stored resolution. Ranges match
    /// against candidate versions (highest first), anything else against
    /// the exact target or release.
    fn apply_stored_resolution(
        &mut self,
        rid: &str,
        candidates: &[EndpointId],
    ) -> Option<EndpointId> {
        let resolution = self.resolutions.get(rid)?.clone();

        if candidates.iter().any(|&id| self.arena[id].unresolvable) {
            return None;
        }

        let by_range = resolver::resolution_range(&resolution).and_then(|req| {
            candidates.iter().rev().copied().find(|&id| {
                self.arena[id]
                    .semver_version()
                    .map(|v| req.matches(&v))
                    .unwrap_or(false)
            })
        });

        let pick = by_range.or_else(|| {
            candidates.iter().rev().copied().find(|&id| {
                let ep = &self.arena[id];
                ep.target == resolution
                    || ep
                        .pkg_meta
                        .as_ref()
                        .and_then(|m| m.release.as_deref())
                        .map(|r| r == resolution)
                        .unwrap_or(false)
            })
        });

        match pick {
            Some(id) => {
                tracing::debug!("Resolution {} elected {} for {}", resolution, self.arena[id].target, rid);
                Some(id)
            }
            None => {
                self.reporter.warning(&format!(
                    "Stored resolution {} for {} matches none of the candidates",
                    resolution, rid
                ));
                None
            }
        }
    }

    async fn prompt_for_pick(
        &mut self,
        rid: &str,
        candidates: &[EndpointId],
    ) -> Result<EndpointId, ManagerError> {
        let prompt = self.prompt.as_ref().expect("interactive run has a prompt").clone();
        let question = self.conflict_question(rid, candidates);

        loop {
            let answer = prompt
                .ask(&question)
                .await
                .map_err(|e| ManagerError::Prompt(format!("{e:#}")))?;
            let answer = answer.trim();

            let save = answer.starts_with('!') || answer.ends_with('!');
            let digits = answer.trim_matches('!').trim();

            match digits.parse::<usize>() {
                Ok(n) if (1..=candidates.len()).contains(&n) => {
                    let pick = candidates[n - 1];
                    if save {
                        self.store_resolution(rid, pick);
                    }
                    return Ok(pick);
                }
                _ => {
                    self.reporter.warning(&format!(
                        "Invalid choice {:?}, expected 1-{}",
                        answer,
                        candidates.len()
                    ));
                }
            }
        }
    }

    fn conflict_question(&self, rid: &str, candidates: &[EndpointId]) -> String {
        let mut question = format!(
            "Unable to find a suitable version for {}, please choose one by typing its index (append ! to persist):\n",
            rid
        );
        for (i, &id) in candidates.iter().enumerate() {
            let ep = &self.arena[id];
            let version = ep
                .pkg_meta
                .as_ref()
                .and_then(|m| m.version.as_deref())
                .unwrap_or("unversioned");
            let dependants = self.dependant_names(id).join(", ");
            question.push_str(&format!(
                "  {}) {}#{} ({}) needed by {}\n",
                i + 1,
                rid,
                ep.target,
                version,
                if dependants.is_empty() { "you".to_string() } else { dependants }
            ));
        }
        question
    }

    /// Persist the pick as this package's resolution. Wildcard picks store
    /// the concrete release instead, so the choice stays meaningful.
    pub(crate) fn store_resolution(&mut self, rid: &str, pick: EndpointId) {
        let ep = &self.arena[pick];
        let value = if ep.target == "*" {
            ep.pkg_meta
                .as_ref()
                .and_then(|m| m.release.clone())
                .unwrap_or_else(|| "*".to_string())
        } else {
            ep.target.clone()
        };
        tracing::debug!("Storing resolution {} = {}", rid, value);
        self.resolutions.insert(rid.to_string(), value);
    }

    fn pick_infos(&self, candidates: &[EndpointId]) -> Vec<PickInfo> {
        candidates
            .iter()
            .map(|&id| {
                let ep = &self.arena[id];
                PickInfo {
                    endpoint: ep.as_ref_triple(),
                    version: ep.pkg_meta.as_ref().and_then(|m| m.version.clone()),
                    dependants: self.dependant_names(id),
                }
            })
            .collect()
    }

    fn dependant_names(&self, id: EndpointId) -> Vec<String> {
        self.arena[id]
            .dependants
            .iter()
            .map(|&d| self.arena[d].rid())
            .collect()
    }

    /// Reduce the elected set to the endpoints that actually need
    /// deploying.
    fn filter_for_deployment(
        &self,
        suitables: &BTreeMap<String, EndpointId>,
    ) -> BTreeMap<String, EndpointId> {
        let mut dissected = BTreeMap::new();

        for (rid, &id) in suitables {
            let ep = &self.arena[id];
            if ep.linked {
                continue;
            }

            let dst = self.config.components_dir.join(rid);

            // Already deployed in place, with no pending in-place update.
            if ep.canonical_dir.as_deref() == Some(dst.as_path())
                && !dst.join(manifest::INCOMING_MANIFEST).exists()
            {
                continue;
            }

            // Installed metadata already matches this exact revision.
            if !self.config.force {
                if let Some(meta) = self.installed.get(rid) {
                    let release = ep.pkg_meta.as_ref().and_then(|m| m.release.clone());
                    if meta.target.as_deref() == Some(ep.target.as_str())
                        && meta.original_source.as_deref() == Some(ep.source.as_str())
                        && meta.release == release
                    {
                        continue;
                    }
                }
            }

            dissected.insert(rid.clone(), id);
        }

        dissected
    }
}
