//! The fetch coordinator and orchestration state.
//!
//! [`Manager`] owns every table of a resolution run and drives the
//! *configure, resolve, dissect, install* sequence. Fetches run
//! concurrently on a [`JoinSet`]; their completions are applied one at a
//! time, so all table mutation is serialized without locks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::Config;
use crate::manifest::PkgMeta;
use crate::ops::deploy::{Hooks, NoopHooks};
use crate::ops::error::ManagerError;
use crate::ops::report::Report;
use crate::repository::{EndpointRef, Fetched, Resolver};
use crate::resolver::are_compatible;
use crate::types::endpoint::{self, Arena, Endpoint, EndpointId};
use crate::ui::{LogReporter, Prompt, Reporter};

/// Grace period granted to remaining fetches once one has failed.
const FAIL_FAST: Duration = Duration::from_secs(20);

/// A top-level requirement handed to [`Manager::configure`].
#[derive(Debug, Clone)]
pub struct Requested {
    pub source: String,
    pub target: String,
    pub name: Option<String>,
    /// Set for targets the user just added. Enables wildcard promotion and
    /// blocks stored-resolution application.
    pub newly: bool,
}

impl Requested {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            name: None,
            newly: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn newly(mut self, newly: bool) -> Self {
        self.newly = newly;
        self
    }
}

/// A recorded fetch failure, kept for diagnostics after the run rejects.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub endpoint: EndpointRef,
    pub message: String,
}

/// A parent whose dependency expansion is deferred until an in-flight
/// fetch it depends on has settled.
#[derive(Debug, Clone)]
struct PendingDep {
    parent: EndpointId,
    waiting_on: String,
}

/// Per-`resolve()` transient state: the in-flight fetch set and the
/// deferred-parent queue.
#[derive(Default)]
struct RunState {
    set: JoinSet<(String, anyhow::Result<Fetched>)>,
    /// Fetch id to the endpoints sharing that fetch.
    fetching: HashMap<String, Vec<EndpointId>>,
    pending: Vec<PendingDep>,
    /// Armed on the first failure; remaining fetches race it.
    deadline: Option<Instant>,
}

impl RunState {
    /// The fetch id of any in-flight fetch for the given logical package.
    fn in_flight_for_rid(&self, arena: &Arena, rid: &str) -> Option<String> {
        self.fetching.iter().find_map(|(fid, ids)| {
            if ids.iter().any(|&id| arena[id].rid() == rid) {
                Some(fid.clone())
            } else {
                None
            }
        })
    }
}

/// The resolution and installation engine.
pub struct Manager {
    pub(crate) config: Config,
    repository: Arc<dyn Resolver>,
    pub(crate) reporter: Arc<dyn Reporter>,
    pub(crate) prompt: Option<Arc<dyn Prompt>>,
    pub(crate) hooks: Arc<dyn Hooks>,

    pub(crate) arena: Arena,
    targets: Vec<EndpointId>,
    pub(crate) resolved: BTreeMap<String, Vec<EndpointId>>,
    pub(crate) installed: BTreeMap<String, PkgMeta>,
    incompatibles: BTreeMap<String, Vec<EndpointId>>,
    pub(crate) resolutions: BTreeMap<String, String>,
    pub(crate) renamed: BTreeMap<String, String>,
    pub(crate) conflicted: BTreeSet<String>,
    failed: BTreeMap<String, Vec<FetchFailure>>,
    first_error: Option<ManagerError>,
    working: bool,
}

impl Manager {
    pub fn new(config: Config, repository: Arc<dyn Resolver>) -> Self {
        Self {
            config,
            repository,
            reporter: Arc::new(LogReporter),
            prompt: None,
            hooks: Arc::new(NoopHooks),
            arena: Arena::default(),
            targets: Vec::new(),
            resolved: BTreeMap::new(),
            installed: BTreeMap::new(),
            incompatibles: BTreeMap::new(),
            resolutions: BTreeMap::new(),
            renamed: BTreeMap::new(),
            conflicted: BTreeSet::new(),
            failed: BTreeMap::new(),
            first_error: None,
            working: false,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Stored conflict choices, keyed by logical package. The embedding
    /// application persists this map between runs.
    pub fn resolutions(&self) -> &BTreeMap<String, String> {
        &self.resolutions
    }

    /// Renames observed during the last run (requested name to manifest
    /// name).
    pub fn renamed(&self) -> &BTreeMap<String, String> {
        &self.renamed
    }

    /// Failures recorded during the last run, keyed by logical package.
    pub fn failed(&self) -> &BTreeMap<String, Vec<FetchFailure>> {
        &self.failed
    }

    /// Seed a resolution run: top-level targets, previously installed
    /// state, endpoints recorded as incompatible by an earlier run, and
    /// persisted conflict resolutions.
    pub fn configure(
        &mut self,
        targets: Vec<Requested>,
        installed: BTreeMap<String, PkgMeta>,
        incompatibles: Vec<Requested>,
        resolutions: BTreeMap<String, String>,
    ) -> Result<(), ManagerError> {
        if self.working {
            return Err(ManagerError::Working);
        }

        self.arena = Arena::default();
        self.targets.clear();
        self.resolved.clear();
        self.incompatibles.clear();
        self.renamed.clear();
        self.conflicted.clear();
        self.failed.clear();
        self.resolutions = resolutions;

        let endpoints: Vec<Endpoint> = targets
            .into_iter()
            .map(|req| {
                let mut ep = Endpoint::new(req.source, req.target, req.name);
                ep.newly = req.newly;
                ep.unresolvable = req.newly;
                ep
            })
            .collect();
        for ep in endpoint::uniquify(endpoints) {
            let id = self.arena.alloc(ep);
            self.targets.push(id);
        }

        for req in incompatibles {
            let ep = Endpoint::new(req.source, req.target, req.name);
            let rid = ep.rid();
            let id = self.arena.alloc(ep);
            self.incompatibles.entry(rid).or_default().push(id);
        }

        // Installed components join the resolved table so dependency
        // expansion can reuse them without a fetch; the dissect filter
        // keeps them off the deployment set.
        self.installed = installed;
        for (name, meta) in self.installed.clone() {
            let source = meta
                .original_source
                .clone()
                .or_else(|| meta.source.clone())
                .unwrap_or_else(|| name.clone());
            let target = meta
                .target
                .clone()
                .or_else(|| meta.version.clone())
                .unwrap_or_else(|| "*".to_string());
            let mut ep = Endpoint::new(source, target, Some(name.clone()));
            ep.canonical_dir = Some(self.config.components_dir.join(&name));
            ep.pkg_meta = Some(meta);
            let id = self.arena.alloc(ep);
            self.resolved.insert(name, vec![id]);
        }

        Ok(())
    }

    /// Drive every target to a resolved or failed state, elect one revision
    /// per logical package and deploy the result.
    ///
    /// Fails with `EWORKING` when invoked while a previous call is still in
    /// progress.
    pub async fn resolve(&mut self) -> Result<Report, ManagerError> {
        if self.working {
            return Err(ManagerError::Working);
        }
        self.working = true;
        let result = self.run().await;
        self.working = false;
        result
    }

    async fn run(&mut self) -> Result<Report, ManagerError> {
        self.failed.clear();
        self.first_error = None;

        let mut rt = RunState::default();
        let targets = self.targets.clone();

        if targets.is_empty() {
            // Nothing to fetch; yield once so dissection never runs
            // reentrantly within the caller's frame.
            tokio::task::yield_now().await;
        } else {
            for id in targets {
                self.fetch(&mut rt, id);
            }
            self.drive(&mut rt).await?;
        }

        if let Some(err) = self.first_error.take() {
            return Err(err);
        }

        let (suitables, dissected) = self.dissect().await?;
        self.deploy(&suitables, &dissected).await?;
        Ok(self.report(&dissected))
    }

    /// Apply fetch completions one at a time until the pipeline is
    /// quiescent or the fail-fast deadline expires.
    async fn drive(&mut self, rt: &mut RunState) -> Result<(), ManagerError> {
        loop {
            if rt.set.is_empty() {
                break;
            }

            let next = match rt.deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, rt.set.join_next()).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            tracing::warn!(
                                "Fetch grace period expired with {} fetches in flight",
                                rt.set.len()
                            );
                            rt.set.abort_all();
                            break;
                        }
                    }
                }
                None => rt.set.join_next().await,
            };

            let Some(joined) = next else { break };
            match joined {
                Ok((fid, Ok(fetched))) => self.on_fetch_success(rt, &fid, fetched)?,
                Ok((fid, Err(err))) => self.on_fetch_error(rt, &fid, &err),
                Err(join_err) => {
                    if join_err.is_panic() && self.first_error.is_none() {
                        self.first_error =
                            Some(ManagerError::Other(format!("fetch task died: {join_err}")));
                    }
                }
            }
            self.drain_pending(rt)?;
        }

        Ok(())
    }

    /// Start (or share) the fetch for an endpoint. At most one fetch is in
    /// flight per fetch id.
    fn fetch(&mut self, rt: &mut RunState, id: EndpointId) {
        let fid = self.arena[id].fid();
        let sharers = rt.fetching.entry(fid.clone()).or_default();
        sharers.push(id);
        if sharers.len() > 1 {
            return;
        }

        let endpoint = self.arena[id].as_ref_triple();
        self.reporter.fetching(
            endpoint
                .name
                .clone()
                .unwrap_or_else(|| endpoint::guess_name(&endpoint.source))
                .as_str(),
            &endpoint.source,
            &endpoint.target,
        );

        let repository = self.repository.clone();
        rt.set.spawn(async move {
            let result = repository.fetch(&endpoint).await;
            (fid, result)
        });
    }

    fn on_fetch_success(
        &mut self,
        rt: &mut RunState,
        fid: &str,
        fetched: Fetched,
    ) -> Result<(), ManagerError> {
        let sharers = rt.fetching.remove(fid).unwrap_or_default();
        for id in sharers {
            self.apply_success(rt, id, fetched.clone())?;
        }
        Ok(())
    }

    /// Integrate one successful fetch: adopt the authoritative name,
    /// register the endpoint as resolved and expand its dependencies.
    fn apply_success(
        &mut self,
        rt: &mut RunState,
        id: EndpointId,
        fetched: Fetched,
    ) -> Result<(), ManagerError> {
        let requested_name = self.arena[id].name.clone();
        let old_rid = self.arena[id].rid();
        let rename_key = self.arena[id].rename_key();

        let pkg_name = fetched
            .pkg_meta
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| requested_name.clone())
            .unwrap_or_else(|| endpoint::guess_name(&self.arena[id].source));

        if fetched.pkg_meta.main.is_none() {
            self.reporter
                .warning(&format!("{} has no main entry in its manifest", pkg_name));
        }
        if fetched.pkg_meta.ignore.is_empty() {
            tracing::debug!("{} declares no ignore patterns", pkg_name);
        }

        self.arena[id].canonical_dir = Some(fetched.canonical_dir);
        self.arena[id].pkg_meta = Some(fetched.pkg_meta);
        self.arena[id].untargetable = !fetched.targetable;

        if requested_name.as_deref() != Some(pkg_name.as_str()) {
            if rename_key != pkg_name && !self.renamed.contains_key(&rename_key) {
                tracing::debug!("Package {} renamed to {}", rename_key, pkg_name);
                self.renamed.insert(rename_key.clone(), pkg_name.clone());
            }

            if old_rid != pkg_name {
                if !self.renamed.contains_key(&old_rid) {
                    self.renamed.insert(old_rid.clone(), pkg_name.clone());
                    self.move_component_dir(&old_rid, &pkg_name);
                }

                // A twin stays under the old rid so dependants that
                // referenced the old name still find the resolved revision.
                let mut twin = self.arena[id].clone();
                twin.dependants.clear();
                twin.dependencies.clear();
                let twin_id = self.arena.alloc(twin);
                self.resolved.entry(old_rid).or_default().push(twin_id);
            }

            self.arena[id].rename(pkg_name.clone());
        } else if requested_name.is_none() {
            self.arena[id].name = Some(pkg_name.clone());
        }

        let rid = self.arena[id].rid();
        self.insert_resolved(&rid, id);

        self.expand_dependencies(rt, id)?;

        // Endpoints a previous run recorded as incompatible with this
        // package must be fetched too, unless something already covers
        // them.
        if let Some(incompatibles) = self.incompatibles.remove(&rid) {
            for inc in incompatibles {
                let covered = self
                    .resolved
                    .get(&rid)
                    .map(|list| {
                        list.iter()
                            .any(|&e| self.arena[e].has_same_target(&self.arena[inc]))
                    })
                    .unwrap_or(false)
                    || rt.fetching.contains_key(&self.arena[inc].fid());
                if !covered {
                    self.fetch(rt, inc);
                }
            }
        }

        let target = self.arena[id].target.clone();
        self.reporter.fetched(&rid, &target);
        Ok(())
    }

    /// Insert a freshly resolved endpoint, replacing an exact
    /// `(source, target)` twin if one is present.
    fn insert_resolved(&mut self, rid: &str, id: EndpointId) {
        let source = self.arena[id].source.clone();
        let target = self.arena[id].target.clone();
        let twin = self.resolved.get(rid).and_then(|list| {
            list.iter()
                .copied()
                .find(|&e| e != id && self.arena[e].source == source && self.arena[e].target == target)
        });

        match twin {
            Some(existing) => {
                let list = self.resolved.get_mut(rid).expect("twin found in list");
                if let Some(pos) = list.iter().position(|&e| e == existing) {
                    list[pos] = id;
                }
                self.arena.merge_dependants(existing, id);
                let dependants: Vec<EndpointId> =
                    self.arena[existing].dependants.iter().copied().collect();
                for dependant in dependants {
                    let rewired: Vec<String> = self.arena[dependant]
                        .dependencies
                        .iter()
                        .filter(|(_, &child)| child == existing)
                        .map(|(key, _)| key.clone())
                        .collect();
                    for key in rewired {
                        self.arena[dependant].dependencies.insert(key, id);
                    }
                }
            }
            None => {
                let list = self.resolved.entry(rid.to_string()).or_default();
                if !list.contains(&id) {
                    list.push(id);
                }
            }
        }
    }

    fn on_fetch_error(&mut self, rt: &mut RunState, fid: &str, err: &anyhow::Error) {
        let sharers = rt.fetching.remove(fid).unwrap_or_default();
        let message = format!("{err:#}");

        for id in sharers {
            let rid = self.arena[id].rid();
            let endpoint = self.arena[id].as_ref_triple();
            self.reporter
                .error(&format!("Failed to fetch {}: {}", endpoint, message));
            self.failed.entry(rid).or_default().push(FetchFailure {
                endpoint: endpoint.clone(),
                message: message.clone(),
            });
            if self.first_error.is_none() {
                self.first_error = Some(ManagerError::Fetch {
                    endpoint,
                    message: message.clone(),
                });
            }
        }

        if rt.deadline.is_none() {
            rt.deadline = Some(Instant::now() + FAIL_FAST);
        }
    }

    /// Expand the dependency maps of a fetched endpoint.
    fn expand_dependencies(
        &mut self,
        rt: &mut RunState,
        parent: EndpointId,
    ) -> Result<(), ManagerError> {
        let Some(meta) = self.arena[parent].pkg_meta.clone() else {
            return Ok(());
        };

        self.parse_dependency_map(rt, parent, &meta.dependencies);
        if !self.config.production {
            self.parse_dependency_map(rt, parent, &meta.dev_dependencies);
        }
        Ok(())
    }

    /// Wire one dependency map into the endpoint graph, deduplicating
    /// against resolved and in-flight work. Safe to re-run: already wired
    /// keys are skipped.
    fn parse_dependency_map(
        &mut self,
        rt: &mut RunState,
        parent: EndpointId,
        map: &BTreeMap<String, String>,
    ) {
        for (key, value) in map {
            if self.arena[parent].dependencies.contains_key(key) {
                continue;
            }

            let (source, target) = endpoint::decompose(key, value);
            let name = self
                .renamed
                .get(key.as_str())
                .cloned()
                .unwrap_or_else(|| key.clone());
            let mut child = Endpoint::new(source, target, Some(name));
            child.unresolvable = self.arena[parent].unresolvable;
            let rid = child.rid();

            // Dedup against resolved packages.
            if let Some(list) = self.resolved.get(&rid) {
                if let Some(&existing) = list
                    .iter()
                    .find(|&&e| self.arena[e].has_same_target(&child))
                {
                    tracing::trace!("Reusing resolved {} for {}", rid, key);
                    self.arena[existing].dependants.insert(parent);
                    self.arena[parent].dependencies.insert(key.clone(), existing);
                    continue;
                }

                if let Some(&compatible) = list
                    .iter()
                    .find(|&&e| are_compatible(&child, &self.arena[e]))
                {
                    tracing::trace!("Sharing compatible {} for {}", rid, key);
                    child.canonical_dir = self.arena[compatible].canonical_dir.clone();
                    child.pkg_meta = self.arena[compatible].pkg_meta.clone();
                    child.dependencies = self.arena[compatible].dependencies.clone();
                    child.untargetable = self.arena[compatible].untargetable;
                    child.dependants.insert(parent);
                    let id = self.arena.alloc(child);
                    self.resolved.entry(rid).or_default().push(id);
                    self.arena[parent].dependencies.insert(key.clone(), id);
                    continue;
                }
            }

            // Dedup against in-flight fetches: wait for the fetch of this
            // package to settle, then re-parse with up-to-date state.
            let waiting_on = if rt.fetching.contains_key(&child.fid()) {
                Some(child.fid())
            } else {
                rt.in_flight_for_rid(&self.arena, &rid)
            };
            if let Some(fid) = waiting_on {
                tracing::trace!("Deferring {} of {:?} until {} settles", key, parent, fid);
                rt.pending.push(PendingDep {
                    parent,
                    waiting_on: fid,
                });
                continue;
            }

            child.dependants.insert(parent);
            let id = self.arena.alloc(child);
            self.arena[parent].dependencies.insert(key.clone(), id);
            self.fetch(rt, id);
        }
    }

    /// Re-parse the dependencies of every parent whose awaited fetches
    /// have all settled.
    fn drain_pending(&mut self, rt: &mut RunState) -> Result<(), ManagerError> {
        loop {
            let parents: BTreeSet<EndpointId> =
                rt.pending.iter().map(|p| p.parent).collect();
            let ready: Vec<EndpointId> = parents
                .into_iter()
                .filter(|&parent| {
                    rt.pending
                        .iter()
                        .filter(|p| p.parent == parent)
                        .all(|p| !rt.fetching.contains_key(&p.waiting_on))
                })
                .collect();

            if ready.is_empty() {
                return Ok(());
            }

            rt.pending.retain(|p| !ready.contains(&p.parent));
            for parent in ready {
                self.expand_dependencies(rt, parent)?;
            }
        }
    }

    /// Best-effort move of a deployed component when its package renamed,
    /// pruning empty directories left behind.
    fn move_component_dir(&self, old_rid: &str, new_name: &str) {
        let from = self.config.components_dir.join(old_rid);
        if !from.exists() {
            return;
        }
        let to = self.config.components_dir.join(new_name);
        if let Some(parent) = to.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(err) = std::fs::rename(&from, &to) {
            tracing::warn!(
                "Could not move {} to {}: {}",
                from.display(),
                to.display(),
                err
            );
            return;
        }
        self.prune_empty_dirs(from.parent());
    }

    fn prune_empty_dirs(&self, mut dir: Option<&Path>) {
        while let Some(d) = dir {
            if d == self.config.components_dir || std::fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniquified_targets_collapse_duplicates() {
        let config = Config::default();
        let repository: Arc<dyn Resolver> = Arc::new(NeverResolver);
        let mut manager = Manager::new(config, repository);
        manager
            .configure(
                vec![
                    Requested::new("a", "1.0.0").named("a"),
                    Requested::new("a", "1.0.0").named("a"),
                    Requested::new("b", "*").named("b"),
                ],
                BTreeMap::new(),
                Vec::new(),
                BTreeMap::new(),
            )
            .unwrap();
        assert_eq!(manager.targets.len(), 2);
    }

    #[test]
    fn newly_targets_are_unresolvable() {
        let mut manager = Manager::new(Config::default(), Arc::new(NeverResolver));
        manager
            .configure(
                vec![Requested::new("a", "*").named("a").newly(true)],
                BTreeMap::new(),
                Vec::new(),
                BTreeMap::new(),
            )
            .unwrap();
        let id = manager.targets[0];
        assert!(manager.arena[id].newly);
        assert!(manager.arena[id].unresolvable);
    }

    #[test]
    fn installed_state_seeds_resolved_table() {
        let mut manager = Manager::new(Config::default(), Arc::new(NeverResolver));
        let meta = PkgMeta {
            name: Some("a".into()),
            version: Some("1.2.3".into()),
            target: Some("^1.0.0".into()),
            original_source: Some("org/a".into()),
            ..Default::default()
        };
        manager
            .configure(
                Vec::new(),
                [("a".to_string(), meta)].into_iter().collect(),
                Vec::new(),
                BTreeMap::new(),
            )
            .unwrap();
        let list = &manager.resolved["a"];
        assert_eq!(list.len(), 1);
        let ep = &manager.arena[list[0]];
        assert_eq!(ep.source, "org/a");
        assert_eq!(ep.target, "^1.0.0");
        assert!(ep.canonical_dir.as_ref().unwrap().ends_with("a"));
    }

    struct NeverResolver;

    #[async_trait::async_trait]
    impl Resolver for NeverResolver {
        async fn fetch(&self, _endpoint: &EndpointRef) -> anyhow::Result<Fetched> {
            anyhow::bail!("no fetches expected in this test")
        }
    }
}
