//! Shared test fixtures: an in-memory resolver and a scripted prompt.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use gitsu::manifest::{self, PkgMeta};
use gitsu::repository::{EndpointRef, Fetched, Resolver};
use gitsu::types::target::parse_range;
use gitsu::ui::Prompt;

/// One published revision of a mock source.
pub struct Release {
    pub version: String,
    pub meta: PkgMeta,
}

/// In-memory resolver: sources are published up front, fetches materialize
/// a directory containing the manifest and a main file.
pub struct MockResolver {
    releases: HashMap<String, Vec<Release>>,
    checkouts: TempDir,
    fetch_log: Mutex<Vec<String>>,
    counter: AtomicUsize,
    pub targetable: bool,
}

impl MockResolver {
    pub fn new() -> Self {
        Self {
            releases: HashMap::new(),
            checkouts: TempDir::new().expect("failed to create checkout dir"),
            fetch_log: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            targetable: true,
        }
    }

    /// Publish a revision with the given dependencies.
    pub fn publish(&mut self, source: &str, version: &str, deps: &[(&str, &str)]) {
        let meta = meta_with_deps(source, version, deps);
        self.publish_meta(source, version, meta);
    }

    pub fn publish_meta(&mut self, source: &str, version: &str, meta: PkgMeta) {
        self.releases
            .entry(source.to_string())
            .or_default()
            .push(Release {
                version: version.to_string(),
                meta,
            });
    }

    /// How many times a source has been fetched.
    pub fn fetch_count(&self, source: &str) -> usize {
        self.fetch_log
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.as_str() == source)
            .count()
    }

    fn select<'a>(&'a self, source: &str, target: &str) -> Result<&'a Release> {
        let releases = self
            .releases
            .get(source)
            .ok_or_else(|| anyhow!("unknown source {source}"))?;

        if target == "*" || target == "latest" {
            return releases
                .iter()
                .max_by_key(|r| semver::Version::parse(&r.version).ok())
                .ok_or_else(|| anyhow!("no releases for {source}"));
        }

        if let Ok(exact) = semver::Version::parse(target) {
            return releases
                .iter()
                .find(|r| semver::Version::parse(&r.version).ok() == Some(exact.clone()))
                .ok_or_else(|| anyhow!("version {target} not found for {source}"));
        }

        if let Some(req) = parse_range(target) {
            return releases
                .iter()
                .filter(|r| {
                    semver::Version::parse(&r.version)
                        .map(|v| req.matches(&v))
                        .unwrap_or(false)
                })
                .max_by_key(|r| semver::Version::parse(&r.version).ok())
                .ok_or_else(|| anyhow!("no release of {source} satisfies {target}"));
        }

        // Branch or tag: checkout whatever is current.
        releases
            .last()
            .ok_or_else(|| anyhow!("no releases for {source}"))
    }
}

#[async_trait]
impl Resolver for MockResolver {
    async fn fetch(&self, endpoint: &EndpointRef) -> Result<Fetched> {
        self.fetch_log.lock().unwrap().push(endpoint.source.clone());

        let release = self.select(&endpoint.source, &endpoint.target)?;
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let dir = self.checkouts.path().join(format!(
            "{}-{}-{}",
            endpoint.source.replace(['/', ':'], "-"),
            release.version,
            n
        ));
        fs::create_dir_all(&dir)?;
        release.meta.save(&dir.join(manifest::MANIFEST))?;

        let main = release
            .meta
            .name
            .clone()
            .unwrap_or_else(|| "index".to_string())
            .replace('/', "-");
        fs::write(dir.join(format!("{main}.js")), &release.version)?;

        Ok(Fetched {
            canonical_dir: dir,
            pkg_meta: release.meta.clone(),
            targetable: self.targetable,
        })
    }
}

/// Resolver that fails every fetch.
pub struct FailingResolver;

#[async_trait]
impl Resolver for FailingResolver {
    async fn fetch(&self, endpoint: &EndpointRef) -> Result<Fetched> {
        bail!("connection refused while fetching {endpoint}")
    }
}

/// Resolver whose fetches never complete.
pub struct StuckResolver;

#[async_trait]
impl Resolver for StuckResolver {
    async fn fetch(&self, _endpoint: &EndpointRef) -> Result<Fetched> {
        futures::future::pending().await
    }
}

/// Prompt answering from a fixed script.
pub struct ScriptedPrompt {
    answers: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new(answers: &[&str]) -> Self {
        let mut answers: Vec<String> = answers.iter().map(|s| s.to_string()).collect();
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
        }
    }
}

#[async_trait]
impl Prompt for ScriptedPrompt {
    async fn ask(&self, _question: &str) -> Result<String> {
        self.answers
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| anyhow!("prompt script exhausted"))
    }
}

/// A manifest with name, version, release, main and the given runtime
/// dependencies.
pub fn meta_with_deps(name: &str, version: &str, deps: &[(&str, &str)]) -> PkgMeta {
    PkgMeta {
        name: Some(name.to_string()),
        version: Some(version.to_string()),
        release: Some(version.to_string()),
        main: Some(serde_json::Value::String(format!("{name}.js"))),
        dependencies: deps
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..Default::default()
    }
}
