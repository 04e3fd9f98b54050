//! Reporter and prompt traits for dependency injection.
//!
//! These traits allow core logic to report progress and ask questions
//! without being coupled to a specific TUI or GUI implementation.

use anyhow::Result;
use async_trait::async_trait;

pub trait Reporter: Send + Sync {
    /// A fetch has started for an endpoint.
    fn fetching(&self, name: &str, source: &str, target: &str);

    /// A fetch completed and the endpoint joined the resolved set.
    fn fetched(&self, name: &str, target: &str);

    /// A component is being deployed onto the components directory.
    fn installing(&self, name: &str, version: Option<&str>);

    /// A component finished deploying.
    fn done(&self, name: &str, detail: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn fetching(&self, name: &str, source: &str, target: &str) {
        (**self).fetching(name, source, target)
    }
    fn fetched(&self, name: &str, target: &str) {
        (**self).fetched(name, target)
    }
    fn installing(&self, name: &str, version: Option<&str>) {
        (**self).installing(name, version)
    }
    fn done(&self, name: &str, detail: &str) {
        (**self).done(name, detail)
    }
    fn info(&self, msg: &str) {
        (**self).info(msg)
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg)
    }
    fn error(&self, msg: &str) {
        (**self).error(msg)
    }
}

/// Interactive question capability for the conflict protocol.
///
/// Non-interactive runs never call this; the engine fails with a conflict
/// error instead.
#[async_trait]
pub trait Prompt: Send + Sync {
    /// Present a question (including the numbered picks) and return the raw
    /// reply, e.g. `"2"` or `"2!"`.
    async fn ask(&self, question: &str) -> Result<String>;
}

/// Reporter that forwards everything to `tracing`.
#[derive(Debug, Default, Clone)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn fetching(&self, name: &str, source: &str, target: &str) {
        tracing::debug!("Fetching {} from {}#{}", name, source, target);
    }
    fn fetched(&self, name: &str, target: &str) {
        tracing::debug!("Fetched {}#{}", name, target);
    }
    fn installing(&self, name: &str, version: Option<&str>) {
        tracing::debug!("Installing {} {}", name, version.unwrap_or(""));
    }
    fn done(&self, name: &str, detail: &str) {
        tracing::debug!("Done {} ({})", name, detail);
    }
    fn info(&self, msg: &str) {
        tracing::info!("{}", msg);
    }
    fn warning(&self, msg: &str) {
        tracing::warn!("{}", msg);
    }
    fn error(&self, msg: &str) {
        tracing::error!("{}", msg);
    }
}
