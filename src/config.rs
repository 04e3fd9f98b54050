//! Engine configuration.

use std::path::PathBuf;

/// Options recognized by the resolution and installation engine.
///
/// The embedding application is responsible for loading these from its own
/// configuration files; the engine only consumes the in-memory values.
#[derive(Debug, Clone)]
pub struct Config {
    /// Skip `devDependencies` expansion.
    pub production: bool,
    /// Redeploy even when the installed metadata matches the elected
    /// revision.
    pub force: bool,
    /// On conflict, automatically pick the highest candidate and persist the
    /// choice.
    pub force_latest: bool,
    /// Enable the interactive conflict prompt. Non-interactive runs fail
    /// with a conflict error instead of prompting.
    pub interactive: bool,
    /// Scratch directory available to external resolvers.
    pub tmp: PathBuf,
    /// Root directory components are deployed into.
    pub components_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            production: false,
            force: false,
            force_latest: false,
            interactive: false,
            tmp: crate::tmp_path(),
            components_dir: PathBuf::from("gitsu_components"),
        }
    }
}
