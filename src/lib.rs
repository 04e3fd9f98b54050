//! gitsu - Component Package Manager Core
//!
//! The dependency resolution and installation engine behind gitsu: given a
//! set of top-level targets and the previously installed state, it fetches
//! every required component through a pluggable [`repository::Resolver`],
//! elects a single revision per logical package, resolves version conflicts
//! (interactively or via persisted resolutions) and deploys the elected
//! revisions onto a components directory while preserving user-kept files.
//!
//! Transports, the CLI front-end and the hook script runner are external
//! collaborators injected through the [`repository::Resolver`],
//! [`ui::Reporter`], [`ui::Prompt`] and [`ops::Hooks`] seams.

pub mod config;
pub mod manifest;
pub mod ops;
pub mod repository;
pub mod resolver;
pub mod types;
pub mod ui;

use std::path::PathBuf;

use dirs::home_dir;

pub use config::Config;
pub use manifest::PkgMeta;
pub use ops::{Manager, ManagerError, Requested};

/// Default gitsu home directory: ~/.gitsu
pub fn gitsu_home() -> PathBuf {
    home_dir()
        .expect("Could not determine home directory")
        .join(".gitsu")
}

/// Default scratch directory for temporary checkouts: ~/.gitsu/tmp
pub fn tmp_path() -> PathBuf {
    gitsu_home().join("tmp")
}
