//! Requested revision parsing.
//!
//! A target string is either an exact semantic version, a semver range
//! (including the `*` wildcard) or an opaque revision such as a branch or
//! tag name that only the transport can interpret.

use semver::{Version, VersionReq};

/// A parsed target string.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// An exact semantic version, e.g. `1.2.3`.
    Version(Version),
    /// A semver range, e.g. `^1.0.0`, `~1.2`, `*`.
    Range(VersionReq),
    /// A branch, tag or other transport-specific revision.
    Other(String),
}

impl Target {
    /// Parse a target string. Exact versions win over ranges, anything
    /// unparseable is an opaque revision.
    pub fn parse(s: &str) -> Target {
        let s = s.trim();
        if let Ok(v) = Version::parse(s) {
            return Target::Version(v);
        }
        if let Some(req) = parse_range(s) {
            return Target::Range(req);
        }
        Target::Other(s.to_string())
    }
}

/// Parse a range string, tolerating npm-style space-separated comparator
/// lists (`>=1 <3`) alongside the comma-separated form the semver crate
/// expects.
pub fn parse_range(s: &str) -> Option<VersionReq> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(req) = VersionReq::parse(s) {
        return Some(req);
    }
    if s.contains(' ') && !s.contains(',') {
        let joined = s.split_whitespace().collect::<Vec<_>>().join(", ");
        if let Ok(req) = VersionReq::parse(&joined) {
            return Some(req);
        }
    }
    None
}
