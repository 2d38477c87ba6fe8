//! Root alias resolution.
//!
//! A request names a root alias (`bundle` or `default`) and a path relative
//! to it. The alias is turned into an absolute prefix on every call; nothing
//! is cached so a changed environment is picked up immediately.

use std::path::{Path, PathBuf};

use protocol::RootAlias;
use thiserror::Error;

/// Environment variable holding the home root.
pub const HOME_VAR: &str = "HOME";

/// Errors raised when a root alias has no underlying value.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The home directory variable is unset or empty.
    #[error("root '{alias}' is unavailable: environment variable {variable} is not set")]
    MissingHome {
        /// Alias that was requested.
        alias: RootAlias,
        /// Variable that was consulted.
        variable: &'static str,
    },

    /// The installation root could not be determined.
    #[error("root '{alias}' is unavailable: {reason}")]
    MissingBundle {
        /// Alias that was requested.
        alias: RootAlias,
        /// Why lookup failed.
        reason: String,
    },
}

/// Maps root aliases plus relative paths to absolute filesystem paths.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    /// Configured installation root; the executable's directory when `None`.
    bundle_root: Option<PathBuf>,
}

impl PathResolver {
    /// Create a resolver. `bundle_root` overrides installation root discovery.
    pub fn new(bundle_root: Option<PathBuf>) -> Self {
        Self { bundle_root }
    }

    /// Absolute prefix for an alias.
    pub fn root(&self, alias: RootAlias) -> Result<PathBuf, ResolveError> {
        match alias {
            RootAlias::Bundle => self.bundle_root(),
            RootAlias::Default => home_root(),
        }
    }

    /// Resolve `relative` against the prefix for `alias`.
    ///
    /// `..` segments are kept verbatim; callers are trusted.
    pub fn resolve(&self, alias: RootAlias, relative: &str) -> Result<PathBuf, ResolveError> {
        let prefix = self.root(alias)?;
        Ok(join_relative(&prefix, relative))
    }

    fn bundle_root(&self) -> Result<PathBuf, ResolveError> {
        if let Some(root) = &self.bundle_root {
            return Ok(root.clone());
        }

        let exe = std::env::current_exe().map_err(|e| ResolveError::MissingBundle {
            alias: RootAlias::Bundle,
            reason: format!("cannot locate executable: {}", e),
        })?;

        exe.parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ResolveError::MissingBundle {
                alias: RootAlias::Bundle,
                reason: format!("executable {} has no parent directory", exe.display()),
            })
    }
}

fn home_root() -> Result<PathBuf, ResolveError> {
    match std::env::var_os(HOME_VAR) {
        Some(home) if !home.is_empty() => Ok(PathBuf::from(home)),
        _ => Err(ResolveError::MissingHome {
            alias: RootAlias::Default,
            variable: HOME_VAR,
        }),
    }
}

/// Append a controller-supplied path to a prefix.
///
/// Leading separators are dropped so `/Documents` stays under the prefix
/// instead of replacing it.
pub fn join_relative(prefix: &Path, relative: &str) -> PathBuf {
    let trimmed = relative.trim_start_matches('/');
    if trimmed.is_empty() {
        prefix.to_path_buf()
    } else {
        prefix.join(trimmed)
    }
}
