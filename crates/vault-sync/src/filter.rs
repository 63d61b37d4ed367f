//! Path scope of a syncer.
//!
//! Both the local listing and the remote listing pass through the same
//! `PathFilter`, so the registry never holds a path outside the syncer's scope.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory for engine-internal state (cache file). Never synced.
pub const SYNC_DIR: &str = ".sync";

/// Longest accepted vault-relative path.
pub const MAX_PATH_LEN: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("Empty path not allowed")]
    Empty,
    #[error("Path traversal not allowed")]
    Traversal,
    #[error("Empty path segment not allowed")]
    EmptySegment,
    #[error("Absolute path not allowed")]
    Absolute,
    #[error("Backslash in path not allowed")]
    Backslash,
    #[error("Control character in path not allowed")]
    ControlChar,
    #[error("Path too long")]
    TooLong,
}

/// Check that `path` is a well-formed vault-relative path.
pub fn check_path(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(PathError::Traversal);
    }
    if path.contains("//") || path.ends_with('/') {
        return Err(PathError::EmptySegment);
    }
    // Unix root or Windows drive letter
    if path.starts_with('/') || (path.len() >= 2 && path.as_bytes()[1] == b':') {
        return Err(PathError::Absolute);
    }
    if path.contains('\\') {
        return Err(PathError::Backslash);
    }
    if path.chars().any(|c| c.is_control()) {
        return Err(PathError::ControlChar);
    }
    if path.len() > MAX_PATH_LEN {
        return Err(PathError::TooLong);
    }
    Ok(())
}

/// Which vault paths a syncer is responsible for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathFilter {
    /// Folder prefixes to sync. Empty means the whole vault.
    pub include: Vec<String>,
    /// Folder prefixes (or exact paths) never synced.
    pub exclude: Vec<String>,
    /// File extensions to sync, without the dot. Empty means all.
    pub extensions: Vec<String>,
    /// Sync dot-files and dot-folders.
    pub include_hidden: bool,
    /// Engine-owned paths (the cache file).
    #[serde(skip)]
    internal: Vec<String>,
}

impl PathFilter {
    /// Filter that matches every well-formed, non-hidden path.
    pub fn all() -> Self {
        Self::default()
    }

    /// Also exclude `path`, which the engine writes itself.
    pub fn with_internal(mut self, path: &str) -> Self {
        self.internal.push(path.trim_matches('/').to_string());
        self
    }

    pub fn matches(&self, path: &str) -> bool {
        if check_path(path).is_err() {
            return false;
        }
        if under(path, SYNC_DIR) || self.internal.iter().any(|p| p == path) {
            return false;
        }
        if !self.include_hidden && path.split('/').any(|segment| segment.starts_with('.')) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|prefix| under(path, prefix)) {
            return false;
        }
        if self.exclude.iter().any(|prefix| under(path, prefix)) {
            return false;
        }
        if !self.extensions.is_empty() {
            let Some(ext) = extension(path) else {
                return false;
            };
            return self
                .extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext));
        }
        true
    }
}

/// True if `path` is `prefix` itself or lies inside folder `prefix`.
fn under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Extension of the final path segment, if any.
pub fn extension(path: &str) -> Option<&str> {
    let name = base_name(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => Some(ext),
        _ => None,
    }
}

/// Final path segment.
pub fn base_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}
