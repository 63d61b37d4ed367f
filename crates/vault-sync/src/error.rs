//! Errors surfaced by the syncer.

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::fs::FsError;
use crate::remote::RemoteError;
use serde::Serialize;
use thiserror::Error;

/// Discriminant of a `SyncerError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Config,
    Init,
    Transfer,
    Cache,
    RemoteUnavailable,
    LocalUnavailable,
    CorruptData,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Init => "init",
            ErrorKind::Transfer => "transfer",
            ErrorKind::Cache => "cache",
            ErrorKind::RemoteUnavailable => "remote-unavailable",
            ErrorKind::LocalUnavailable => "local-unavailable",
            ErrorKind::CorruptData => "corrupt-data",
        }
    }
}

/// Which side of a transfer failed.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("local: {0}")]
    Local(#[from] FsError),

    #[error("remote: {0}")]
    Remote(#[from] RemoteError),

    #[error("local file changed while it was read")]
    ChangedDuringRead,
}

#[derive(Debug, Error)]
pub enum SyncerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Initialization failed: {0}")]
    Init(String),

    #[error("{action} of {path} failed: {source}")]
    Transfer {
        path: String,
        action: &'static str,
        #[source]
        source: TransferError,
    },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(#[source] RemoteError),

    #[error("Local file tree unavailable: {0}")]
    LocalUnavailable(#[source] FsError),

    #[error("Corrupt data for {path}: {reason}")]
    CorruptData { path: String, reason: String },
}

impl SyncerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncerError::Config(_) => ErrorKind::Config,
            SyncerError::Init(_) => ErrorKind::Init,
            SyncerError::Transfer { .. } => ErrorKind::Transfer,
            SyncerError::Cache(_) => ErrorKind::Cache,
            SyncerError::RemoteUnavailable(_) => ErrorKind::RemoteUnavailable,
            SyncerError::LocalUnavailable(_) => ErrorKind::LocalUnavailable,
            SyncerError::CorruptData { .. } => ErrorKind::CorruptData,
        }
    }

    /// Transfer failure for `action` on `path`.
    pub fn transfer(path: &str, action: &'static str, source: impl Into<TransferError>) -> Self {
        SyncerError::Transfer {
            path: path.to_string(),
            action,
            source: source.into(),
        }
    }

    pub fn corrupt(path: &str, reason: impl ToString) -> Self {
        SyncerError::CorruptData {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_message_and_kind() {
        let err = SyncerError::transfer("a.md", "upload", FsError::NotFound("a.md".into()));
        assert_eq!(err.kind(), ErrorKind::Transfer);
        assert_eq!(err.to_string(), "upload of a.md failed: local: File not found: a.md");

        let err = SyncerError::transfer(
            "b.md",
            "download",
            RemoteError::Timeout(15000),
        );
        assert_eq!(
            err.to_string(),
            "download of b.md failed: remote: Remote call timed out after 15000ms"
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::RemoteUnavailable.as_str(), "remote-unavailable");
        assert_eq!(
            serde_json::to_string(&ErrorKind::CorruptData).unwrap(),
            "\"corrupt-data\""
        );
    }
}
