//! FileNode: the merged per-path view of local and remote knowledge.

use crate::device_id::DeviceId;
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};

/// What a fresh local scan saw for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHalf {
    pub hash: ContentHash,
    pub size: u64,
    pub mtime: u64,
    pub ctime: u64,
}

/// Where a remote version's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "storageKind", content = "reference")]
pub enum StorageRef {
    /// Inline in the document; fetch the document to get them
    Raw,
    /// In blob storage under this reference
    ExternalRef(String),
}

/// What the remote store records for a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteHalf {
    pub hash: ContentHash,
    pub size: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub device_id: DeviceId,
    pub entry_time: u64,
    pub deleted: bool,
    pub storage: StorageRef,
}

/// Merged view of one vault path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub path: String,
    /// Present iff the file exists locally as of the last scan
    pub local: Option<LocalHalf>,
    pub remote: Option<RemoteHalf>,
    /// The remote half was loaded from the cache, not read live
    pub cache_origin: bool,
    /// Hash of the local file when a scan found it gone
    pub deleted_locally: Option<ContentHash>,
}

impl FileNode {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            local: None,
            remote: None,
            cache_origin: false,
            deleted_locally: None,
        }
    }

    /// Neither side has anything for this path.
    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.remote.is_none()
    }

    /// Remote tombstone with no local copy: nothing to do, kept so the
    /// deletion is not re-detected.
    pub fn is_settled_tombstone(&self) -> bool {
        self.local.is_none() && self.remote.as_ref().is_some_and(|r| r.deleted)
    }
}
