//! RemoteDocument: the per-file record kept in the remote document store.

use crate::device_id::DeviceId;
use crate::filter::{base_name, check_path, extension, PathError};
use crate::hash::ContentHash;
use crate::node::{RemoteHalf, StorageRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current document schema version.
pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Unsupported document version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid path {path:?}: {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: PathError,
    },

    #[error("Inline payload is {actual} bytes, document says {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Empty external reference")]
    EmptyReference,
}

/// File bytes stored with a document, or a pointer to where they live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "storageKind", content = "payload")]
pub enum DocumentContent {
    /// Bytes stored inline in the document
    Raw(Vec<u8>),
    /// Reference returned by `RemoteDocumentStore::put_blob`
    ExternalRef(String),
}

/// One file as recorded in the remote store.
///
/// Tombstones (`deleted == true`) keep the hash of the content that was
/// deleted and carry an empty inline payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub version: u32,
    pub path: String,
    pub c_time: u64,
    pub m_time: u64,
    pub size: u64,
    pub base_name: String,
    pub ext: String,
    pub user_id: String,
    pub deleted: bool,
    pub file_hash: ContentHash,
    pub vault_name: String,
    pub device_id: DeviceId,
    pub syncer_config_id: String,
    /// When this record was written, by the writer's clock
    pub entry_time: u64,
    pub content: DocumentContent,
}

/// Who is writing a document.
#[derive(Debug, Clone)]
pub struct Author<'a> {
    pub vault_name: &'a str,
    pub user_id: &'a str,
    pub device_id: DeviceId,
    pub syncer_config_id: &'a str,
}

/// Times and hash of the file a document describes.
#[derive(Debug, Clone)]
pub struct FileVersion {
    pub hash: ContentHash,
    pub size: u64,
    pub mtime: u64,
    pub ctime: u64,
}

/// Deterministic document ID for `path` in `vault_name`.
///
/// Every peer derives the same ID, so concurrent writers address the same
/// document instead of creating duplicates.
pub fn document_id(vault_name: &str, path: &str) -> String {
    ContentHash::of(format!("{}/{}", vault_name, path).as_bytes()).to_string()
}

impl RemoteDocument {
    /// Document for a live file.
    pub fn live(
        path: &str,
        version: FileVersion,
        content: DocumentContent,
        author: &Author<'_>,
        entry_time: u64,
    ) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            path: path.to_string(),
            c_time: version.ctime,
            m_time: version.mtime,
            size: version.size,
            base_name: base_name(path).to_string(),
            ext: extension(path).unwrap_or_default().to_string(),
            user_id: author.user_id.to_string(),
            deleted: false,
            file_hash: version.hash,
            vault_name: author.vault_name.to_string(),
            device_id: author.device_id,
            syncer_config_id: author.syncer_config_id.to_string(),
            entry_time,
            content,
        }
    }

    /// Tombstone recording that the file with `deleted_hash` was removed.
    pub fn tombstone(
        path: &str,
        deleted_hash: ContentHash,
        author: &Author<'_>,
        entry_time: u64,
    ) -> Self {
        let version = FileVersion {
            hash: deleted_hash,
            size: 0,
            mtime: entry_time,
            ctime: entry_time,
        };
        let mut doc = Self::live(path, version, DocumentContent::Raw(Vec::new()), author, entry_time);
        doc.deleted = true;
        doc
    }

    pub fn id(&self) -> String {
        document_id(&self.vault_name, &self.path)
    }

    /// Reject documents the engine cannot safely act on.
    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.version == 0 || self.version > DOCUMENT_VERSION {
            return Err(DocumentError::UnsupportedVersion(self.version));
        }
        check_path(&self.path).map_err(|source| DocumentError::InvalidPath {
            path: self.path.clone(),
            source,
        })?;
        if self.deleted {
            return Ok(());
        }
        match &self.content {
            DocumentContent::Raw(bytes) if bytes.len() as u64 != self.size => {
                Err(DocumentError::SizeMismatch {
                    expected: self.size,
                    actual: bytes.len() as u64,
                })
            }
            DocumentContent::ExternalRef(reference) if reference.is_empty() => {
                Err(DocumentError::EmptyReference)
            }
            _ => Ok(()),
        }
    }

    /// The registry's view of this document (payload bytes are not kept).
    pub fn to_remote_half(&self) -> RemoteHalf {
        let storage = match &self.content {
            DocumentContent::Raw(_) => StorageRef::Raw,
            DocumentContent::ExternalRef(reference) => StorageRef::ExternalRef(reference.clone()),
        };
        RemoteHalf {
            hash: self.file_hash.clone(),
            size: self.size,
            mtime: self.m_time,
            ctime: self.c_time,
            device_id: self.device_id,
            entry_time: self.entry_time,
            deleted: self.deleted,
            storage,
        }
    }
}
