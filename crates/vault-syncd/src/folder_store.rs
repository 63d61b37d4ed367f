//! Remote document store kept in a shared directory.
//!
//! Layout under the store root:
//! - `documents/<id>.json` - one `RemoteDocument` per file
//! - `blobs/<key>` - payloads too large to inline
//!
//! The root is typically a network share or a folder replicated by another
//! tool. If the root directory is missing the store reports itself as
//! unavailable, so an unmounted share degrades ticks to local-only passes.

use async_trait::async_trait;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error, warn};
use vault_sync::filter::check_path;
use vault_sync::remote::{ChangeCallback, Result};
use vault_sync::{DocumentQuery, RemoteDocument, RemoteDocumentStore, RemoteError, Subscription};

const DOCUMENTS_DIR: &str = "documents";
const BLOBS_DIR: &str = "blobs";
/// Prefix of references returned by `put_blob`
const BLOB_REF_PREFIX: &str = "blobs/";

/// Debounce period for change pushes.
const DEBOUNCE: Duration = Duration::from_millis(200);

pub struct FolderStore {
    root: PathBuf,
}

fn io_err(context: &str, e: io::Error) -> RemoteError {
    RemoteError::Unavailable(format!("{}: {}", context, e))
}

/// Parse a document file. `None` for malformed or unreadable files.
fn parse_document(path: &Path, bytes: &[u8]) -> Option<RemoteDocument> {
    match serde_json::from_slice(bytes) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!("Skipping malformed document {:?}: {}", path, e);
            None
        }
    }
}

fn is_document_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.') && name.ends_with(".json")
}

impl FolderStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the store layout under `root` if missing.
    pub async fn create(root: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(root.join(DOCUMENTS_DIR)).await?;
        fs::create_dir_all(root.join(BLOBS_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn documents_dir(&self) -> PathBuf {
        self.root.join(DOCUMENTS_DIR)
    }

    fn document_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(RemoteError::Rejected(format!("invalid document id: {}", id)));
        }
        Ok(self.documents_dir().join(format!("{}.json", id)))
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        check_path(key).map_err(|e| RemoteError::Rejected(format!("blob key {}: {}", key, e)))?;
        let mut path = self.root.join(BLOBS_DIR);
        for segment in key.split('/') {
            path.push(segment);
        }
        Ok(path)
    }

    async fn ensure_available(&self) -> Result<()> {
        match fs::metadata(&self.root).await {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(RemoteError::Unavailable(format!(
                "{:?} is not a directory",
                self.root
            ))),
            Err(e) => Err(io_err(&format!("{:?}", self.root), e)),
        }
    }

    /// Write through a hidden temp file and rename into place.
    async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
        let context = format!("{:?}", path);
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Err(RemoteError::Rejected(context));
        };
        let tmp = path.with_file_name(format!(".{}.tmp", name));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(&context, e))?;
        }
        fs::write(&tmp, content)
            .await
            .map_err(|e| io_err(&context, e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| io_err(&context, e))
    }
}

#[async_trait]
impl RemoteDocumentStore for FolderStore {
    async fn query_all(&self, query: &DocumentQuery) -> Result<Vec<RemoteDocument>> {
        self.ensure_available().await?;

        let dir = self.documents_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(DOCUMENTS_DIR, e)),
        };

        let mut docs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_err(DOCUMENTS_DIR, e))?
        {
            let path = entry.path();
            if !is_document_file(&path) {
                continue;
            }
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                // Replaced or removed while listing
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(&format!("{:?}", path), e)),
            };
            if let Some(doc) = parse_document(&path, &bytes) {
                if query.matches(&doc) {
                    docs.push(doc);
                }
            }
        }

        debug!("Queried {} document(s) from {:?}", docs.len(), self.root);
        Ok(docs)
    }

    fn subscribe(&self, query: DocumentQuery, on_change: ChangeCallback) -> Result<Subscription> {
        let dir = self.documents_dir();
        if !self.root.is_dir() {
            return Err(RemoteError::Unavailable(format!("{:?} is missing", self.root)));
        }
        std::fs::create_dir_all(&dir).map_err(|e| io_err(DOCUMENTS_DIR, e))?;

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if !is_document_file(&event.path) {
                            continue;
                        }
                        // Deleted files carry no document to push
                        let Ok(bytes) = std::fs::read(&event.path) else {
                            continue;
                        };
                        if let Some(doc) = parse_document(&event.path, &bytes) {
                            if query.matches(&doc) {
                                on_change(doc);
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Document watcher error: {}", e);
                }
            },
        )
        .map_err(|e| RemoteError::Unavailable(format!("watcher: {}", e)))?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| RemoteError::Unavailable(format!("watch {:?}: {}", dir, e)))?;

        debug!("Watching {:?} for document changes", dir);
        Ok(Subscription::new(move || drop(debouncer)))
    }

    async fn set_document(&self, id: &str, doc: &RemoteDocument) -> Result<()> {
        self.ensure_available().await?;
        let path = self.document_path(id)?;
        let json = serde_json::to_vec_pretty(doc)
            .map_err(|e| RemoteError::Rejected(format!("{}: {}", id, e)))?;
        Self::write_atomic(&path, &json).await
    }

    async fn get_document(&self, id: &str) -> Result<Option<RemoteDocument>> {
        self.ensure_available().await?;
        let path = self.document_path(id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(id, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RemoteError::Rejected(format!("malformed document {}: {}", id, e)))
    }

    async fn put_blob(&self, key: &str, content: &[u8]) -> Result<String> {
        self.ensure_available().await?;
        let path = self.blob_path(key)?;
        Self::write_atomic(&path, content).await?;
        Ok(format!("{}{}", BLOB_REF_PREFIX, key))
    }

    async fn get_blob(&self, reference: &str) -> Result<Vec<u8>> {
        self.ensure_available().await?;
        let Some(key) = reference.strip_prefix(BLOB_REF_PREFIX) else {
            return Err(RemoteError::Rejected(format!("unknown blob reference: {}", reference)));
        };
        let path = self.blob_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(RemoteError::NotFound(reference.to_string()))
            }
            Err(e) => Err(io_err(reference, e)),
        }
    }
}
