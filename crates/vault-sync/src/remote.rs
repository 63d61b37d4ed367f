//! RemoteDocumentStore trait for the shared document store all peers use.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing (shared between syncers via `Arc`)
//! - `FolderStore` (in vault-syncd) - JSON documents in a shared directory

use crate::document::RemoteDocument;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Remote call timed out after {0}ms")]
    Timeout(u64),

    #[error("Not found in remote store: {0}")]
    NotFound(String),

    #[error("Remote store rejected request: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// The store could not be reached (as opposed to refusing one request).
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Which documents a query or subscription covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentQuery {
    pub vault_name: String,
    /// Only documents with `entry_time` strictly greater than this
    pub newer_than: Option<u64>,
}

impl DocumentQuery {
    pub fn all(vault_name: &str) -> Self {
        Self {
            vault_name: vault_name.to_string(),
            newer_than: None,
        }
    }

    pub fn newer_than(vault_name: &str, entry_time: u64) -> Self {
        Self {
            vault_name: vault_name.to_string(),
            newer_than: Some(entry_time),
        }
    }

    pub fn matches(&self, doc: &RemoteDocument) -> bool {
        doc.vault_name == self.vault_name
            && self.newer_than.is_none_or(|t| doc.entry_time > t)
    }
}

/// Callback for pushed document changes.
pub type ChangeCallback = Arc<dyn Fn(RemoteDocument) + Send + Sync>;

/// Live subscription handle. Unsubscribes when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving changes,
/// drop it (or call `unsubscribe`) to stop.
pub struct Subscription {
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Subscription that runs `release` when dropped.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_drop: Some(Box::new(release)),
        }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.on_drop.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.on_drop.is_some())
            .finish()
    }
}

/// Shared document store.
#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    /// All documents matching `query`.
    async fn query_all(&self, query: &DocumentQuery) -> Result<Vec<RemoteDocument>>;

    /// Push every future write matching `query` to `on_change`.
    fn subscribe(&self, query: DocumentQuery, on_change: ChangeCallback) -> Result<Subscription>;

    /// Create or replace the document `id`.
    async fn set_document(&self, id: &str, doc: &RemoteDocument) -> Result<()>;

    /// Fetch one document (with its inline payload).
    async fn get_document(&self, id: &str) -> Result<Option<RemoteDocument>>;

    /// Store file bytes too large to inline. Returns the reference to keep
    /// in the document.
    async fn put_blob(&self, key: &str, content: &[u8]) -> Result<String>;

    /// Fetch bytes stored by `put_blob`.
    async fn get_blob(&self, reference: &str) -> Result<Vec<u8>>;
}

// Implement RemoteDocumentStore for Arc<T> so several syncers can share one store
#[async_trait]
impl<T: RemoteDocumentStore + ?Sized> RemoteDocumentStore for Arc<T> {
    async fn query_all(&self, query: &DocumentQuery) -> Result<Vec<RemoteDocument>> {
        (**self).query_all(query).await
    }

    fn subscribe(&self, query: DocumentQuery, on_change: ChangeCallback) -> Result<Subscription> {
        (**self).subscribe(query, on_change)
    }

    async fn set_document(&self, id: &str, doc: &RemoteDocument) -> Result<()> {
        (**self).set_document(id, doc).await
    }

    async fn get_document(&self, id: &str) -> Result<Option<RemoteDocument>> {
        (**self).get_document(id).await
    }

    async fn put_blob(&self, key: &str, content: &[u8]) -> Result<String> {
        (**self).put_blob(key, content).await
    }

    async fn get_blob(&self, reference: &str) -> Result<Vec<u8>> {
        (**self).get_blob(reference).await
    }
}

/// Registered change listeners.
#[derive(Default)]
struct Subscribers {
    listeners: RwLock<Vec<(usize, DocumentQuery, ChangeCallback)>>,
    next_id: AtomicUsize,
}

impl Subscribers {
    fn add(self: &Arc<Self>, query: DocumentQuery, callback: ChangeCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, query, callback));
        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(subscribers) = weak.upgrade() {
                subscribers
                    .listeners
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .retain(|(i, _, _)| *i != id);
            }
        })
    }

    fn notify(&self, doc: &RemoteDocument) {
        // Clone matching callbacks first so a callback may subscribe
        let callbacks: Vec<ChangeCallback> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, query, _)| query.matches(doc))
            .map(|(_, _, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(doc.clone());
        }
    }

    fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// In-memory document store for testing.
///
/// Can be switched offline (every call fails with `Unavailable`) or stalled
/// (every call hangs until the caller's timeout fires).
#[derive(Default)]
pub struct InMemoryRemote {
    documents: RwLock<BTreeMap<String, RemoteDocument>>,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    subscribers: Arc<Subscribers>,
    offline: AtomicBool,
    stalled: AtomicBool,
    queries: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Number of `query_all` calls that reached the store.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of `set_document` calls that succeeded.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Document for `path` in `vault_name`, if any.
    pub fn document(&self, vault_name: &str, path: &str) -> Option<RemoteDocument> {
        let id = crate::document::document_id(vault_name, path);
        self.documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Store a document directly, as another peer would, without going
    /// through the offline/stall switches.
    pub fn insert(&self, doc: RemoteDocument) {
        self.documents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(doc.id(), doc.clone());
        self.subscribers.notify(&doc);
    }

    async fn gate(&self) -> Result<()> {
        if self.stalled.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDocumentStore for InMemoryRemote {
    async fn query_all(&self, query: &DocumentQuery) -> Result<Vec<RemoteDocument>> {
        self.gate().await?;
        self.queries.fetch_add(1, Ordering::SeqCst);
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        Ok(documents
            .values()
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect())
    }

    fn subscribe(&self, query: DocumentQuery, on_change: ChangeCallback) -> Result<Subscription> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("store is offline".into()));
        }
        Ok(self.subscribers.add(query, on_change))
    }

    async fn set_document(&self, id: &str, doc: &RemoteDocument) -> Result<()> {
        self.gate().await?;
        self.documents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), doc.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.subscribers.notify(doc);
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<RemoteDocument>> {
        self.gate().await?;
        Ok(self
            .documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn put_blob(&self, key: &str, content: &[u8]) -> Result<String> {
        self.gate().await?;
        let reference = format!("mem://{}", key);
        self.blobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(reference.clone(), content.to_vec());
        Ok(reference)
    }

    async fn get_blob(&self, reference: &str) -> Result<Vec<u8>> {
        self.gate().await?;
        self.blobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(reference)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(reference.to_string()))
    }
}
