//! LocalFileStore trait abstraction for the local file tree.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in vault-syncd) - Uses tokio::fs
//!
//! Paths are vault-relative, `/`-separated, with no leading slash.

use crate::filter::PathFilter;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// One file from a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// Vault-relative path
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time in milliseconds since epoch
    pub mtime: u64,
    /// Creation time in milliseconds since epoch (falls back to mtime)
    pub ctime: u64,
}

/// File metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime: u64,
    pub ctime: u64,
}

/// Timestamps to stamp on a written file.
///
/// Downloads carry the remote document's times so both peers report the
/// same mtime for the same version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub mtime: Option<u64>,
    pub ctime: Option<u64>,
}

/// Access to the local file tree.
#[async_trait]
pub trait LocalFileStore: Send + Sync {
    /// List every file (recursively) whose path matches `filter`.
    async fn list(&self, filter: &PathFilter) -> Result<Vec<LocalEntry>>;

    /// Read file contents
    async fn read_binary(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents (creates parent directories if needed)
    async fn write_binary(&self, path: &str, content: &[u8], options: WriteOptions) -> Result<()>;

    /// Delete a file
    async fn delete(&self, path: &str) -> Result<()>;

    /// Get file metadata
    async fn stat(&self, path: &str) -> Result<FileStat>;
}

#[derive(Debug, Clone)]
struct MemFile {
    content: Vec<u8>,
    mtime: u64,
    ctime: u64,
}

/// In-memory file tree for testing.
///
/// Writes without explicit times are stamped with a logical counter that
/// increases on every write, so later writes always look newer.
pub struct InMemoryFs {
    files: RwLock<BTreeMap<String, MemFile>>,
    /// Logical time for writes without explicit timestamps
    tick: RwLock<u64>,
    /// Paths whose reads and writes fail (fault injection)
    failing: RwLock<Vec<String>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            tick: RwLock::new(1),
            failing: RwLock::new(Vec::new()),
        }
    }

    /// Set a specific mtime for testing "latest wins" scenarios
    pub fn set_mtime(&self, path: &str, mtime: u64) {
        let path = Self::normalize_path(path);
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = files.get_mut(&path) {
            file.mtime = mtime;
        }
    }

    /// Make every read and write of `path` fail with an IO error.
    pub fn fail_path(&self, path: &str) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Self::normalize_path(path));
    }

    /// Undo `fail_path` for every path.
    pub fn clear_failures(&self) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Synchronous read for assertions in tests.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let path = Self::normalize_path(path);
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&path)
            .map(|f| f.content.clone())
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn next_tick(&self) -> u64 {
        let mut tick = self.tick.write().unwrap_or_else(|e| e.into_inner());
        *tick += 1;
        *tick
    }

    fn check_failing(&self, path: &str) -> Result<()> {
        let failing = self.failing.read().unwrap_or_else(|e| e.into_inner());
        if failing.iter().any(|p| p == path) {
            return Err(FsError::Io(format!("injected failure: {}", path)));
        }
        Ok(())
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalFileStore for InMemoryFs {
    async fn list(&self, filter: &PathFilter) -> Result<Vec<LocalEntry>> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files
            .iter()
            .filter(|(path, _)| filter.matches(path))
            .map(|(path, file)| LocalEntry {
                path: path.clone(),
                size: file.content.len() as u64,
                mtime: file.mtime,
                ctime: file.ctime,
            })
            .collect())
    }

    async fn read_binary(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        self.check_failing(&path)?;
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&path)
            .map(|f| f.content.clone())
            .ok_or(FsError::NotFound(path))
    }

    async fn write_binary(&self, path: &str, content: &[u8], options: WriteOptions) -> Result<()> {
        let path = Self::normalize_path(path);
        self.check_failing(&path)?;
        let now = self.next_tick();
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        let ctime = options
            .ctime
            .or_else(|| files.get(&path).map(|f| f.ctime))
            .unwrap_or(now);
        files.insert(
            path,
            MemFile {
                content: content.to_vec(),
                mtime: options.mtime.unwrap_or(now),
                ctime,
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        self.check_failing(&path)?;
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        match files.remove(&path) {
            Some(_) => Ok(()),
            None => Err(FsError::NotFound(path)),
        }
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&path)
            .map(|f| FileStat {
                size: f.content.len() as u64,
                mtime: f.mtime,
                ctime: f.ctime,
            })
            .ok_or(FsError::NotFound(path))
    }
}

// Implement LocalFileStore for Arc<T> where T: LocalFileStore
// This allows sharing a file tree between a test and its syncer
#[async_trait]
impl<T: LocalFileStore + ?Sized> LocalFileStore for std::sync::Arc<T> {
    async fn list(&self, filter: &PathFilter) -> Result<Vec<LocalEntry>> {
        (**self).list(filter).await
    }

    async fn read_binary(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read_binary(path).await
    }

    async fn write_binary(&self, path: &str, content: &[u8], options: WriteOptions) -> Result<()> {
        (**self).write_binary(path, content, options).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        (**self).stat(path).await
    }
}
