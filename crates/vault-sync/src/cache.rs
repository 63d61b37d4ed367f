//! LocalMetadataCache: persists the remote half of the registry.
//!
//! Stored as one versioned JSON document inside the vault (by default
//! `.sync/remote-cache.json`). Only remote halves are cached; local state is
//! always rescanned. A missing or unreadable cache is a cache miss, never a
//! fatal error: the caller falls back to a full remote query.

use crate::filter::check_path;
use crate::fs::{FsError, LocalFileStore, WriteOptions};
use crate::node::RemoteHalf;
use crate::registry::RemoteSnapshot;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Cache file format version. Files with another version are discarded.
pub const CACHE_VERSION: u32 = 1;

/// Default cache location, relative to the vault root.
pub const DEFAULT_CACHE_PATH: &str = ".sync/remote-cache.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache file not found: {0}")]
    NotFound(String),

    #[error("Cache file corrupt: {0}")]
    Corrupt(String),

    #[error("Cache IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheFile<E> {
    version: u32,
    syncer_config_id: String,
    vault_name: String,
    saved_at: u64,
    entries: Vec<E>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedEntry {
    path: String,
    #[serde(flatten)]
    remote: RemoteHalf,
}

/// Result of a successful load.
#[derive(Debug, Default)]
pub struct CacheLoad {
    pub entries: RemoteSnapshot,
    /// Malformed entries that were dropped, with the reason
    pub skipped: Vec<String>,
    pub saved_at: u64,
}

impl CacheLoad {
    /// Latest entry time in the cache; remote refreshes can start here.
    pub fn max_entry_time(&self) -> Option<u64> {
        self.entries.values().map(|r| r.entry_time).max()
    }
}

/// Serialization of the remote-half cache for one syncer.
#[derive(Debug, Clone)]
pub struct LocalMetadataCache {
    path: String,
    syncer_config_id: String,
    vault_name: String,
}

impl LocalMetadataCache {
    pub fn new(path: &str, syncer_config_id: &str, vault_name: &str) -> Self {
        Self {
            path: path.to_string(),
            syncer_config_id: syncer_config_id.to_string(),
            vault_name: vault_name.to_string(),
        }
    }

    /// Read the cache.
    ///
    /// A file written for another syncer or vault, or with another format
    /// version, is reported as `Corrupt`.
    pub async fn load<L: LocalFileStore + ?Sized>(&self, fs: &L) -> Result<CacheLoad> {
        let bytes = match fs.read_binary(&self.path).await {
            Ok(bytes) => bytes,
            Err(FsError::NotFound(_)) => return Err(CacheError::NotFound(self.path.clone())),
            Err(e) => return Err(CacheError::Io(e.to_string())),
        };

        let file: CacheFile<serde_json::Value> =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt(e.to_string()))?;

        if file.version != CACHE_VERSION {
            return Err(CacheError::Corrupt(format!(
                "unsupported version {}",
                file.version
            )));
        }
        if file.syncer_config_id != self.syncer_config_id || file.vault_name != self.vault_name {
            return Err(CacheError::Corrupt(format!(
                "written for syncer {:?} of vault {:?}",
                file.syncer_config_id, file.vault_name
            )));
        }

        let mut load = CacheLoad {
            saved_at: file.saved_at,
            ..CacheLoad::default()
        };
        for value in file.entries {
            match serde_json::from_value::<CachedEntry>(value) {
                Ok(entry) => {
                    if let Err(e) = check_path(&entry.path) {
                        warn!("Skipping cache entry {:?}: {}", entry.path, e);
                        load.skipped.push(format!("{}: {}", entry.path, e));
                        continue;
                    }
                    load.entries.insert(entry.path, entry.remote);
                }
                Err(e) => {
                    warn!("Skipping malformed cache entry: {}", e);
                    load.skipped.push(e.to_string());
                }
            }
        }

        debug!(
            "Loaded {} cache entries from {} ({} skipped)",
            load.entries.len(),
            self.path,
            load.skipped.len()
        );
        Ok(load)
    }

    /// Write `snapshot` as the new cache contents.
    pub async fn save<L: LocalFileStore + ?Sized>(
        &self,
        fs: &L,
        snapshot: &RemoteSnapshot,
        saved_at: u64,
    ) -> Result<()> {
        let file = CacheFile {
            version: CACHE_VERSION,
            syncer_config_id: self.syncer_config_id.clone(),
            vault_name: self.vault_name.clone(),
            saved_at,
            entries: snapshot
                .iter()
                .map(|(path, remote)| CachedEntry {
                    path: path.clone(),
                    remote: remote.clone(),
                })
                .collect(),
        };
        let bytes =
            serde_json::to_vec_pretty(&file).map_err(|e| CacheError::Io(e.to_string()))?;
        fs.write_binary(&self.path, &bytes, WriteOptions::default())
            .await
            .map_err(|e| CacheError::Io(e.to_string()))?;
        debug!("Saved {} cache entries to {}", snapshot.len(), self.path);
        Ok(())
    }
}
