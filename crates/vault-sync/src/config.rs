//! Syncer configuration.

use crate::cache::DEFAULT_CACHE_PATH;
use crate::device_id::DeviceId;
use crate::diff::TombstonePolicy;
use crate::filter::{check_path, PathError, PathFilter};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    Missing(&'static str),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Invalid cache path: {0}")]
    CachePath(#[from] PathError),
}

/// Settings for one syncer.
///
/// Every field has a default except the identifiers, which `validate`
/// requires to be non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncerConfig {
    /// Stable id of this syncer configuration; stamped on documents and the cache
    pub syncer_config_id: String,
    pub vault_name: String,
    pub user_id: String,
    /// Generated at construction when absent
    pub device_id: Option<DeviceId>,
    /// Vault-relative location of the remote-half cache
    pub cache_path: String,
    pub tick_interval_ms: u64,
    /// Most actions applied in one tick; the rest wait for later ticks
    pub max_update_per_syncer: usize,
    pub remote_timeout_ms: u64,
    /// Larger files go to blob storage instead of inline in the document
    pub max_inline_bytes: u64,
    /// Force a full remote query every N ticks (0 = only when needed).
    /// Bounds how long a write with a lagging entry time can go unseen.
    pub full_refresh_every: u64,
    pub tombstone_policy: TombstonePolicy,
    pub filter: PathFilter,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            syncer_config_id: String::new(),
            vault_name: String::new(),
            user_id: String::new(),
            device_id: None,
            cache_path: DEFAULT_CACHE_PATH.to_string(),
            tick_interval_ms: 30_000,
            max_update_per_syncer: 50,
            remote_timeout_ms: 15_000,
            max_inline_bytes: 900_000,
            full_refresh_every: 20,
            tombstone_policy: TombstonePolicy::default(),
            filter: PathFilter::all(),
        }
    }
}

impl SyncerConfig {
    /// Config with the required identifiers set and defaults elsewhere.
    pub fn new(syncer_config_id: &str, vault_name: &str, user_id: &str) -> Self {
        Self {
            syncer_config_id: syncer_config_id.to_string(),
            vault_name: vault_name.to_string(),
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.syncer_config_id.trim().is_empty() {
            return Err(ConfigError::Missing("syncer_config_id"));
        }
        if self.vault_name.trim().is_empty() {
            return Err(ConfigError::Missing("vault_name"));
        }
        if self.vault_name.contains('/') {
            return Err(ConfigError::Invalid {
                field: "vault_name",
                reason: "must not contain '/'".into(),
            });
        }
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::Missing("user_id"));
        }
        check_path(&self.cache_path)?;
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_interval_ms",
                reason: "must be positive".into(),
            });
        }
        if self.max_update_per_syncer == 0 {
            return Err(ConfigError::Invalid {
                field: "max_update_per_syncer",
                reason: "must be at least 1".into(),
            });
        }
        if self.remote_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "remote_timeout_ms",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}
