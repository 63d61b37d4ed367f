//! Daemon settings file and per-vault device identity.
//!
//! Settings are YAML:
//!
//! ```yaml
//! vault_path: /home/me/notes
//! store_path: /mnt/share/vault-store
//! syncer:
//!   syncer_config_id: laptop
//!   vault_name: notes
//!   user_id: me
//!   tick_interval_ms: 10000
//!   filter:
//!     exclude: [archive]
//! ```
//!
//! The device id is kept in `.sync/device-id` inside the vault so a restarted
//! daemon keeps writing as the same device.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use vault_sync::{ConfigError, DeviceId, DeviceIdError, SyncerConfig};

const DEVICE_ID_FILE: &str = ".sync/device-id";

#[derive(Debug, Error)]
pub enum DaemonConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing setting: {0}")]
    Missing(&'static str),

    #[error(transparent)]
    Syncer(#[from] ConfigError),

    #[error("Invalid device id in {path:?}: {source}")]
    DeviceId {
        path: PathBuf,
        #[source]
        source: DeviceIdError,
    },

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DaemonConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Vault directory to keep in sync
    pub vault_path: Option<PathBuf>,
    /// Root of the folder document store
    pub store_path: Option<PathBuf>,
    pub syncer: SyncerConfig,
}

impl DaemonConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|source| DaemonConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn vault_path(&self) -> Result<&Path> {
        self.vault_path
            .as_deref()
            .ok_or(DaemonConfigError::Missing("vault_path"))
    }

    pub fn store_path(&self) -> Result<&Path> {
        self.store_path
            .as_deref()
            .ok_or(DaemonConfigError::Missing("store_path"))
    }

    /// Fill identifiers the settings file left empty, then validate.
    ///
    /// `vault_name` defaults to the vault directory name, `syncer_config_id`
    /// to "default" and `user_id` to "local".
    pub fn finalize(&mut self) -> Result<()> {
        let vault_dir_name = self
            .vault_path()?
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        self.store_path()?;

        let syncer = &mut self.syncer;
        if syncer.vault_name.is_empty() {
            syncer.vault_name = vault_dir_name.ok_or(DaemonConfigError::Missing("vault_name"))?;
        }
        if syncer.syncer_config_id.is_empty() {
            syncer.syncer_config_id = "default".to_string();
        }
        if syncer.user_id.is_empty() {
            syncer.user_id = "local".to_string();
        }
        syncer.validate()?;
        Ok(())
    }
}

/// Read the vault's device id, generating and saving one on first run.
pub fn load_or_create_device_id(vault_path: &Path) -> Result<DeviceId> {
    let path = vault_path.join(DEVICE_ID_FILE);

    match fs::read_to_string(&path) {
        Ok(contents) => {
            return contents
                .trim()
                .parse()
                .map_err(|source| DaemonConfigError::DeviceId { path, source });
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => return Err(DaemonConfigError::Read { path, source }),
    }

    let device_id = DeviceId::generate();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| DaemonConfigError::Write {
            path: path.clone(),
            source,
        })?;
    }
    fs::write(&path, format!("{}\n", device_id))
        .map_err(|source| DaemonConfigError::Write { path, source })?;
    info!("Generated device ID: {}", device_id);
    Ok(device_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_and_finalize() {
        let yaml = r#"
vault_path: /data/notes
store_path: /mnt/store
syncer:
  user_id: alice
  tick_interval_ms: 5000
"#;
        let mut config = DaemonConfig::from_yaml(yaml).unwrap();
        config.finalize().unwrap();

        assert_eq!(config.syncer.vault_name, "notes");
        assert_eq!(config.syncer.syncer_config_id, "default");
        assert_eq!(config.syncer.user_id, "alice");
        assert_eq!(config.syncer.tick_interval_ms, 5000);
        assert_eq!(config.store_path().unwrap(), Path::new("/mnt/store"));
    }

    #[test]
    fn test_missing_paths() {
        let mut config = DaemonConfig::default();
        assert!(matches!(
            config.finalize(),
            Err(DaemonConfigError::Missing("vault_path"))
        ));

        config.vault_path = Some(PathBuf::from("/data/notes"));
        assert!(matches!(
            config.finalize(),
            Err(DaemonConfigError::Missing("store_path"))
        ));
    }

    #[test]
    fn test_invalid_syncer_settings() {
        let yaml = r#"
vault_path: /data/notes
store_path: /mnt/store
syncer:
  max_update_per_syncer: 0
"#;
        let mut config = DaemonConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.finalize(), Err(DaemonConfigError::Syncer(_))));
    }

    #[test]
    fn test_device_id_is_persisted() {
        let dir = TempDir::new().unwrap();

        let first = load_or_create_device_id(dir.path()).unwrap();
        let second = load_or_create_device_id(dir.path()).unwrap();
        assert_eq!(first, second);

        fs::write(dir.path().join(DEVICE_ID_FILE), "not-hex").unwrap();
        assert!(matches!(
            load_or_create_device_id(dir.path()),
            Err(DaemonConfigError::DeviceId { .. })
        ));
    }
}
