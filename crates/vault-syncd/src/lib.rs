//! vault-syncd library: native collaborators for running a `FileSyncer`
//! against a vault on disk and a folder-backed document store.
//!
//! The binary is a thin layer over these; integration tests use them
//! directly.

pub mod clock;
pub mod config;
pub mod folder_store;
pub mod native_fs;
pub mod watcher;

pub use clock::TokioClock;
pub use config::{load_or_create_device_id, DaemonConfig, DaemonConfigError};
pub use folder_store::FolderStore;
pub use native_fs::NativeFs;
pub use watcher::{FileEvent, FileEventKind, FileWatcher};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vault_sync::{EventBus, EventSubscription, FileSyncer, ProgressSink, SyncContext, SyncEvent};

/// Syncer over the native collaborators.
pub type DaemonSyncer = FileSyncer<NativeFs, FolderStore>;

/// Build a syncer for a finalized config. Must run inside a tokio runtime.
pub fn build_syncer(config: &DaemonConfig, progress: Arc<dyn ProgressSink>) -> Result<DaemonSyncer> {
    let vault_path = config.vault_path()?.to_path_buf();
    let store_path = config.store_path()?.to_path_buf();

    let mut syncer_config = config.syncer.clone();
    if syncer_config.device_id.is_none() {
        syncer_config.device_id = Some(load_or_create_device_id(&vault_path)?);
    }

    let clock = TokioClock::current().context("no tokio runtime for the syncer clock")?;
    let ctx = SyncContext {
        local: NativeFs::new(vault_path),
        remote: FolderStore::new(store_path),
        clock: Arc::new(clock),
        progress,
    };
    Ok(FileSyncer::new(syncer_config, ctx)?)
}

/// Log every event on `bus`; with `json` also print each as a JSON line.
pub fn log_events(bus: &Arc<EventBus>, json: bool) -> EventSubscription {
    bus.subscribe(move |event| {
        if json {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        }
        match event {
            SyncEvent::CycleStarted { tick, .. } => debug!("Tick {} started", tick),
            SyncEvent::EntryAdded { path, action } => info!("{} {}", action, path),
            SyncEvent::EntryProgress { .. } => {}
            SyncEvent::CycleDone { summary } => {
                if summary.applied() > 0 || summary.failed > 0 {
                    info!(
                        "Tick {} done: {} up, {} down, {} deleted, {} failed, {} deferred",
                        summary.tick,
                        summary.uploaded,
                        summary.downloaded,
                        summary.deleted_remote + summary.deleted_local,
                        summary.failed,
                        summary.deferred
                    );
                } else {
                    debug!("Tick {} done, nothing to do", summary.tick);
                }
            }
            SyncEvent::Error { kind, message } => warn!("[{}] {}", kind, message),
        }
    })
}
