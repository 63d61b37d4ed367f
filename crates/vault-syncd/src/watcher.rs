//! File watcher with debouncing for vault changes.
//!
//! Local edits trigger an early tick instead of waiting for the interval.
//! Uses notify-debouncer-mini for efficient file change detection.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use vault_sync::{PathFilter, SyncerHandle};

/// File event from the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Path relative to vault root, `/`-separated
    pub path: String,
    pub kind: FileEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File was created or modified
    Modified,
    /// File was deleted
    Deleted,
}

/// Last seen mtime per path, to drop events that changed nothing
type MtimeCache = Arc<Mutex<HashMap<String, SystemTime>>>;

/// Watches the vault directory for changes to synced paths.
pub struct FileWatcher {
    vault_path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

impl FileWatcher {
    /// Watch `vault_path`, reporting only paths `filter` accepts.
    ///
    /// Uses a 200ms debounce period to avoid rapid-fire events during saves.
    pub fn new(vault_path: PathBuf, filter: PathFilter) -> Result<Self> {
        // On macOS /var/folders/... is really /private/var/folders/..., and
        // FSEvents reports the real path
        let vault_path = vault_path.canonicalize().unwrap_or(vault_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let root = vault_path.clone();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) =
                            Self::process_event(&event, &root, &filter, &mtime_cache)
                        {
                            if event_tx.send(file_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&vault_path, RecursiveMode::Recursive)?;

        Ok(Self {
            vault_path,
            _debouncer: debouncer,
            event_rx,
        })
    }

    fn process_event(
        event: &DebouncedEvent,
        vault_path: &Path,
        filter: &PathFilter,
        mtime_cache: &MtimeCache,
    ) -> Option<FileEvent> {
        let relative = event.path.strip_prefix(vault_path).ok()?;
        let segments: Option<Vec<&str>> = relative.iter().map(|s| s.to_str()).collect();
        let relative = segments?.join("/");

        if !filter.matches(&relative) {
            return None;
        }

        let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
        let kind = match std::fs::metadata(&event.path) {
            Ok(metadata) if metadata.is_dir() => return None,
            Ok(metadata) => {
                if let Ok(mtime) = metadata.modified() {
                    if cache.insert(relative.clone(), mtime) == Some(mtime) {
                        // Mtime unchanged - spurious event
                        return None;
                    }
                }
                FileEventKind::Modified
            }
            Err(_) => {
                cache.remove(&relative);
                FileEventKind::Deleted
            }
        };

        debug!("File event: {:?} - {}", kind, relative);
        Some(FileEvent {
            path: relative,
            kind,
        })
    }

    /// Get the receiver for file events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }

    /// Request a syncer tick for every event until the syncer is torn down.
    pub fn trigger_ticks(mut self, handle: SyncerHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = self.event_rx.recv().await {
                if handle.is_torn_down() {
                    break;
                }
                debug!("Local change at {}, requesting tick", event.path);
                handle.request_tick();
            }
        })
    }
}
