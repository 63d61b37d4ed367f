//! Progress reporting for sync cycles.
//!
//! `ProgressSink` is what the syncer reports to. Two implementations:
//! - `EventBus`: publishes `SyncEvent`s to subscribers (monitoring, logs)
//! - `NoopProgress`: discards everything

use crate::error::SyncerError;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Counters for one finished tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub tick: u64,
    /// Clock time the tick began, in milliseconds since Unix epoch
    pub started_at: u64,
    pub finished_at: u64,
    /// The remote store answered this tick (false means local-only)
    pub remote_available: bool,
    pub full_refresh: bool,
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted_remote: usize,
    pub deleted_local: usize,
    pub failed: usize,
    /// Actions left for later ticks by the per-tick cap
    pub deferred: usize,
}

impl CycleSummary {
    /// Number of transfers and deletions that succeeded.
    pub fn applied(&self) -> usize {
        self.uploaded + self.downloaded + self.deleted_remote + self.deleted_local
    }
}

/// Receiver of per-cycle progress.
pub trait ProgressSink: Send + Sync {
    /// A tick started.
    fn new_cycle(&self, tick: u64, timestamp: u64);

    /// An action on `path` is about to run.
    fn add_entry(&self, path: &str, action: &str);

    /// Fraction of the action on `path` done, from 0.0 to 1.0.
    fn set_entry_progress(&self, path: &str, fraction: f32);

    /// The tick finished.
    fn cycle_done(&self, summary: &CycleSummary);

    /// A non-fatal error happened during a tick.
    fn on_error(&self, error: &SyncerError);
}

/// Sink that ignores all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn new_cycle(&self, _tick: u64, _timestamp: u64) {}
    fn add_entry(&self, _path: &str, _action: &str) {}
    fn set_entry_progress(&self, _path: &str, _fraction: f32) {}
    fn cycle_done(&self, _summary: &CycleSummary) {}
    fn on_error(&self, _error: &SyncerError) {}
}

/// Sync events emitted during ticks for real-time monitoring.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A tick started.
    CycleStarted {
        tick: u64,
        /// Milliseconds since Unix epoch, by the syncer's clock.
        timestamp: u64,
    },
    /// An action was queued for a path.
    EntryAdded {
        path: String,
        /// Action name ("upload", "download", "delete-remote", "delete-local").
        action: String,
    },
    /// Progress on a queued action.
    EntryProgress { path: String, fraction: f32 },
    /// A tick finished.
    CycleDone { summary: CycleSummary },
    /// Non-fatal error.
    Error {
        /// Error kind (e.g., "transfer", "remote-unavailable").
        kind: String,
        message: String,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct EventSubscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing sync events to subscribers.
///
/// Thread-safe for use in multi-threaded Tokio runtime.
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(SyncEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `EventSubscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> EventSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        EventSubscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds the read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Clone the callback list so a callback may subscribe
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

impl ProgressSink for EventBus {
    fn new_cycle(&self, tick: u64, timestamp: u64) {
        self.emit(SyncEvent::CycleStarted { tick, timestamp });
    }

    fn add_entry(&self, path: &str, action: &str) {
        self.emit(SyncEvent::EntryAdded {
            path: path.to_string(),
            action: action.to_string(),
        });
    }

    fn set_entry_progress(&self, path: &str, fraction: f32) {
        self.emit(SyncEvent::EntryProgress {
            path: path.to_string(),
            fraction: fraction.clamp(0.0, 1.0),
        });
    }

    fn cycle_done(&self, summary: &CycleSummary) {
        self.emit(SyncEvent::CycleDone {
            summary: summary.clone(),
        });
    }

    fn on_error(&self, error: &SyncerError) {
        self.emit(SyncEvent::Error {
            kind: error.kind().as_str().to_string(),
            message: error.to_string(),
        });
    }
}
