//! Wall-clock `Clock` backed by tokio timers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use vault_sync::clock::{Clock, TimerCallback, TimerId};

/// Real time. Timers are tasks spawned on the runtime that created the clock.
pub struct TokioClock {
    runtime: Handle,
    timers: Arc<Mutex<HashMap<u64, AbortHandle>>>,
    next_id: AtomicU64,
}

impl TokioClock {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Clock on the current runtime. Returns `None` outside a runtime.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Timers scheduled and not yet fired or cleared.
    pub fn pending_timers(&self) -> usize {
        self.timers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn set_timeout(&self, callback: TimerCallback, delay_ms: u64) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);

        // Hold the lock across spawn so the task cannot remove its entry first
        let mut guard = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let fired = timers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id)
                .is_some();
            if fired {
                callback();
            }
        });
        guard.insert(id, task.abort_handle());
        TimerId(id)
    }

    fn clear_timeout(&self, id: TimerId) {
        let handle = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id.0);
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
