//! Clock abstraction: the only time source the sync engine uses.
//!
//! Implementations:
//! - `SimulatedClock` - For tests; time moves only when `advance` is called
//! - `TokioClock` (in vault-syncd) - Wall clock with tokio timers

use futures::channel::oneshot;
use futures::future::{select, Either};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;
use thiserror::Error;

/// Callback invoked when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Handle for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Current time and schedulable timers.
///
/// All times are milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now(&self) -> u64;

    /// Run `callback` once after `delay_ms`.
    fn set_timeout(&self, callback: TimerCallback, delay_ms: u64) -> TimerId;

    /// Cancel a timer. Unknown or already-fired ids are ignored.
    fn clear_timeout(&self, id: TimerId);
}

#[derive(Debug, Error)]
#[error("Timed out after {0}ms")]
pub struct Elapsed(pub u64);

/// Race `fut` against a timer on `clock`.
pub async fn timeout<F: Future>(
    clock: &dyn Clock,
    delay_ms: u64,
    fut: F,
) -> Result<F::Output, Elapsed> {
    let (tx, rx) = oneshot::channel::<()>();
    let id = clock.set_timeout(
        Box::new(move || {
            let _ = tx.send(());
        }),
        delay_ms,
    );

    let fut = std::pin::pin!(fut);
    let result = match select(fut, rx).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(_) => Err(Elapsed(delay_ms)),
    };
    clock.clear_timeout(id);
    result
}

#[derive(Default)]
struct SimState {
    now: u64,
    next_id: u64,
    /// (due, id) -> callback; ordered so equal due times fire in schedule order
    timers: BTreeMap<(u64, u64), TimerCallback>,
    due_by_id: HashMap<u64, u64>,
}

/// Deterministic clock for tests and simulations.
///
/// Timers fire only inside `advance`, in due-time order, on the caller's thread.
#[derive(Default)]
pub struct SimulatedClock {
    state: Mutex<SimState>,
}

impl SimulatedClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            state: Mutex::new(SimState {
                now: start_ms,
                ..SimState::default()
            }),
        }
    }

    /// Move time forward by `ms`, firing every timer that comes due.
    ///
    /// Callbacks may schedule new timers; those fire too if they fall due
    /// before the target time.
    pub fn advance(&self, ms: u64) {
        let target = self.now() + ms;
        loop {
            let callback = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let Some((&(due, id), _)) = state.timers.iter().next() else {
                    state.now = target;
                    break;
                };
                if due > target {
                    state.now = target;
                    break;
                }
                state.now = state.now.max(due);
                state.due_by_id.remove(&id);
                state.timers.remove(&(due, id))
            };
            // Lock released: the callback may call back into the clock
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    /// Number of timers waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .timers
            .len()
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).now
    }

    fn set_timeout(&self, callback: TimerCallback, delay_ms: u64) -> TimerId {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.next_id;
        state.next_id += 1;
        let due = state.now + delay_ms;
        state.timers.insert((due, id), callback);
        state.due_by_id.insert(id, due);
        TimerId(id)
    }

    fn clear_timeout(&self, id: TimerId) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(due) = state.due_by_id.remove(&id.0) {
            state.timers.remove(&(due, id.0));
        }
    }
}
