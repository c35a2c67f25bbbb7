//! Injected delayed-callback clock.
//!
//! Dispatchers never reach for a process-wide timer; they take an `Arc<dyn Timer>` at
//! construction. [`TokioTimer`] is the production implementation and [`ManualTimer`] is a
//! deterministic clock driven by [`ManualTimer::advance`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Callback run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// One-shot delayed callback scheduler.
pub trait Timer: Send + Sync {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Cancellation flag for a scheduled callback. The callback fires at most once and never
/// after a successful [`TimerHandle::cancel`].
#[derive(Clone, Debug, Default)]
pub struct TimerHandle {
    state: Arc<AtomicU8>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disarms the timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }

    /// Claims the right to run the callback.
    fn try_fire(&self) -> bool {
        self.state
            .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Timer backed by `tokio::time::sleep` on the given runtime.
#[derive(Clone, Debug)]
pub struct TokioTimer {
    runtime: tokio::runtime::Handle,
}

impl TokioTimer {
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime }
    }

    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        let armed = handle.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if armed.try_fire() {
                callback();
            }
        });
        handle
    }
}

struct Pending {
    handle: TimerHandle,
    callback: TimerCallback,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    seq: u64,
    pending: BTreeMap<(Duration, u64), Pending>,
}

/// Deterministic timer for tests. Time only moves when [`ManualTimer::advance`] is called;
/// due callbacks then run on the advancing thread in deadline order.
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed since the timer was created.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of callbacks still armed.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .pending
            .values()
            .filter(|p| p.handle.is_armed())
            .count()
    }

    /// Moves the clock forward and fires every callback that became due.
    /// Returns how many callbacks actually ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().now + by;
        let mut fired = 0;
        loop {
            let due = {
                let mut state = self.state.lock();
                let key = match state.pending.keys().next() {
                    Some(key) if key.0 <= target => *key,
                    _ => break,
                };
                state.now = key.0;
                state.pending.remove(&key)
            };
            if let Some(pending) = due {
                if pending.handle.try_fire() {
                    (pending.callback)();
                    fired += 1;
                }
            }
        }
        self.state.lock().now = target;
        fired
    }
}

impl ManualState {
    /// Takes every cancelled entry out of the map.
    fn take_cancelled(&mut self) -> Vec<Pending> {
        let dead: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, p)| p.handle.is_cancelled())
            .map(|(key, _)| *key)
            .collect();
        dead.iter().filter_map(|key| self.pending.remove(key)).collect()
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        // Cancelled callbacks are dropped outside the lock.
        let _cancelled = {
            let mut state = self.state.lock();
            let cancelled = state.take_cancelled();
            let deadline = state.now + delay;
            let seq = state.seq;
            state.seq += 1;
            state.pending.insert(
                (deadline, seq),
                Pending {
                    handle: handle.clone(),
                    callback,
                },
            );
            cancelled
        };
        handle
    }
}
