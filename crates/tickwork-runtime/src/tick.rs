//! Per-world cooperative executors.
//!
//! A [`TickScheduler`] runs each scheduled runnable exactly once, one at a time, on a
//! single logical thread. Delays are counted in ticks.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Work handed to a [`TickScheduler`].
pub type Runnable = Box<dyn FnOnce() + Send>;

/// Length of one tick for [`TokioTickScheduler`] unless configured otherwise.
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

pub trait TickScheduler: Send + Sync {
    fn schedule(&self, runnable: Runnable, delay_ticks: u64);
}

/// A place operations run against. Only its scheduler matters here.
pub trait World: Send + Sync {
    fn name(&self) -> String;
    fn scheduler(&self) -> Arc<dyn TickScheduler>;
}

/// A named world wrapping an existing scheduler.
#[derive(Clone)]
pub struct SimpleWorld {
    name: String,
    scheduler: Arc<dyn TickScheduler>,
}

impl SimpleWorld {
    pub fn new(name: impl Into<String>, scheduler: Arc<dyn TickScheduler>) -> Self {
        Self {
            name: name.into(),
            scheduler,
        }
    }
}

impl World for SimpleWorld {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn scheduler(&self) -> Arc<dyn TickScheduler> {
        Arc::clone(&self.scheduler)
    }
}

fn run_guarded(runnable: Runnable) {
    if catch_unwind(AssertUnwindSafe(runnable)).is_err() {
        tracing::error!("scheduled runnable panicked");
    }
}

#[derive(Default)]
struct ManualState {
    tick: u64,
    seq: u64,
    queue: BTreeMap<(u64, u64), Runnable>,
}

/// Tick scheduler advanced by hand. Work scheduled while a tick is running, even with zero
/// delay, waits for the next [`ManualTickScheduler::run_tick`].
#[derive(Default)]
pub struct ManualTickScheduler {
    state: Mutex<ManualState>,
}

impl ManualTickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_tick(&self) -> u64 {
        self.state.lock().tick
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Runs everything due at the current tick, then advances the tick counter.
    /// Returns how many runnables ran.
    pub fn run_tick(&self) -> usize {
        let due: Vec<Runnable> = {
            let mut state = self.state.lock();
            let now = state.tick;
            let later = state.queue.split_off(&(now + 1, 0));
            let due = std::mem::replace(&mut state.queue, later);
            due.into_values().collect()
        };
        let ran = due.len();
        for runnable in due {
            run_guarded(runnable);
        }
        self.state.lock().tick += 1;
        ran
    }

    /// Runs ticks until nothing is pending or `max_ticks` ticks have elapsed.
    /// Returns how many ticks ran.
    pub fn run_until_idle(&self, max_ticks: u64) -> u64 {
        let mut ticks = 0;
        while ticks < max_ticks && self.pending() > 0 {
            self.run_tick();
            ticks += 1;
        }
        ticks
    }
}

impl TickScheduler for ManualTickScheduler {
    fn schedule(&self, runnable: Runnable, delay_ticks: u64) {
        let mut state = self.state.lock();
        let due = state.tick + delay_ticks;
        let seq = state.seq;
        state.seq += 1;
        state.queue.insert((due, seq), runnable);
    }
}

/// Tick scheduler backed by one tokio task that runs runnables in arrival order.
#[derive(Clone)]
pub struct TokioTickScheduler {
    tx: mpsc::UnboundedSender<Runnable>,
    runtime: tokio::runtime::Handle,
    tick: Duration,
}

impl TokioTickScheduler {
    pub fn new(runtime: tokio::runtime::Handle, tick: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Runnable>();
        runtime.spawn(async move {
            while let Some(runnable) = rx.recv().await {
                run_guarded(runnable);
                tokio::task::yield_now().await;
            }
        });
        Self { tx, runtime, tick }
    }

    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current(), DEFAULT_TICK)
    }
}

impl TickScheduler for TokioTickScheduler {
    fn schedule(&self, runnable: Runnable, delay_ticks: u64) {
        if delay_ticks == 0 {
            if self.tx.send(runnable).is_err() {
                tracing::warn!("tick scheduler is gone; dropping runnable");
            }
            return;
        }
        let tx = self.tx.clone();
        let delay = self.tick.saturating_mul(delay_ticks.min(u32::MAX as u64) as u32);
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(runnable).is_err() {
                tracing::warn!("tick scheduler is gone; dropping delayed runnable");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Runnable {
        let log = log.clone();
        Box::new(move || log.lock().push(label))
    }

    #[test]
    fn manual_scheduler_honours_delays_and_order() {
        let scheduler = ManualTickScheduler::new();
        let log = recorder();
        scheduler.schedule(push(&log, "later"), 2);
        scheduler.schedule(push(&log, "first"), 0);
        scheduler.schedule(push(&log, "second"), 0);

        assert_eq!(scheduler.run_tick(), 2);
        assert_eq!(*log.lock(), vec!["first", "second"]);
        assert_eq!(scheduler.run_tick(), 0);
        assert_eq!(scheduler.run_tick(), 1);
        assert_eq!(*log.lock(), vec!["first", "second", "later"]);
        assert_eq!(scheduler.current_tick(), 3);
    }

    #[test]
    fn zero_delay_work_scheduled_during_a_tick_runs_next_tick() {
        let scheduler = Arc::new(ManualTickScheduler::new());
        let log = recorder();
        let inner_log = log.clone();
        let inner_scheduler = scheduler.clone();
        scheduler.schedule(
            Box::new(move || {
                inner_log.lock().push("outer");
                inner_scheduler.schedule(push(&inner_log, "inner"), 0);
            }),
            0,
        );

        assert_eq!(scheduler.run_tick(), 1);
        assert_eq!(*log.lock(), vec!["outer"]);
        assert_eq!(scheduler.run_until_idle(10), 1);
        assert_eq!(*log.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn panicking_runnable_does_not_stop_the_tick() {
        let scheduler = ManualTickScheduler::new();
        let log = recorder();
        scheduler.schedule(Box::new(|| panic!("bad runnable")), 0);
        scheduler.schedule(push(&log, "survivor"), 0);
        scheduler.run_tick();
        assert_eq!(*log.lock(), vec!["survivor"]);
    }

    #[tokio::test]
    async fn tokio_scheduler_runs_in_order() {
        let scheduler =
            TokioTickScheduler::new(tokio::runtime::Handle::current(), Duration::from_millis(1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..5 {
            let tx = tx.clone();
            scheduler.schedule(Box::new(move || tx.send(i).unwrap()), 0);
        }
        let tx_late = tx.clone();
        scheduler.schedule(Box::new(move || tx_late.send(99).unwrap()), 3);

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 99]);
    }
}
