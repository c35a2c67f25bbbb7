//! Quota-bounded FIFO dispatcher.
//!
//! Submissions land at the tail of an unbounded queue. Entries are promoted from the head
//! into the running set while it holds fewer than `quota` entries; every settlement frees a
//! slot and triggers another dispatch pass. An entry settled while still queued, by
//! cancellation for instance, leaves the queue at once. Dispatch may be entered concurrently
//! from submitters, quota changes, and completion callbacks; all of them serialize on one
//! mutex and never hold it while calling into a task.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::SupervisorConfig;
use crate::entry::{EntryOptions, ErasedEntry, TaskEntry};
use crate::error::{ConfigError, TaskError};
use crate::handle::TaskHandle;
use crate::state::{Monitored, TaskId, TaskSnapshot};
use crate::task::Task;

struct State {
    queue: VecDeque<Arc<dyn ErasedEntry>>,
    running: HashMap<TaskId, Arc<dyn ErasedEntry>>,
    monitored: HashMap<TaskId, Arc<dyn Monitored>>,
    quota: usize,
    shutdown: bool,
}

struct Inner {
    state: Mutex<State>,
}

/// Generic bounded-concurrency dispatcher. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(quota: usize) -> Result<Self, ConfigError> {
        if quota == 0 {
            return Err(ConfigError::InvalidQuota(quota));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    running: HashMap::new(),
                    monitored: HashMap::new(),
                    quota,
                    shutdown: false,
                }),
            }),
        })
    }

    pub fn from_config(config: &SupervisorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Self::new(config.quota)
    }

    /// Queues `task` and returns its handle without blocking.
    pub fn submit<V, T>(&self, task: T) -> TaskHandle<V>
    where
        V: Clone + Send + Sync + 'static,
        T: Task<V>,
    {
        self.submit_with(task, EntryOptions::default())
    }

    /// Like [`Supervisor::submit`], with a name, owner and lifecycle hooks attached.
    pub fn submit_with<V, T>(&self, task: T, options: EntryOptions) -> TaskHandle<V>
    where
        V: Clone + Send + Sync + 'static,
        T: Task<V>,
    {
        let entry = Arc::new(TaskEntry::new(task, options));
        let id = entry.id();
        let handle = entry.handle();
        {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                drop(state);
                tracing::warn!(task = %entry.id(), "rejecting task submitted after shutdown");
                handle.fail(TaskError::Rejected("supervisor is shut down".to_string()));
                return handle;
            }
            state.queue.push_back(entry);
        }
        let weak = Arc::downgrade(&self.inner);
        handle.on_settle(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.forget_queued(id);
            }
        });
        self.inner.dispatch();
        handle
    }

    pub fn quota(&self) -> usize {
        self.inner.state.lock().quota
    }

    /// Replaces the quota. Raising it promotes queued entries right away; lowering it only
    /// stops new promotions until the running set drains below the new ceiling.
    pub fn set_quota(&self, quota: usize) -> Result<(), ConfigError> {
        if quota == 0 {
            return Err(ConfigError::InvalidQuota(quota));
        }
        let previous = std::mem::replace(&mut self.inner.state.lock().quota, quota);
        tracing::info!(previous, quota, "supervisor quota changed");
        self.inner.dispatch();
        Ok(())
    }

    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn monitored_count(&self) -> usize {
        self.inner.state.lock().monitored.len()
    }

    /// Tracks a task that is scheduled elsewhere until `handle` settles. Monitored tasks
    /// show up in [`Supervisor::snapshot`] but never count against the quota.
    pub fn monitor<V>(&self, task: Arc<dyn Monitored>, handle: &TaskHandle<V>)
    where
        V: Send + Sync + 'static,
    {
        let id = task.id();
        self.inner.state.lock().monitored.insert(id, task);
        let weak = Arc::downgrade(&self.inner);
        handle.on_settle(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().monitored.remove(&id);
            }
        });
    }

    /// Queued entries first (in dispatch order), then running, then monitored tasks.
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let (queued, running, monitored) = {
            let state = self.inner.state.lock();
            (
                state.queue.iter().cloned().collect::<Vec<_>>(),
                state.running.values().cloned().collect::<Vec<_>>(),
                state.monitored.values().cloned().collect::<Vec<_>>(),
            )
        };
        queued
            .iter()
            .map(|e| e.snapshot(true))
            .chain(running.iter().map(|e| e.snapshot(false)))
            .chain(monitored.iter().map(|m| TaskSnapshot::of(m.as_ref())))
            .collect()
    }

    /// Stops accepting work and cancels everything still queued. Running entries drain
    /// normally. Returns how many queued entries were cancelled.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            state.queue.drain(..).collect()
        };
        let cancelled = drained.iter().filter(|e| e.cancel()).count();
        tracing::info!(cancelled, "supervisor shut down");
        cancelled
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }
}

impl Inner {
    fn dispatch(self: &Arc<Self>) {
        loop {
            let entry = {
                let mut state = self.state.lock();
                if state.running.len() >= state.quota {
                    return;
                }
                let Some(entry) = state.queue.pop_front() else {
                    return;
                };
                state.running.insert(entry.id(), Arc::clone(&entry));
                entry
            };

            let id = entry.id();
            tracing::debug!(task = %id, "promoting task");
            entry.start();

            if entry.is_settled() {
                self.release(id);
                continue;
            }
            let weak: Weak<Inner> = Arc::downgrade(self);
            entry.watch(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    if inner.release(id) {
                        inner.dispatch();
                    }
                }
            }));
        }
    }

    // Removed entries are dropped after the lock is released: dropping one may drop a task's
    // last handle, which settles it and re-enters the supervisor.
    fn release(&self, id: TaskId) -> bool {
        let released = self.state.lock().running.remove(&id);
        if released.is_some() {
            tracing::debug!(task = %id, "task released its slot");
        }
        released.is_some()
    }

    fn forget_queued(&self, id: TaskId) {
        let removed = {
            let mut state = self.state.lock();
            let position = state.queue.iter().position(|e| e.id() == id);
            position.and_then(|at| state.queue.remove(at))
        };
        if removed.is_some() {
            tracing::debug!(task = %id, "settled task left the queue");
        }
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Supervisor")
            .field("quota", &state.quota)
            .field("queued", &state.queue.len())
            .field("running", &state.running.len())
            .field("monitored", &state.monitored.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}
