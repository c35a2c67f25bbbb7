//! Admission control for operations.
//!
//! Operations wait in this scheduler's own FIFO queue and are promoted into a pool of at
//! most `pool_size` slots. A promoted operation holds its slot for exactly one slice: when
//! the slice yields, the task goes back to the tail of the queue and the freed slot is
//! handed to the next waiter, so long operations interleave round-robin. Every task is also
//! registered with a [`Supervisor`] for diagnostics only; that supervisor's quota never
//! gates anything here.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tickwork_kernel::{Actor, ConfigError, Monitored, OwnerRef, Supervisor, TaskError, TaskId};

use crate::config::OperationSchedulerConfig;
use crate::operation::OperationRef;
use crate::reporter::ErrorReporter;
use crate::task::{OperationHandle, OperationTask, SliceOutcome, TaskSettings};
use crate::tick::World;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The task is mid-slice, finished, or was never submitted here.
    #[error("operation {0} is not waiting in the queue")]
    NotQueued(TaskId),
    #[error(transparent)]
    Failed(#[from] TaskError),
}

struct State {
    queue: VecDeque<Arc<OperationTask>>,
    running: HashMap<TaskId, Arc<OperationTask>>,
    pool_size: usize,
    shutdown: bool,
}

struct Inner {
    state: Mutex<State>,
    slice_budget: Duration,
    notify_long: bool,
}

#[derive(Clone)]
pub struct SimpleOperationScheduler {
    inner: Arc<Inner>,
    supervisor: Supervisor,
}

impl SimpleOperationScheduler {
    pub fn new(
        supervisor: Supervisor,
        config: &OperationSchedulerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    running: HashMap::new(),
                    pool_size: config.pool_size,
                    shutdown: false,
                }),
                slice_budget: config.slice_budget(),
                notify_long: config.notify_long_operations,
            }),
            supervisor,
        })
    }

    /// Queues `operation` against `world`'s tick scheduler and returns immediately.
    pub fn submit(
        &self,
        operation: OperationRef,
        world: &dyn World,
        name: Option<&str>,
        owner: Option<&Arc<dyn Actor>>,
    ) -> OperationHandle {
        let owner = OwnerRef::from_option(owner);
        let task = OperationTask::new(
            operation,
            world.scheduler(),
            TaskSettings {
                name: name.map(str::to_owned),
                owner: owner.clone(),
                budget: self.inner.slice_budget,
                notify_long: self.inner.notify_long,
            },
        );
        let handle = OperationHandle::new(Arc::clone(&task));

        {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                drop(state);
                tracing::warn!(task = %task.id(), "rejecting operation submitted after shutdown");
                task.handle()
                    .fail(TaskError::Rejected("operation scheduler is shut down".to_string()));
                return handle;
            }
            state.queue.push_back(Arc::clone(&task));
        }
        ErrorReporter::new(owner).attach(task.handle());

        let monitored: Arc<dyn Monitored> = task.clone();
        self.supervisor.monitor(monitored, task.handle());

        let id = task.id();
        let weak = Arc::downgrade(&self.inner);
        task.handle().on_settle(move |_| {
            if let Some(inner) = weak.upgrade() {
                if inner.release(id) {
                    inner.promote();
                }
            }
        });

        tracing::debug!(task = %id, world = %world.name(), name = ?name, "operation queued");
        self.inner.promote();
        handle
    }

    pub fn pool_size(&self) -> usize {
        self.inner.state.lock().pool_size
    }

    pub fn set_pool_size(&self, pool_size: usize) -> Result<(), ConfigError> {
        if pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize(pool_size));
        }
        let previous = std::mem::replace(&mut self.inner.state.lock().pool_size, pool_size);
        tracing::info!(previous, pool_size, "operation pool size changed");
        self.inner.promote();
        Ok(())
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    /// The supervisor operations are reported to.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Takes a waiting operation out of the queue and runs the rest of it on the calling
    /// thread without a time budget.
    pub fn finish_now(&self, id: &TaskId) -> Result<OperationRef, SchedulerError> {
        let task = {
            let mut state = self.inner.state.lock();
            let position = state
                .queue
                .iter()
                .position(|t| t.id() == *id)
                .ok_or(SchedulerError::NotQueued(*id))?;
            state.queue.remove(position)
        };
        let Some(task) = task else {
            return Err(SchedulerError::NotQueued(*id));
        };
        tracing::debug!(task = %id, "finishing operation on the calling thread");
        Ok(task.run_to_completion()?)
    }

    /// Stops accepting operations and cancels those that never ran a slice. Operations
    /// that have already started keep slicing until they finish. Returns how many were
    /// cancelled.
    pub fn shutdown(&self) -> usize {
        let unstarted: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            let (unstarted, started): (VecDeque<_>, VecDeque<_>) =
                state.queue.drain(..).partition(|t| t.slices() == 0);
            state.queue = started;
            unstarted.into_iter().collect()
        };
        let cancelled = unstarted.iter().filter(|t| t.handle().cancel()).count();
        tracing::info!(cancelled, "operation scheduler shut down");
        cancelled
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }
}

impl Inner {
    fn promote(self: &Arc<Self>) {
        loop {
            let task = {
                let mut state = self.state.lock();
                let task = loop {
                    if state.running.len() >= state.pool_size {
                        return;
                    }
                    let Some(task) = state.queue.pop_front() else {
                        return;
                    };
                    if !task.is_done() {
                        break task;
                    }
                };
                state.running.insert(task.id(), Arc::clone(&task));
                task
            };

            tracing::debug!(task = %task.id(), slice = task.slices() + 1, "promoting operation");
            let weak: Weak<Inner> = Arc::downgrade(self);
            let on_slice = move |task: Arc<OperationTask>, outcome: SliceOutcome| {
                if let Some(inner) = weak.upgrade() {
                    inner.slice_done(task, outcome);
                }
            };
            task.submit_to_scheduler(Box::new(on_slice));
        }
    }

    fn slice_done(self: &Arc<Self>, task: Arc<OperationTask>, outcome: SliceOutcome) {
        {
            let mut state = self.state.lock();
            state.running.remove(&task.id());
            if outcome == SliceOutcome::Yielded && !task.is_done() {
                state.queue.push_back(task);
            }
        }
        self.promote();
    }

    /// Drops a settled task from the pool. Returns true if it was holding a slot.
    fn release(&self, id: TaskId) -> bool {
        let mut state = self.state.lock();
        state.queue.retain(|t| t.id() != id);
        state.running.remove(&id).is_some()
    }
}

impl fmt::Debug for SimpleOperationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SimpleOperationScheduler")
            .field("pool_size", &state.pool_size)
            .field("queued", &state.queue.len())
            .field("running", &state.running.len())
            .field("slice_budget", &self.inner.slice_budget)
            .field("shutdown", &state.shutdown)
            .finish()
    }
}
