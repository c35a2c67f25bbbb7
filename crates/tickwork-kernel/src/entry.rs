//! Binds a submitted [`Task`] to the handle its submitter holds.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::actor::OwnerRef;
use crate::error::TaskError;
use crate::handle::TaskHandle;
use crate::state::{TaskId, TaskSnapshot, TaskState};
use crate::task::Task;

/// Observer of an entry's lifecycle. Decorations such as the owner informer attach one of
/// these instead of specialising the entry type.
pub trait EntryHook: Send + Sync {
    /// The entry was promoted and is about to call `Task::submit`. A panic here is logged and
    /// does not keep the task from starting.
    fn on_start(&self) {}

    /// The entry's handle settled, for any reason. Called exactly once.
    fn on_settle(&self) {}
}

/// Per-submission metadata.
#[derive(Clone, Default)]
pub struct EntryOptions {
    pub name: Option<String>,
    pub owner: OwnerRef,
    pub hooks: Vec<Arc<dyn EntryHook>>,
}

impl EntryOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_owner(mut self, owner: OwnerRef) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn EntryHook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

pub struct TaskEntry<V> {
    id: TaskId,
    name: Option<String>,
    owner: OwnerRef,
    submitted_at: DateTime<Utc>,
    task: Box<dyn Task<V>>,
    handle: TaskHandle<V>,
    hooks: Vec<Arc<dyn EntryHook>>,
    started: AtomicBool,
}

impl<V> TaskEntry<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(task: impl Task<V>, options: EntryOptions) -> Self {
        let handle = TaskHandle::new();
        for hook in &options.hooks {
            let hook = Arc::clone(hook);
            handle.on_settle(move |_| hook.on_settle());
        }
        Self {
            id: TaskId::new(),
            name: options.name,
            owner: options.owner,
            submitted_at: Utc::now(),
            task: Box::new(task),
            handle,
            hooks: options.hooks,
            started: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn handle(&self) -> TaskHandle<V> {
        self.handle.clone()
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Calls `Task::submit` and links the inner handle to ours.
    ///
    /// Runs at most once. A handle cancelled before promotion skips `submit` entirely, and
    /// a synchronous error or panic from `submit` settles the handle as failed.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        for hook in &self.hooks {
            if catch_unwind(AssertUnwindSafe(|| hook.on_start())).is_err() {
                tracing::error!(task = %self.id, "entry start hook panicked; continuing");
            }
        }
        if self.handle.is_done() {
            tracing::debug!(task = %self.id, "skipping submit of settled task");
            return;
        }
        match catch_unwind(AssertUnwindSafe(|| self.task.submit())) {
            Ok(Ok(inner)) => inner.forward_to(&self.handle),
            Ok(Err(err)) => {
                tracing::debug!(task = %self.id, error = %err, "task failed to submit");
                self.handle.fail(err);
            }
            Err(payload) => {
                let err = TaskError::from_panic(payload);
                tracing::debug!(task = %self.id, error = %err, "task panicked in submit");
                self.handle.fail(err);
            }
        }
    }
}

/// Type-erased view the supervisor keeps in its queue and running set.
pub(crate) trait ErasedEntry: Send + Sync {
    fn id(&self) -> TaskId;
    fn start(&self);
    fn is_settled(&self) -> bool;
    fn cancel(&self) -> bool;
    fn watch(&self, on_settle: Box<dyn FnOnce() + Send>);
    fn snapshot(&self, queued: bool) -> TaskSnapshot;
}

impl<V> ErasedEntry for TaskEntry<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn id(&self) -> TaskId {
        self.id
    }

    fn start(&self) {
        TaskEntry::start(self)
    }

    fn is_settled(&self) -> bool {
        self.handle.is_done()
    }

    fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    fn watch(&self, on_settle: Box<dyn FnOnce() + Send>) {
        self.handle.on_settle(move |_| on_settle());
    }

    fn snapshot(&self, queued: bool) -> TaskSnapshot {
        let state = match TaskState::from_handle(self.handle.state()) {
            Some(terminal) => terminal,
            None if queued => TaskState::Scheduled,
            None => TaskState::Running,
        };
        TaskSnapshot {
            id: self.id,
            name: self.name.clone(),
            owner: self.owner.name(),
            state,
            submitted_at: self.submitted_at,
        }
    }
}
