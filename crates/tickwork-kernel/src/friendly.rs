//! Supervisor decoration that tells a task's owner when their work is stuck in the queue.
//!
//! An informer is armed at submission time. If the entry is still queued when the delay
//! elapses, the owner receives a single "queued" notice. Promotion or settlement disarms it.

use std::sync::Arc;
use std::time::Duration;

use crate::actor::{Actor, OwnerRef};
use crate::config::SupervisorConfig;
use crate::entry::{EntryHook, EntryOptions};
use crate::error::ConfigError;
use crate::handle::TaskHandle;
use crate::state::TaskSnapshot;
use crate::supervisor::Supervisor;
use crate::task::Task;
use crate::timer::{Timer, TimerHandle};

/// Text sent to an owner whose task is still waiting for a slot.
pub const QUEUED_NOTICE: &str = "(Please wait... your task is queued.)";

struct Informer {
    timer: Option<TimerHandle>,
}

impl Informer {
    fn arm(timer: &dyn Timer, delay: Duration, owner: &OwnerRef) -> Self {
        if !owner.is_set() {
            return Self { timer: None };
        }
        let owner = owner.clone();
        let handle = timer.schedule(
            delay,
            Box::new(move || {
                tracing::debug!(owner = ?owner.name(), "informing owner of queued task");
                owner.print_raw(QUEUED_NOTICE);
            }),
        );
        Self {
            timer: Some(handle),
        }
    }

    fn disarm(&self) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
    }
}

impl EntryHook for Informer {
    fn on_start(&self) {
        self.disarm();
    }

    fn on_settle(&self) {
        self.disarm();
    }
}

/// [`Supervisor`] plus delayed owner notification. Dispatch behaviour is unchanged.
#[derive(Clone)]
pub struct FriendlySupervisor {
    supervisor: Supervisor,
    timer: Arc<dyn Timer>,
    queue_inform_delay: Duration,
}

impl FriendlySupervisor {
    pub fn new(
        supervisor: Supervisor,
        timer: Arc<dyn Timer>,
        queue_inform_delay: Duration,
    ) -> Self {
        Self {
            supervisor,
            timer,
            queue_inform_delay,
        }
    }

    pub fn from_config(
        config: &SupervisorConfig,
        timer: Arc<dyn Timer>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            Supervisor::from_config(config)?,
            timer,
            config.queue_inform_delay(),
        ))
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn queue_inform_delay(&self) -> Duration {
        self.queue_inform_delay
    }

    /// Submits `task` on behalf of `owner`. `None` behaves exactly like a plain submit.
    pub fn submit<V, T>(&self, task: T, owner: Option<&Arc<dyn Actor>>) -> TaskHandle<V>
    where
        V: Clone + Send + Sync + 'static,
        T: Task<V>,
    {
        self.submit_with(task, EntryOptions::default().with_owner(OwnerRef::from_option(owner)))
    }

    pub fn submit_with<V, T>(&self, task: T, options: EntryOptions) -> TaskHandle<V>
    where
        V: Clone + Send + Sync + 'static,
        T: Task<V>,
    {
        let informer = Informer::arm(self.timer.as_ref(), self.queue_inform_delay, &options.owner);
        self.supervisor
            .submit_with(task, options.with_hook(Arc::new(informer)))
    }

    pub fn quota(&self) -> usize {
        self.supervisor.quota()
    }

    pub fn set_quota(&self, quota: usize) -> Result<(), ConfigError> {
        self.supervisor.set_quota(quota)
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.supervisor.snapshot()
    }

    pub fn shutdown(&self) -> usize {
        self.supervisor.shutdown()
    }
}
