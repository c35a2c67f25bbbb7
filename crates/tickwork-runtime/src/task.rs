//! One operation driven slice by slice on a world's tick scheduler.

use std::future::IntoFuture;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tickwork_kernel::{Monitored, Outcome, OwnerRef, TaskError, TaskHandle, TaskId, TaskState};

use crate::operation::{OperationRef, RunContext};
use crate::tick::TickScheduler;

/// Sent once to the owner the first time an operation needs more than one slice.
pub const LONG_OPERATION_NOTICE: &str = "(This operation is large and may take a while...)";

/// What a slice left behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SliceOutcome {
    /// The operation handed back a continuation and wants another slice.
    Yielded,
    /// The handle is settled; no further slices.
    Finished,
}

pub(crate) type SliceCallback = Box<dyn FnOnce(Arc<OperationTask>, SliceOutcome) + Send>;

pub(crate) struct TaskSettings {
    pub name: Option<String>,
    pub owner: OwnerRef,
    pub budget: Duration,
    pub notify_long: bool,
}

pub struct OperationTask {
    id: TaskId,
    name: Option<String>,
    owner: OwnerRef,
    submitted_at: DateTime<Utc>,
    original: OperationRef,
    current: Mutex<Option<OperationRef>>,
    scheduler: Arc<dyn TickScheduler>,
    budget: Duration,
    state: Mutex<TaskState>,
    slices: AtomicU64,
    handle: TaskHandle<OperationRef>,
    notify_long: bool,
    announced_long: AtomicBool,
}

impl OperationTask {
    pub(crate) fn new(
        operation: OperationRef,
        scheduler: Arc<dyn TickScheduler>,
        settings: TaskSettings,
    ) -> Arc<Self> {
        let handle = TaskHandle::new();
        let cancel_target = Arc::clone(&operation);
        handle.on_settle(move |outcome: &Outcome<OperationRef>| {
            if matches!(outcome, Err(TaskError::Cancelled)) {
                cancel_target.cancel();
            }
        });
        Arc::new(Self {
            id: TaskId::new(),
            name: settings.name,
            owner: settings.owner,
            submitted_at: Utc::now(),
            original: Arc::clone(&operation),
            current: Mutex::new(Some(operation)),
            scheduler,
            budget: settings.budget,
            state: Mutex::new(TaskState::Scheduled),
            slices: AtomicU64::new(0),
            handle,
            notify_long: settings.notify_long,
            announced_long: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn handle(&self) -> &TaskHandle<OperationRef> {
        &self.handle
    }

    pub fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    pub fn slices(&self) -> u64 {
        self.slices.load(Ordering::SeqCst)
    }

    /// Cancellation wins over whatever the slice loop last recorded.
    pub fn state(&self) -> TaskState {
        if self.handle.is_cancelled() {
            return TaskState::Cancelled;
        }
        *self.state.lock()
    }

    /// Queues the next slice on the tick scheduler. `on_slice` runs on the scheduler's
    /// thread right after the slice.
    pub(crate) fn submit_to_scheduler(self: &Arc<Self>, on_slice: SliceCallback) {
        let task = Arc::clone(self);
        self.scheduler.schedule(
            Box::new(move || {
                let outcome = task.run_slice();
                on_slice(task, outcome);
            }),
            0,
        );
    }

    /// Performs one bounded resume.
    pub(crate) fn run_slice(&self) -> SliceOutcome {
        if self.handle.is_done() {
            return SliceOutcome::Finished;
        }
        let Some(operation) = self.current.lock().take() else {
            return SliceOutcome::Finished;
        };
        *self.state.lock() = TaskState::Running;
        let slice = self.slices.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(task = %self.id, slice, kind = operation.kind(), "resuming operation");

        let run = RunContext::timed(self.budget);
        match catch_unwind(AssertUnwindSafe(|| operation.resume(&run))) {
            Ok(Ok(Some(next))) => {
                if self.handle.is_done() {
                    return SliceOutcome::Finished;
                }
                *self.current.lock() = Some(next);
                self.announce_long();
                SliceOutcome::Yielded
            }
            Ok(Ok(None)) => {
                self.finish(Ok(Arc::clone(&self.original)));
                SliceOutcome::Finished
            }
            Ok(Err(err)) => {
                self.finish(Err(err.into()));
                SliceOutcome::Finished
            }
            Err(payload) => {
                self.finish(Err(TaskError::from_panic(payload)));
                SliceOutcome::Finished
            }
        }
    }

    /// Drives the remaining continuations on the calling thread with no time budget.
    pub(crate) fn run_to_completion(&self) -> Outcome<OperationRef> {
        if let Some(outcome) = self.handle.outcome() {
            return outcome;
        }
        *self.state.lock() = TaskState::Running;
        let run = RunContext::unbounded();
        let mut current = self.current.lock().take();
        while let Some(operation) = current.take() {
            if self.handle.is_done() {
                break;
            }
            self.slices.fetch_add(1, Ordering::SeqCst);
            match catch_unwind(AssertUnwindSafe(|| operation.resume(&run))) {
                Ok(Ok(next)) => current = next,
                Ok(Err(err)) => self.finish(Err(err.into())),
                Err(payload) => self.finish(Err(TaskError::from_panic(payload))),
            }
        }
        if !self.handle.is_done() {
            self.finish(Ok(Arc::clone(&self.original)));
        }
        self.handle.outcome().unwrap_or(Err(TaskError::Unknown))
    }

    fn finish(&self, outcome: Outcome<OperationRef>) {
        let state = match &outcome {
            Ok(_) => TaskState::Succeeded,
            Err(err) if err.is_cancelled() => TaskState::Cancelled,
            Err(_) => TaskState::Failed,
        };
        *self.state.lock() = state;
        tracing::debug!(task = %self.id, ?state, slices = self.slices(), "operation finished");
        self.handle.settle(outcome);
    }

    fn announce_long(&self) {
        if self.announced_long.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(task = %self.id, name = ?self.name, "performing long operation");
        if self.notify_long {
            self.owner.print_raw(LONG_OPERATION_NOTICE);
        }
    }
}

impl Monitored for OperationTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn owner_name(&self) -> Option<String> {
        self.owner.name()
    }

    fn state(&self) -> TaskState {
        OperationTask::state(self)
    }

    fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

/// Caller-side view of a submitted operation. Await it (or its [`TaskHandle`]) for the
/// original operation once every continuation has run.
#[derive(Clone)]
pub struct OperationHandle {
    task: Arc<OperationTask>,
}

impl OperationHandle {
    pub(crate) fn new(task: Arc<OperationTask>) -> Self {
        Self { task }
    }

    pub fn id(&self) -> TaskId {
        self.task.id
    }

    pub fn name(&self) -> Option<&str> {
        self.task.name.as_deref()
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Number of resume calls made so far.
    pub fn slices(&self) -> u64 {
        self.task.slices()
    }

    pub fn handle(&self) -> TaskHandle<OperationRef> {
        self.task.handle.clone()
    }

    pub fn original(&self) -> OperationRef {
        Arc::clone(&self.task.original)
    }

    pub fn is_done(&self) -> bool {
        self.task.is_done()
    }

    pub fn outcome(&self) -> Option<Outcome<OperationRef>> {
        self.task.handle.outcome()
    }

    pub fn cancel(&self) -> bool {
        self.task.handle.cancel()
    }
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.task.id)
            .field("name", &self.task.name)
            .field("state", &self.state())
            .field("slices", &self.slices())
            .finish()
    }
}

impl IntoFuture for OperationHandle {
    type Output = Outcome<OperationRef>;
    type IntoFuture = TaskHandle<OperationRef>;

    fn into_future(self) -> Self::IntoFuture {
        self.task.handle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationError, Step, StepOperation};
    use crate::tick::ManualTickScheduler;

    fn settings() -> TaskSettings {
        TaskSettings {
            name: Some("fill".into()),
            owner: OwnerRef::none(),
            budget: Duration::from_millis(5),
            notify_long: true,
        }
    }

    fn counting(steps: u32) -> OperationRef {
        let mut left = steps;
        StepOperation::new(move |_run: &RunContext| {
            left -= 1;
            Ok(if left == 0 { Step::Done } else { Step::Continue })
        })
    }

    #[test]
    fn slices_until_done_and_returns_original() {
        let scheduler = Arc::new(ManualTickScheduler::new());
        let op = counting(3);
        let task = OperationTask::new(op.clone(), scheduler, settings());
        assert_eq!(task.state(), TaskState::Scheduled);

        assert_eq!(task.run_slice(), SliceOutcome::Yielded);
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(task.run_slice(), SliceOutcome::Yielded);
        assert_eq!(task.run_slice(), SliceOutcome::Finished);
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.slices(), 3);

        let value = task.handle().outcome().unwrap().unwrap();
        assert!(Arc::ptr_eq(&value, &op));
    }

    #[test]
    fn domain_error_fails_the_task() {
        let scheduler = Arc::new(ManualTickScheduler::new());
        let op: OperationRef =
            StepOperation::new(|_run: &RunContext| Err(OperationError::LimitExceeded { limit: 5 }));
        let task = OperationTask::new(op, scheduler, settings());
        assert_eq!(task.run_slice(), SliceOutcome::Finished);
        assert_eq!(task.state(), TaskState::Failed);
        let err = task.handle().outcome().unwrap().err().unwrap();
        assert_eq!(err.to_string(), "max changes (5) exceeded");
    }

    #[test]
    fn panicking_resume_is_contained() {
        let scheduler = Arc::new(ManualTickScheduler::new());
        let op: OperationRef =
            StepOperation::new(|_run: &RunContext| -> Result<Step, OperationError> {
                panic!("boom")
            });
        let task = OperationTask::new(op, scheduler, settings());
        assert_eq!(task.run_slice(), SliceOutcome::Finished);
        assert!(matches!(
            task.handle().outcome().unwrap(),
            Err(TaskError::Panicked(msg)) if msg == "boom"
        ));
    }

    #[test]
    fn cancellation_overrides_state_and_reaches_operation() {
        struct Flagged {
            cancelled: AtomicBool,
        }
        impl crate::operation::Operation for Flagged {
            fn resume(
                self: Arc<Self>,
                _run: &RunContext,
            ) -> Result<Option<OperationRef>, OperationError> {
                Ok(Some(self as OperationRef))
            }
            fn cancel(&self) {
                self.cancelled.store(true, Ordering::SeqCst);
            }
        }

        let scheduler = Arc::new(ManualTickScheduler::new());
        let op = Arc::new(Flagged {
            cancelled: AtomicBool::new(false),
        });
        let task = OperationTask::new(op.clone(), scheduler, settings());
        assert_eq!(task.run_slice(), SliceOutcome::Yielded);
        assert!(task.handle().cancel());
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(op.cancelled.load(Ordering::SeqCst));
        assert_eq!(task.run_slice(), SliceOutcome::Finished);
        assert_eq!(task.slices(), 1);
    }

    #[test]
    fn cooperative_cancellation_is_not_a_failure() {
        let scheduler = Arc::new(ManualTickScheduler::new());
        let op: OperationRef =
            StepOperation::new(|_run: &RunContext| Err(OperationError::Cancelled));
        let task = OperationTask::new(op, scheduler, settings());
        task.run_slice();
        assert_eq!(task.state(), TaskState::Cancelled);
    }

    #[test]
    fn run_to_completion_ignores_budget() {
        let scheduler = Arc::new(ManualTickScheduler::new());
        let task = OperationTask::new(counting(10), scheduler, settings());
        assert_eq!(task.run_slice(), SliceOutcome::Yielded);
        assert!(task.run_to_completion().is_ok());
        assert_eq!(task.slices(), 10);
        assert_eq!(task.state(), TaskState::Succeeded);
    }

    #[test]
    fn submit_to_scheduler_runs_on_the_next_tick() {
        let scheduler = Arc::new(ManualTickScheduler::new());
        let task = OperationTask::new(counting(1), scheduler.clone(), settings());
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        task.submit_to_scheduler(Box::new(move |_task: Arc<OperationTask>, outcome: SliceOutcome| {
            *s.lock() = Some(outcome)
        }));
        assert!(seen.lock().is_none());
        scheduler.run_tick();
        assert_eq!(*seen.lock(), Some(SliceOutcome::Finished));
    }

    #[tokio::test]
    async fn handle_can_be_awaited() {
        let scheduler = Arc::new(ManualTickScheduler::new());
        let task = OperationTask::new(counting(2), scheduler, settings());
        let handle = OperationHandle::new(task.clone());
        task.run_slice();
        task.run_slice();
        let op = handle.clone().await.unwrap();
        assert!(Arc::ptr_eq(&op, &handle.original()));
        assert_eq!(handle.name(), Some("fill"));
    }
}
