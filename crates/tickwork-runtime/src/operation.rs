//! Cooperatively resumable units of work.
//!
//! An [`Operation`] does a bounded amount of work per [`Operation::resume`] call and hands
//! back either a continuation or `None` once it is exhausted. It never learns which thread
//! or scheduler is driving it; the [`RunContext`] only tells it how long it may keep going.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tickwork_kernel::TaskError;

/// Shared reference to an operation. Also the success value of an operation's handle.
pub type OperationRef = Arc<dyn Operation>;

/// Domain failure raised by an operation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("{0}")]
    Failed(String),
    #[error("max changes ({limit}) exceeded")]
    LimitExceeded { limit: u64 },
    /// The operation noticed it was cancelled and stopped early.
    #[error("operation was cancelled")]
    Cancelled,
}

impl From<OperationError> for TaskError {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::Cancelled => TaskError::Cancelled,
            other => TaskError::failed(other),
        }
    }
}

pub trait Operation: Send + Sync + 'static {
    /// Runs one slice. Implementations should return once `run.should_continue()` goes
    /// false. `Ok(Some(next))` asks to be resumed again with `next`; it may be `self`.
    fn resume(self: Arc<Self>, run: &RunContext) -> Result<Option<OperationRef>, OperationError>;

    /// Called on the original operation when its handle is cancelled.
    fn cancel(&self) {}

    /// Short label for logs and snapshots.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Time allowance for one resume call.
#[derive(Clone, Copy, Debug)]
pub struct RunContext {
    started: Instant,
    budget: Option<Duration>,
}

impl RunContext {
    pub fn timed(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget: Some(budget),
        }
    }

    /// No deadline; used when an operation is run to completion on the caller's thread.
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            budget: None,
        }
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.budget.map(|b| b.saturating_sub(self.elapsed()))
    }

    pub fn should_continue(&self) -> bool {
        match self.budget {
            Some(budget) => self.elapsed() < budget,
            None => true,
        }
    }
}

/// Drives `operation` until it is exhausted, ignoring time budgets.
pub fn complete(operation: OperationRef) -> Result<(), OperationError> {
    let run = RunContext::unbounded();
    let mut current = Some(operation);
    while let Some(op) = current {
        current = op.resume(&run)?;
    }
    Ok(())
}

/// Result of one step of a [`StepOperation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
}

/// Operation built from a closure that is called once per resume.
pub struct StepOperation<F> {
    step: Mutex<F>,
    kind: &'static str,
}

impl<F> StepOperation<F>
where
    F: FnMut(&RunContext) -> Result<Step, OperationError> + Send + 'static,
{
    pub fn new(step: F) -> Arc<Self> {
        Arc::new(Self {
            step: Mutex::new(step),
            kind: "step",
        })
    }

    pub fn named(kind: &'static str, step: F) -> Arc<Self> {
        Arc::new(Self {
            step: Mutex::new(step),
            kind,
        })
    }
}

impl<F> Operation for StepOperation<F>
where
    F: FnMut(&RunContext) -> Result<Step, OperationError> + Send + 'static,
{
    fn resume(self: Arc<Self>, run: &RunContext) -> Result<Option<OperationRef>, OperationError> {
        let step = {
            let mut f = self.step.lock();
            (*f)(run)?
        };
        Ok(match step {
            Step::Continue => Some(self as OperationRef),
            Step::Done => None,
        })
    }

    fn kind(&self) -> &'static str {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_context_expires() {
        let run = RunContext::timed(Duration::from_millis(1));
        assert_eq!(run.budget(), Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(3));
        assert!(!run.should_continue());
        assert_eq!(run.remaining(), Some(Duration::ZERO));
        assert!(RunContext::unbounded().should_continue());
    }

    #[test]
    fn complete_runs_every_step() {
        let mut left = 4;
        let op = StepOperation::new(move |_run: &RunContext| {
            left -= 1;
            Ok(if left == 0 { Step::Done } else { Step::Continue })
        });
        assert!(complete(op).is_ok());
    }

    #[test]
    fn complete_stops_at_first_error() {
        let op = StepOperation::new(|_run: &RunContext| {
            Err(OperationError::LimitExceeded { limit: 10 })
        });
        assert_eq!(
            complete(op).unwrap_err(),
            OperationError::LimitExceeded { limit: 10 }
        );
    }

    #[test]
    fn cancelled_operation_errors_become_task_cancellation() {
        let err: TaskError = OperationError::Cancelled.into();
        assert!(err.is_cancelled());
        let err: TaskError = OperationError::Failed("bad block".into()).into();
        assert_eq!(err.to_string(), "bad block");
    }

    #[test]
    fn kind_defaults_to_type_name() {
        struct Noop;
        impl Operation for Noop {
            fn resume(
                self: Arc<Self>,
                _run: &RunContext,
            ) -> Result<Option<OperationRef>, OperationError> {
                Ok(None)
            }
        }
        let op: OperationRef = Arc::new(Noop);
        assert!(op.kind().ends_with("Noop"));
        let named: OperationRef = StepOperation::named("fill", |_run: &RunContext| Ok(Step::Done));
        assert_eq!(named.kind(), "fill");
    }
}
