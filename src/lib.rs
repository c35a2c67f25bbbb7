//! # tickwork
//!
//! Two-level, quota-bounded work scheduling.
//!
//! - [`kernel`]: a generic [`Supervisor`] that runs at most `quota` tasks at once in FIFO
//!   order, plus [`FriendlySupervisor`], which tells a task's owner when it is stuck waiting.
//! - [`runtime`]: resumable [`Operation`]s driven one time slice at a time on a world's
//!   [`TickScheduler`], admitted through a [`SimpleOperationScheduler`] pool.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tickwork::{
//!     ManualTickScheduler, OperationSchedulerConfig, RunContext, SimpleOperationScheduler,
//!     SimpleWorld, Step, StepOperation, Supervisor,
//! };
//!
//! let ticks = Arc::new(ManualTickScheduler::new());
//! let world = SimpleWorld::new("overworld", ticks.clone());
//! let scheduler =
//!     SimpleOperationScheduler::new(Supervisor::new(8)?, &OperationSchedulerConfig::default())?;
//!
//! let mut left = 3;
//! let handle = scheduler.submit(
//!     StepOperation::new(move |_run: &RunContext| {
//!         left -= 1;
//!         Ok(if left == 0 { Step::Done } else { Step::Continue })
//!     }),
//!     &world,
//!     Some("countdown"),
//!     None,
//! );
//! ticks.run_until_idle(10);
//! assert!(handle.is_done());
//! # Ok::<(), tickwork::ConfigError>(())
//! ```

pub use tickwork_kernel as kernel;
pub use tickwork_runtime as runtime;

pub use tickwork_kernel::{
    task_fn, Actor, ConfigError, FriendlySupervisor, HandleState, ManualTimer, Outcome, OwnerRef,
    Supervisor, SupervisorConfig, Task, TaskError, TaskHandle, TaskId, TaskSnapshot, TaskState,
    Timer, TokioTask, TokioTimer,
};
pub use tickwork_runtime::{
    complete, ErrorReporter, ManualTickScheduler, Operation, OperationError, OperationHandle,
    OperationRef, OperationSchedulerConfig, RunContext, SchedulerError, SimpleOperationScheduler,
    SimpleWorld, Step, StepOperation, TickScheduler, TickworkConfig, TokioTickScheduler, World,
};
