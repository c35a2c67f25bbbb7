//! tickwork runtime: time-sliced operations on cooperative tick schedulers.
//!
//! An [Operation] is resumed one bounded slice at a time on its world's [TickScheduler].
//! [SimpleOperationScheduler] limits how many operations slice at once and reports every
//! operation to a kernel [`Supervisor`](tickwork_kernel::Supervisor) for diagnostics.

pub mod config;
pub mod operation;
pub mod reporter;
pub mod scheduler;
pub mod task;
pub mod tick;

pub use config::{
    OperationSchedulerConfig, TickworkConfig, DEFAULT_POOL_SIZE, DEFAULT_SLICE_BUDGET_MS,
};
pub use operation::{
    complete, Operation, OperationError, OperationRef, RunContext, Step, StepOperation,
};
pub use reporter::{ErrorReporter, CANCELLED_NOTICE, UNKNOWN_ERROR_NOTICE};
pub use scheduler::{SchedulerError, SimpleOperationScheduler};
pub use task::{OperationHandle, OperationTask, LONG_OPERATION_NOTICE};
pub use tick::{
    ManualTickScheduler, Runnable, SimpleWorld, TickScheduler, TokioTickScheduler, World,
    DEFAULT_TICK,
};
