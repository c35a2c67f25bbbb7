//! tickwork kernel: admission-controlled task supervision.
//!
//! [Supervisor] limits how many submitted [Task]s run at once, promoting queued work in
//! FIFO order as slots free up. [FriendlySupervisor] layers a delayed "still queued"
//! notice to the task's owner on top. Results flow back through [TaskHandle].

pub mod actor;
pub mod config;
pub mod entry;
pub mod error;
pub mod friendly;
pub mod handle;
pub mod state;
pub mod supervisor;
pub mod task;
pub mod timer;

pub use actor::{Actor, OwnerRef};
pub use config::{SupervisorConfig, DEFAULT_QUEUE_INFORM_DELAY_MS, DEFAULT_QUOTA};
pub use entry::{EntryHook, EntryOptions, TaskEntry};
pub use error::{ConfigError, TaskError};
pub use friendly::{FriendlySupervisor, QUEUED_NOTICE};
pub use handle::{HandleState, Outcome, TaskHandle};
pub use state::{Monitored, TaskId, TaskSnapshot, TaskState};
pub use supervisor::Supervisor;
pub use task::{task_fn, Task, TokioTask};
pub use timer::{ManualTimer, Timer, TimerCallback, TimerHandle, TokioTimer};
