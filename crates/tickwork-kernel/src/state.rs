//! Identity, lifecycle state and diagnostics snapshots for supervised tasks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::handle::HandleState;

/// Stable identifier of a submitted task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a task as reported to observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Terminal state implied by a settled handle, `None` while it is pending.
    pub fn from_handle(state: HandleState) -> Option<Self> {
        match state {
            HandleState::Pending => None,
            HandleState::Succeeded => Some(Self::Succeeded),
            HandleState::Failed => Some(Self::Failed),
            HandleState::Cancelled => Some(Self::Cancelled),
        }
    }
}

/// A task tracked by a [`Supervisor`] only for diagnostics.
///
/// [`Supervisor`]: crate::supervisor::Supervisor
pub trait Monitored: Send + Sync {
    fn id(&self) -> TaskId;
    fn name(&self) -> Option<String>;
    fn owner_name(&self) -> Option<String>;
    fn state(&self) -> TaskState;
    fn submitted_at(&self) -> DateTime<Utc>;
}

/// Point-in-time view of one task, as returned by `Supervisor::snapshot`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: Option<String>,
    pub owner: Option<String>,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
}

impl TaskSnapshot {
    pub fn of(task: &dyn Monitored) -> Self {
        Self {
            id: task.id(),
            name: task.name(),
            owner: task.owner_name(),
            state: task.state(),
            submitted_at: task.submitted_at(),
        }
    }
}
