//! Error types shared by every dispatcher in the workspace.

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

/// Terminal failure of a submitted task, as observed through its [`TaskHandle`].
///
/// Cloneable so that every listener registered on a handle can receive its own copy.
///
/// [`TaskHandle`]: crate::handle::TaskHandle
#[derive(Clone, Debug, thiserror::Error)]
pub enum TaskError {
    /// The handle was cancelled. Not an error condition for reporting purposes.
    #[error("task was cancelled")]
    Cancelled,
    /// The task raised an error while starting or running.
    #[error("{0}")]
    Failed(Arc<dyn StdError + Send + Sync>),
    /// The task panicked with a printable payload.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The dispatcher refused the submission (for example after shutdown).
    #[error("task rejected: {0}")]
    Rejected(String),
    /// The task ended without telling us why.
    #[error("unknown error")]
    Unknown,
}

impl TaskError {
    /// Wraps any error type into [`TaskError::Failed`].
    pub fn failed<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(err))
    }

    /// Builds a [`TaskError::Failed`] from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(Arc::new(MessageError(message.into())))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Converts a caught panic payload. Payloads that are not strings map to
    /// [`TaskError::Unknown`].
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        if let Some(s) = payload.downcast_ref::<&'static str>() {
            Self::Panicked((*s).to_string())
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Self::Panicked(s.clone())
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct MessageError(String);

/// Rejected configuration, raised synchronously by the call that attempted it.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("quota must be greater than zero (got {0})")]
    InvalidQuota(usize),
    #[error("pool size must be greater than zero (got {0})")]
    InvalidPoolSize(usize),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_map_to_messages_or_unknown() {
        let err = TaskError::from_panic(Box::new("boom"));
        assert!(matches!(err, TaskError::Panicked(ref m) if m == "boom"));

        let err = TaskError::from_panic(Box::new(String::from("owned boom")));
        assert!(matches!(err, TaskError::Panicked(ref m) if m == "owned boom"));

        let err = TaskError::from_panic(Box::new(42_u32));
        assert!(matches!(err, TaskError::Unknown));
    }

    #[test]
    fn msg_errors_display_their_message() {
        let err = TaskError::msg("disk full");
        assert_eq!(err.to_string(), "disk full");
        assert!(!err.is_cancelled());
        assert!(TaskError::Cancelled.is_cancelled());
    }
}
