//! The unit of submittable work.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::error::TaskError;
use crate::handle::TaskHandle;

/// Something a dispatcher can start. `submit` is called at most once per submission,
/// when the entry is promoted into the running set.
///
/// Returning `Err` (or panicking) settles the entry's handle as failed; the dispatcher
/// keeps going either way.
pub trait Task<V>: Send + Sync + 'static {
    fn submit(&self) -> Result<TaskHandle<V>, TaskError>;
}

impl<V, F> Task<V> for F
where
    F: Fn() -> Result<TaskHandle<V>, TaskError> + Send + Sync + 'static,
{
    fn submit(&self) -> Result<TaskHandle<V>, TaskError> {
        self()
    }
}

/// Pins down the signature of a closure used as a [`Task`].
pub fn task_fn<V, F>(f: F) -> F
where
    F: Fn() -> Result<TaskHandle<V>, TaskError> + Send + Sync + 'static,
{
    f
}

/// Runs an async body on a tokio runtime when submitted.
///
/// Cancelling the returned handle aborts the spawned task. If the runtime shuts down before
/// the body finishes, the body's handle is dropped with it and settles as
/// [`TaskError::Unknown`].
pub struct TokioTask<F> {
    runtime: tokio::runtime::Handle,
    factory: F,
}

impl<F> TokioTask<F> {
    pub fn new(runtime: tokio::runtime::Handle, factory: F) -> Self {
        Self { runtime, factory }
    }

    /// Binds to the runtime of the calling context.
    ///
    /// Panics when called outside of a tokio runtime, like `tokio::spawn`.
    pub fn current(factory: F) -> Self {
        Self::new(tokio::runtime::Handle::current(), factory)
    }
}

impl<F, Fut, V> Task<V> for TokioTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, TaskError>> + Send + 'static,
    V: Send + Sync + 'static,
{
    fn submit(&self) -> Result<TaskHandle<V>, TaskError> {
        let handle = TaskHandle::new();
        let body = (self.factory)();
        let done = handle.clone();
        let join = self.runtime.spawn(async move {
            let outcome = match AssertUnwindSafe(body).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(TaskError::from_panic(payload)),
            };
            done.settle(outcome);
        });
        handle.on_settle(move |outcome| {
            if matches!(outcome, Err(TaskError::Cancelled)) {
                join.abort();
            }
        });
        Ok(handle)
    }
}
