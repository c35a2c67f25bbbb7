//! Write-once completion handle shared between a dispatcher and the callers waiting on it.
//!
//! A [`TaskHandle`] starts pending and is settled exactly once, either with a value, an error,
//! or a cancellation. Listeners registered with [`TaskHandle::on_settle`] run on whichever
//! thread settles the handle (or inline, if it is already settled). The handle also implements
//! [`Future`], so async callers can simply `.await` it.
//!
//! Every clone of a handle may settle it. When the last clone is dropped while the slot is still
//! pending, nothing is left that could ever settle it, so the slot settles itself with
//! [`TaskError::Unknown`] and its listeners still run.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::TaskError;

/// Terminal result carried by a settled handle.
pub type Outcome<V> = Result<V, TaskError>;

type Listener<V> = Box<dyn FnOnce(&Outcome<V>) + Send>;

/// Observable state of a [`TaskHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleState {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

struct Slot<V> {
    outcome: Option<Arc<Outcome<V>>>,
    listeners: Vec<Listener<V>>,
    wakers: Vec<Waker>,
}

struct Shared<V> {
    slot: Mutex<Slot<V>>,
    // Live `TaskHandle` clones. Links created by `forward_to` toward upstream do not count.
    holders: AtomicUsize,
}

impl<V> Shared<V> {
    fn settle(&self, outcome: Outcome<V>) -> bool {
        let (outcome, listeners, wakers) = {
            let mut slot = self.slot.lock();
            if slot.outcome.is_some() {
                return false;
            }
            let outcome = Arc::new(outcome);
            slot.outcome = Some(Arc::clone(&outcome));
            (
                outcome,
                std::mem::take(&mut slot.listeners),
                std::mem::take(&mut slot.wakers),
            )
        };

        for listener in listeners {
            run_listener(listener, &outcome);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

/// Cloneable, write-once result slot.
pub struct TaskHandle<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for TaskHandle<V> {
    fn clone(&self) -> Self {
        self.shared.holders.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> Drop for TaskHandle<V> {
    fn drop(&mut self) {
        if self.shared.holders.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if self.shared.settle(Err(TaskError::Unknown)) {
            tracing::debug!("last task handle dropped while pending; settled as unknown");
        }
    }
}

impl<V> fmt::Debug for TaskHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("state", &self.state())
            .finish()
    }
}

impl<V: Send + Sync + 'static> Default for TaskHandle<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TaskHandle<V> {
    pub fn state(&self) -> HandleState {
        let slot = self.shared.slot.lock();
        match slot.outcome.as_deref() {
            None => HandleState::Pending,
            Some(Ok(_)) => HandleState::Succeeded,
            Some(Err(TaskError::Cancelled)) => HandleState::Cancelled,
            Some(Err(_)) => HandleState::Failed,
        }
    }

    pub fn is_done(&self) -> bool {
        self.shared.slot.lock().outcome.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == HandleState::Cancelled
    }

    /// True if both handles refer to the same slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<V: Send + Sync + 'static> TaskHandle<V> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    outcome: None,
                    listeners: Vec::new(),
                    wakers: Vec::new(),
                }),
                holders: AtomicUsize::new(1),
            }),
        }
    }

    /// A handle that is already settled with `outcome`.
    pub fn settled(outcome: Outcome<V>) -> Self {
        let handle = Self::new();
        handle.settle(outcome);
        handle
    }

    pub fn succeed(&self, value: V) -> bool {
        self.settle(Ok(value))
    }

    pub fn fail(&self, err: TaskError) -> bool {
        self.settle(Err(err))
    }

    /// Requests cancellation. Returns false if the handle was already settled.
    pub fn cancel(&self) -> bool {
        self.settle(Err(TaskError::Cancelled))
    }

    /// Settles the slot. Only the first call wins; later calls return false and are ignored.
    pub fn settle(&self, outcome: Outcome<V>) -> bool {
        self.shared.settle(outcome)
    }

    /// Registers `listener` to run once the handle settles. Runs inline if it already has.
    pub fn on_settle<F>(&self, listener: F)
    where
        F: FnOnce(&Outcome<V>) + Send + 'static,
    {
        let ready = {
            let mut slot = self.shared.slot.lock();
            match &slot.outcome {
                Some(outcome) => Arc::clone(outcome),
                None => {
                    slot.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        run_listener(Box::new(listener), &ready);
    }
}

impl<V: Clone + Send + Sync + 'static> TaskHandle<V> {
    /// Copy of the terminal outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Outcome<V>> {
        self.shared.slot.lock().outcome.as_deref().cloned()
    }

    /// Links this handle into `downstream`: our outcome settles it, and cancelling it
    /// cancels us.
    ///
    /// The link back to us is weak, so once every clone of this handle is gone it settles as
    /// [`TaskError::Unknown`] and `downstream` follows.
    pub fn forward_to(&self, downstream: &TaskHandle<V>) {
        let target = downstream.clone();
        self.on_settle(move |outcome| {
            target.settle(outcome.clone());
        });
        let upstream: Weak<Shared<V>> = Arc::downgrade(&self.shared);
        downstream.on_settle(move |outcome| {
            if !matches!(outcome, Err(TaskError::Cancelled)) {
                return;
            }
            if let Some(upstream) = upstream.upgrade() {
                upstream.settle(Err(TaskError::Cancelled));
            }
        });
    }
}

impl<V: Clone + Send + Sync + 'static> Future for TaskHandle<V> {
    type Output = Outcome<V>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        if let Some(outcome) = slot.outcome.as_deref() {
            return Poll::Ready(outcome.clone());
        }
        if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            slot.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

fn run_listener<V>(listener: Listener<V>, outcome: &Outcome<V>) {
    if catch_unwind(AssertUnwindSafe(|| listener(outcome))).is_err() {
        tracing::error!("completion listener panicked; continuing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn settles_exactly_once() {
        let handle = TaskHandle::<u32>::new();
        assert_eq!(handle.state(), HandleState::Pending);
        assert!(handle.succeed(7));
        assert!(!handle.fail(TaskError::msg("late")));
        assert!(!handle.cancel());
        assert_eq!(handle.state(), HandleState::Succeeded);
        assert_eq!(handle.outcome().unwrap().unwrap(), 7);
    }

    #[test]
    fn listeners_fire_once_and_inline_after_settle() {
        let handle = TaskHandle::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        handle.on_settle(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        handle.fail(TaskError::msg("nope"));
        handle.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let c = calls.clone();
        handle.on_settle(move |outcome| {
            assert!(outcome.is_err());
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.state(), HandleState::Failed);
    }

    #[test]
    fn panicking_listener_does_not_poison_settlement() {
        let handle = TaskHandle::<u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));
        handle.on_settle(|_| panic!("listener bug"));
        let s = seen.clone();
        handle.on_settle(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.succeed(1));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forward_to_propagates_outcome_and_cancellation() {
        let inner = TaskHandle::<&'static str>::new();
        let outer = TaskHandle::<&'static str>::new();
        inner.forward_to(&outer);
        inner.succeed("done");
        assert_eq!(outer.outcome().unwrap().unwrap(), "done");

        let inner = TaskHandle::<&'static str>::new();
        let outer = TaskHandle::<&'static str>::new();
        inner.forward_to(&outer);
        outer.cancel();
        assert!(inner.is_cancelled());
    }

    #[test]
    fn dropping_every_clone_settles_as_unknown() {
        let handle = TaskHandle::<u32>::new();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        handle.on_settle(move |outcome| {
            *s.lock() = Some(matches!(outcome, Err(TaskError::Unknown)));
        });

        let remote = handle.clone();
        drop(handle);
        assert!(seen.lock().is_none(), "a clone is still alive");
        std::thread::spawn(move || drop(remote)).join().unwrap();
        assert_eq!(*seen.lock(), Some(true));
    }

    #[test]
    fn orphaned_upstream_settles_downstream() {
        let outer = TaskHandle::<u8>::new();
        {
            let inner = TaskHandle::<u8>::new();
            inner.forward_to(&outer);
        }
        assert!(matches!(outer.outcome(), Some(Err(TaskError::Unknown))));

        // A settled upstream can be dropped freely.
        let outer = TaskHandle::<u8>::new();
        TaskHandle::settled(Ok(3)).forward_to(&outer);
        assert_eq!(outer.outcome().unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn await_resolves_when_settled_from_another_thread() {
        let handle = TaskHandle::<u64>::new();
        let remote = handle.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            remote.succeed(99);
        });
        assert_eq!(handle.await.unwrap(), 99);
    }

    #[tokio::test]
    async fn await_reports_cancellation() {
        let handle = TaskHandle::<u64>::new();
        handle.cancel();
        let err = handle.clone().await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
