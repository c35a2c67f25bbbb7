//! Tells an operation's owner how it ended, and logs the failures worth logging.
//!
//! Cancellation is never logged. Rejections are logged as warnings, every other failure as
//! an error.

use tickwork_kernel::{Outcome, OwnerRef, TaskError, TaskHandle};

pub const CANCELLED_NOTICE: &str = "Operation cancelled.";
pub const UNKNOWN_ERROR_NOTICE: &str = "An error occurred: Unknown error. Please see console.";

/// Terminal-result observer bound to an optional owner.
#[derive(Clone, Debug, Default)]
pub struct ErrorReporter {
    owner: OwnerRef,
}

impl ErrorReporter {
    pub fn new(owner: OwnerRef) -> Self {
        Self { owner }
    }

    /// Reports `handle`'s outcome once it settles.
    pub fn attach<V>(self, handle: &TaskHandle<V>)
    where
        V: Send + Sync + 'static,
    {
        handle.on_settle(move |outcome| self.report(outcome));
    }

    pub fn report<V>(&self, outcome: &Outcome<V>) {
        let Err(err) = outcome else {
            return;
        };
        match err {
            TaskError::Cancelled => self.owner.print_error(CANCELLED_NOTICE),
            TaskError::Unknown => {
                self.owner.print_error(UNKNOWN_ERROR_NOTICE);
                tracing::error!(owner = ?self.owner.name(), "operation failed: unknown error");
            }
            TaskError::Rejected(reason) => {
                self.owner.print_error(&format!("An error occurred: {err}"));
                tracing::warn!(owner = ?self.owner.name(), reason = %reason, "operation rejected");
            }
            other => {
                self.owner.print_error(&format!("An error occurred: {other}"));
                tracing::error!(owner = ?self.owner.name(), error = ?other, "operation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingActor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tickwork_kernel::Actor;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Counts events at one level.
    struct LevelCounter {
        level: Level,
        seen: Arc<AtomicUsize>,
    }

    impl<S: Subscriber> Layer<S> for LevelCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == self.level {
                self.seen.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Runs `f` under a scoped subscriber and returns how many `level` events it emitted.
    fn count_events(level: Level, f: impl FnOnce()) -> usize {
        let seen = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(LevelCounter {
            level,
            seen: seen.clone(),
        });
        tracing::subscriber::with_default(subscriber, f);
        seen.load(Ordering::SeqCst)
    }

    fn reporter() -> (ErrorReporter, Arc<RecordingActor>, Arc<dyn Actor>) {
        let recorder = Arc::new(RecordingActor::default());
        let actor: Arc<dyn Actor> = recorder.clone();
        (ErrorReporter::new(OwnerRef::new(&actor)), recorder, actor)
    }

    #[test]
    fn success_is_silent() {
        let (reporter, recorder, _actor) = reporter();
        reporter.report(&Ok::<u8, TaskError>(1));
        assert!(recorder.errors.lock().is_empty());
        assert!(recorder.raw.lock().is_empty());
    }

    #[test]
    fn cancellation_gets_a_short_notice() {
        let (reporter, recorder, _actor) = reporter();
        let handle = TaskHandle::<u8>::new();
        reporter.attach(&handle);
        handle.cancel();
        assert_eq!(*recorder.errors.lock(), vec![CANCELLED_NOTICE.to_string()]);
    }

    #[test]
    fn failures_include_the_message() {
        let (reporter, recorder, _actor) = reporter();
        reporter.report(&Err::<u8, _>(TaskError::msg("region too large")));
        reporter.report(&Err::<u8, _>(TaskError::Unknown));
        assert_eq!(
            *recorder.errors.lock(),
            vec![
                "An error occurred: region too large".to_string(),
                UNKNOWN_ERROR_NOTICE.to_string()
            ]
        );
    }

    #[test]
    fn cancellation_is_never_logged() {
        let (reporter, _recorder, _actor) = reporter();
        let errors = count_events(Level::ERROR, || {
            reporter.report(&Err::<u8, _>(TaskError::Cancelled));
            ErrorReporter::default().report(&Err::<u8, _>(TaskError::Cancelled));
        });
        assert_eq!(errors, 0);
    }

    #[test]
    fn each_failure_is_logged_once() {
        let (reporter, _recorder, _actor) = reporter();
        let errors = count_events(Level::ERROR, || {
            reporter.report(&Err::<u8, _>(TaskError::msg("region too large")))
        });
        assert_eq!(errors, 1);
        let errors = count_events(Level::ERROR, || {
            reporter.report(&Err::<u8, _>(TaskError::Unknown))
        });
        assert_eq!(errors, 1);
    }

    #[test]
    fn missing_owner_still_logs() {
        let reporter = ErrorReporter::default();
        let errors = count_events(Level::ERROR, || {
            reporter.report(&Err::<u8, _>(TaskError::msg("nobody to tell")));
            reporter.report(&Err::<u8, _>(TaskError::Unknown));
        });
        assert_eq!(errors, 2);
    }

    #[test]
    fn rejections_are_warnings() {
        let (reporter, recorder, _actor) = reporter();
        let rejected = || reporter.report(&Err::<u8, _>(TaskError::Rejected("closed".into())));
        assert_eq!(count_events(Level::ERROR, rejected), 0);
        assert_eq!(count_events(Level::WARN, rejected), 1);
        assert_eq!(recorder.errors.lock().len(), 2);
    }
}
