//! Notification sink for the party that submitted a task.

use std::sync::{Arc, Weak};

/// Receives best-effort status text about work it owns. Implementations must not block.
pub trait Actor: Send + Sync {
    /// Display name used in diagnostics snapshots.
    fn name(&self) -> String;

    fn print_raw(&self, message: &str);

    fn print_error(&self, message: &str);
}

/// Non-owning reference to an [`Actor`]. Dispatchers only read from owners, and an owner
/// that has gone away is silently skipped.
#[derive(Clone, Default)]
pub struct OwnerRef {
    actor: Option<Weak<dyn Actor>>,
}

impl OwnerRef {
    pub fn none() -> Self {
        Self { actor: None }
    }

    pub fn new(actor: &Arc<dyn Actor>) -> Self {
        Self {
            actor: Some(Arc::downgrade(actor)),
        }
    }

    pub fn from_option(actor: Option<&Arc<dyn Actor>>) -> Self {
        actor.map(Self::new).unwrap_or_default()
    }

    pub fn is_set(&self) -> bool {
        self.actor.is_some()
    }

    /// The owner, if one was given and it is still alive.
    pub fn get(&self) -> Option<Arc<dyn Actor>> {
        self.actor.as_ref().and_then(Weak::upgrade)
    }

    pub fn name(&self) -> Option<String> {
        self.get().map(|a| a.name())
    }

    pub fn print_raw(&self, message: &str) {
        if let Some(actor) = self.get() {
            actor.print_raw(message);
        }
    }

    pub fn print_error(&self, message: &str) {
        if let Some(actor) = self.get() {
            actor.print_error(message);
        }
    }
}

impl std::fmt::Debug for OwnerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OwnerRef").field(&self.name()).finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Actor that records everything it is told.
    #[derive(Default)]
    pub struct RecordingActor {
        pub raw: Mutex<Vec<String>>,
        pub errors: Mutex<Vec<String>>,
    }

    impl Actor for RecordingActor {
        fn name(&self) -> String {
            "recorder".to_string()
        }

        fn print_raw(&self, message: &str) {
            self.raw.lock().push(message.to_string());
        }

        fn print_error(&self, message: &str) {
            self.errors.lock().push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingActor;
    use super::*;

    #[test]
    fn owner_ref_tolerates_dropped_actor() {
        let recorder = Arc::new(RecordingActor::default());
        let actor: Arc<dyn Actor> = recorder.clone();
        let owner = OwnerRef::new(&actor);
        owner.print_raw("hello");
        assert_eq!(*recorder.raw.lock(), vec!["hello".to_string()]);
        assert_eq!(owner.name().as_deref(), Some("recorder"));

        drop(actor);
        drop(recorder);
        owner.print_error("nobody listening");
        assert!(owner.is_set());
        assert!(owner.get().is_none());
    }

    #[test]
    fn empty_owner_is_a_noop() {
        let owner = OwnerRef::none();
        owner.print_raw("ignored");
        assert!(owner.name().is_none());
        assert!(!owner.is_set());
    }
}
