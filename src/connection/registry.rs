//! Process-wide session ownership.
//!
//! At most one connection manager may drive a given session id at a time.
//! Registering a new manager for a session aborts the previous holder; every
//! asynchronous continuation in the manager re-checks `is_current` before
//! touching shared state, so a superseded instance stands down instead of
//! fighting over the remote session. The registry is injected so tests can
//! run isolated instances; production code uses the shared one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tracing::debug;
use uuid::Uuid;

use super::ConnectionStatus;

static GLOBAL_REGISTRY: Lazy<Arc<SessionRegistry>> =
    Lazy::new(|| Arc::new(SessionRegistry::new()));

/// State a manager shares with the registry: the abort flag its async
/// continuations poll, and the status snapshot callers read.
pub(crate) struct SharedState {
    aborted: AtomicBool,
    status: Mutex<ConnectionStatus>,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        SharedState {
            aborted: AtomicBool::new(false),
            status: Mutex::new(ConnectionStatus::default()),
        }
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn abort(&self, reason: &str) {
        self.aborted.store(true, Ordering::SeqCst);
        let mut status = self.status.lock().unwrap();
        *status = ConnectionStatus {
            error: Some(reason.to_string()),
            ..ConnectionStatus::default()
        };
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        self.status.lock().unwrap().clone()
    }

    pub(crate) fn update_status(&self, apply: impl FnOnce(&mut ConnectionStatus)) {
        let mut status = self.status.lock().unwrap();
        apply(&mut status);
    }
}

struct RegistryEntry {
    instance_id: Uuid,
    shared: Arc<SharedState>,
}

#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    /// The shared process-wide registry.
    pub fn global() -> Arc<SessionRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    pub(crate) fn register(&self, session_id: &str, instance_id: Uuid, shared: Arc<SharedState>) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(previous) = entries.insert(
            session_id.to_string(),
            RegistryEntry {
                instance_id,
                shared,
            },
        ) {
            debug!(
                target = "connection::registry",
                session = session_id,
                superseded = %previous.instance_id,
                "replacing active manager"
            );
            previous
                .shared
                .abort("superseded by a newer connection for this session");
        }
        debug!(
            target = "connection::registry",
            session = session_id,
            instance = %instance_id,
            active = entries.len(),
            "manager registered"
        );
    }

    pub(crate) fn is_current(&self, session_id: &str, instance_id: Uuid) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(session_id)
            .map(|entry| entry.instance_id == instance_id)
            .unwrap_or(false)
    }

    pub(crate) fn unregister(&self, session_id: &str, instance_id: Uuid) {
        let mut entries = self.entries.lock().unwrap();
        let removed = match entries.get(session_id) {
            Some(entry) if entry.instance_id == instance_id => {
                entries.remove(session_id);
                true
            }
            _ => false,
        };
        if removed {
            debug!(
                target = "connection::registry",
                session = session_id,
                active = entries.len(),
                "manager unregistered"
            );
        }
    }

    /// Count of live managers, for leak diagnostics only.
    pub fn active_managers(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_twice_aborts_the_previous_holder() {
        let registry = SessionRegistry::new();
        let first = Arc::new(SharedState::new());
        let second = Arc::new(SharedState::new());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        registry.register("s", a, first.clone());
        assert!(registry.is_current("s", a));

        registry.register("s", b, second.clone());
        assert!(first.is_aborted());
        assert!(!second.is_aborted());
        assert!(!registry.is_current("s", a));
        assert!(registry.is_current("s", b));
        assert_eq!(registry.active_managers(), 1);

        let status = first.status();
        assert!(!status.connected);
        assert!(status.error.is_some());
    }

    #[test]
    fn unregister_ignores_stale_instances() {
        let registry = SessionRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.register("s", a, Arc::new(SharedState::new()));
        registry.register("s", b, Arc::new(SharedState::new()));

        // the superseded instance must not evict its replacement
        registry.unregister("s", a);
        assert!(registry.is_current("s", b));

        registry.unregister("s", b);
        assert_eq!(registry.active_managers(), 0);
    }

    #[test]
    fn sessions_are_independent() {
        let registry = SessionRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.register("one", a, Arc::new(SharedState::new()));
        registry.register("two", b, Arc::new(SharedState::new()));
        assert!(registry.is_current("one", a));
        assert!(registry.is_current("two", b));
        assert_eq!(registry.active_managers(), 2);
    }
}
