//! # Session Module
//!
//! The one shared session record of the process.
//!
//! `SessionStore` replaces a global session singleton: it is created once with
//! an injected [`Clock`] and handed to every component by `Arc`. All mutation
//! is serialized by one mutex and every critical section is short; readers get
//! snapshot copies and never hold the lock while doing I/O.
//!
//! The store also owns the sequential id allocator (`no_1`, `no_2`, ...), so the
//! readiness trigger, window rotation, the explicit start endpoint and the
//! coordinator all draw from the same counter.
//!
//! ## Lock Order
//!
//! Callers that also hold the readiness lock must take it first. The store
//! never calls out to other components while locked.

use crate::clock::Clock;
use crate::types::{Session, SessionEvent};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard};

/// Prefix of sequentially allocated session ids.
pub const SESSION_ID_PREFIX: &str = "no_";

#[derive(Debug, Default)]
struct SessionInner {
    current: Session,
    counter: u64,
    subscribers: Vec<Sender<SessionEvent>>,
}

impl SessionInner {
    fn notify(&mut self, event: &SessionEvent) {
        // Channel sends never block; dropped receivers are pruned here.
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Mutable view of the session record inside one critical section.
///
/// Obtained through [`SessionStore::transact`]. Everything done through a
/// `SessionTxn` is atomic with respect to other store users.
pub struct SessionTxn<'a> {
    inner: &'a mut SessionInner,
}

impl SessionTxn<'_> {
    /// Snapshot of the current session.
    #[must_use]
    pub fn current(&self) -> Session {
        self.inner.current.clone()
    }

    /// Allocate the next sequential id without starting a session.
    pub fn next_id(&mut self) -> String {
        self.inner.counter = self.inner.counter.saturating_add(1);
        format!("{}{}", SESSION_ID_PREFIX, self.inner.counter)
    }

    /// Begin a session. Blank ids and non-positive starts are ignored.
    pub fn begin(&mut self, id: &str, start_ms: i64) -> Option<Session> {
        let session = Session::new(id, start_ms)?;
        self.inner.current = session.clone();
        self.inner.notify(&SessionEvent::Begun(session.clone()));
        Some(session)
    }

    /// End the active session, if any.
    pub fn end(&mut self) -> Option<Session> {
        let previous = std::mem::take(&mut self.inner.current);
        // End always fires, even when nothing was active.
        self.inner.notify(&SessionEvent::Ended(previous.clone()));
        previous.is_active().then_some(previous)
    }

    /// Allocate the next id and begin it at `start_ms`.
    pub fn begin_next(&mut self, start_ms: i64) -> Option<Session> {
        let id = self.next_id();
        self.begin(&id, start_ms)
    }
}

/// Shared, mutex-guarded session record.
pub struct SessionStore {
    inner: Mutex<SessionInner>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("current", &self.get())
            .finish()
    }
}

impl SessionStore {
    /// Create an empty store reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(SessionInner::default()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The injected clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time from the injected clock.
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Run `f` inside one critical section.
    ///
    /// `f` must not block or perform I/O.
    pub fn transact<R>(&self, f: impl FnOnce(&mut SessionTxn<'_>) -> R) -> R {
        let mut guard = self.lock();
        let mut txn = SessionTxn { inner: &mut guard };
        f(&mut txn)
    }

    /// Begin a session; returns `false` for a blank id or non-positive start.
    pub fn begin(&self, id: &str, start_ms: i64) -> bool {
        let begun = self.transact(|txn| txn.begin(id, start_ms));
        match &begun {
            Some(s) => tracing::info!(session = %s.id, start_ms = s.start_epoch_ms, "session begun"),
            None => tracing::debug!(id, start_ms, "ignored begin with invalid session"),
        }
        begun.is_some()
    }

    /// End the active session and return it.
    pub fn end(&self) -> Option<Session> {
        let ended = self.transact(|txn| txn.end());
        if let Some(s) = &ended {
            tracing::info!(session = %s.id, "session ended");
        }
        ended
    }

    /// Atomic snapshot of the current session.
    #[must_use]
    pub fn get(&self) -> Session {
        self.lock().current.clone()
    }

    /// Allocate the next sequential session id.
    pub fn allocate_id(&self) -> String {
        self.transact(|txn| txn.next_id())
    }

    /// Allocate the next id and begin it at `start_ms` in one step.
    pub fn begin_next(&self, start_ms: i64) -> Option<Session> {
        let begun = self.transact(|txn| txn.begin_next(start_ms));
        if let Some(s) = &begun {
            tracing::info!(session = %s.id, start_ms = s.start_epoch_ms, "session begun");
        }
        begun
    }

    /// Restart numbering so the next allocated id is `no_1`.
    pub fn reset_counter(&self) {
        self.lock().counter = 0;
        tracing::info!("session counter reset, next session will be {}1", SESSION_ID_PREFIX);
    }

    /// Subscribe to begin/end notifications.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = channel();
        self.lock().subscribers.push(tx);
        rx
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(ManualClock::new(1_000)))
    }

    #[test]
    fn begin_sets_and_get_snapshots() {
        let store = store();
        assert!(store.begin("alpha", 1_000));
        let s = store.get();
        assert_eq!(s.id, "alpha");
        assert_eq!(s.start_epoch_ms, 1_000);
    }

    #[test]
    fn begin_with_invalid_input_is_noop() {
        let store = store();
        assert!(store.begin("alpha", 1_000));
        assert!(!store.begin("", 2_000));
        assert!(!store.begin("beta", 0));
        assert_eq!(store.get().id, "alpha");
    }

    #[test]
    fn end_clears_fields() {
        let store = store();
        store.begin("alpha", 1_000);
        let ended = store.end().expect("was active");
        assert_eq!(ended.id, "alpha");
        assert!(!store.get().is_active());
        assert!(store.end().is_none());
    }

    #[test]
    fn begin_over_begin_replaces() {
        let store = store();
        store.begin("alpha", 1_000);
        store.begin("beta", 2_000);
        assert_eq!(store.get().id, "beta");
    }

    #[test]
    fn sequential_ids_and_reset() {
        let store = store();
        assert_eq!(store.allocate_id(), "no_1");
        assert_eq!(store.begin_next(5_000).map(|s| s.id), Some("no_2".to_string()));
        store.reset_counter();
        assert_eq!(store.allocate_id(), "no_1");
    }

    #[test]
    fn subscribers_see_begin_and_end() {
        let store = store();
        let rx = store.subscribe();
        store.begin("alpha", 1_000);
        store.end();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SessionEvent::Begun(s) if s.id == "alpha"));
        assert!(matches!(&events[1], SessionEvent::Ended(s) if s.id == "alpha"));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let store = store();
        drop(store.subscribe());
        store.begin("alpha", 1_000);
        assert!(store.lock().subscribers.is_empty());
    }
}
