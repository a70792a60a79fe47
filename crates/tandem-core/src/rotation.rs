//! # Rotation Module
//!
//! Time-windowed session rollover driven by data timestamps.
//!
//! Every push handler calls [`SessionRotationPolicy::ensure_for_timestamp`]
//! before labeling its artifact. The decision and the rotation happen inside a
//! single [`SessionStore`] critical section, so concurrent requests carrying the
//! same boundary-crossing timestamp rotate exactly once.

use crate::session::SessionStore;
use crate::types::Session;

/// Default session window in milliseconds.
pub const DEFAULT_WINDOW_MS: i64 = 10_000;

/// What [`SessionRotationPolicy::ensure_for_timestamp`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// No session is active; nothing was created.
    NoSession,
    /// The timestamp belongs to the active session.
    Current(Session),
    /// The window was exceeded and a new session began at the timestamp.
    Rotated { from: Session, to: Session },
}

impl RotationOutcome {
    /// The session the timestamp was filed under, if any.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::NoSession => None,
            Self::Current(s) => Some(s),
            Self::Rotated { to, .. } => Some(to),
        }
    }
}

/// Rolls the active session over once a timestamp leaves its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRotationPolicy {
    window_ms: i64,
}

impl Default for SessionRotationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

impl SessionRotationPolicy {
    /// Create a policy with window `window_ms`; non-positive values fall back to the default.
    #[must_use]
    pub fn new(window_ms: i64) -> Self {
        let window_ms = if window_ms > 0 {
            window_ms
        } else {
            DEFAULT_WINDOW_MS
        };
        Self { window_ms }
    }

    /// Window length in milliseconds.
    #[must_use]
    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Whether `session` is still younger than the window at `now_ms`.
    #[must_use]
    pub fn is_young(&self, session: &Session, now_ms: i64) -> bool {
        session.is_active() && now_ms.saturating_sub(session.start_epoch_ms) < self.window_ms
    }

    /// Make sure the active session covers `t_ms`, rotating if the window is exceeded.
    ///
    /// Timestamps at or before the current start stay with the current session;
    /// the start is never moved backward.
    pub fn ensure_for_timestamp(&self, store: &SessionStore, t_ms: i64) -> RotationOutcome {
        let outcome = store.transact(|txn| {
            let current = txn.current();
            if !current.is_active() {
                return RotationOutcome::NoSession;
            }
            if t_ms <= current.start_epoch_ms.saturating_add(self.window_ms) {
                return RotationOutcome::Current(current);
            }
            txn.end();
            match txn.begin_next(t_ms) {
                Some(to) => RotationOutcome::Rotated { from: current, to },
                None => RotationOutcome::NoSession,
            }
        });

        if let RotationOutcome::Rotated { from, to } = &outcome {
            tracing::info!(
                from = %from.id,
                to = %to.id,
                start_ms = to.start_epoch_ms,
                window_ms = self.window_ms,
                "session window exceeded, rotated"
            );
        }
        outcome
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn store_with(start: i64) -> SessionStore {
        let store = SessionStore::new(Arc::new(ManualClock::new(start)));
        store.begin_next(start);
        store
    }

    #[test]
    fn no_session_is_never_created() {
        let store = SessionStore::new(Arc::new(ManualClock::new(1)));
        let policy = SessionRotationPolicy::default();
        assert_eq!(policy.ensure_for_timestamp(&store, 50_000), RotationOutcome::NoSession);
        assert!(!store.get().is_active());
    }

    #[test]
    fn timestamps_inside_window_keep_session() {
        let store = store_with(1_000);
        let policy = SessionRotationPolicy::new(10_000);
        for t in [1_000, 5_000, 11_000] {
            let outcome = policy.ensure_for_timestamp(&store, t);
            assert!(matches!(outcome, RotationOutcome::Current(ref s) if s.id == "no_1"));
        }
    }

    #[test]
    fn early_timestamps_never_move_start_backward() {
        let store = store_with(5_000);
        let policy = SessionRotationPolicy::new(10_000);
        policy.ensure_for_timestamp(&store, 10);
        assert_eq!(store.get().start_epoch_ms, 5_000);
    }

    #[test]
    fn crossing_the_window_rotates_to_timestamp() {
        let store = store_with(1_000);
        let policy = SessionRotationPolicy::new(10_000);
        assert!(matches!(
            policy.ensure_for_timestamp(&store, 1_000),
            RotationOutcome::Current(_)
        ));

        let outcome = policy.ensure_for_timestamp(&store, 11_001);
        let RotationOutcome::Rotated { from, to } = outcome else {
            unreachable!("expected rotation, got {:?}", outcome);
        };
        assert_eq!(from.id, "no_1");
        assert_eq!(to.id, "no_2");
        assert_eq!(to.start_epoch_ms, 11_001);
        assert_eq!(store.get(), to);
    }

    #[test]
    fn young_session_check() {
        let policy = SessionRotationPolicy::new(10_000);
        let s = Session::new("no_1", 1_000).expect("valid");
        assert!(policy.is_young(&s, 10_999));
        assert!(!policy.is_young(&s, 11_000));
        assert!(!policy.is_young(&Session::none(), 0));
    }

    #[test]
    fn non_positive_window_falls_back() {
        assert_eq!(SessionRotationPolicy::new(0).window_ms(), DEFAULT_WINDOW_MS);
    }
}
