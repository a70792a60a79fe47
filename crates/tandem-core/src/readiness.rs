//! # Readiness Module
//!
//! Gate that opens the first session only once every expected modality has
//! delivered at least one piece of data.
//!
//! Producers start at different moments: the wearable stream may be found
//! seconds before the headset begins uploading. Until all modalities have
//! reported, pushed data is acknowledged but not persisted. The moment the last
//! modality reports, the tracker allocates the next session id and begins it,
//! exactly once. Flags latch until [`ReadinessTracker::reset`].
//!
//! ## Lock Order
//!
//! The readiness lock is held while calling into [`SessionStore`], so the order
//! is always readiness -> session. The store never calls back.

use crate::session::SessionStore;
use crate::types::{Modality, Session};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Result of one arrival notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The modality is not part of the tracked set.
    Unknown,
    /// First arrival recorded; still waiting for others.
    Waiting { received: usize, expected: usize },
    /// This arrival completed the set and began a session.
    SessionStarted(Session),
    /// The modality had already reported, or the gate is already open.
    NoChange,
}

#[derive(Debug)]
struct ReadinessInner {
    flags: BTreeMap<Modality, bool>,
    fired: bool,
}

/// Per-modality arrival flags with a one-shot session trigger.
#[derive(Debug)]
pub struct ReadinessTracker {
    inner: Mutex<ReadinessInner>,
    store: Arc<SessionStore>,
}

impl ReadinessTracker {
    /// Track `modalities`; an empty set is ready immediately without starting a session.
    pub fn new(modalities: impl IntoIterator<Item = Modality>, store: Arc<SessionStore>) -> Self {
        let flags = modalities.into_iter().map(|m| (m, false)).collect();
        Self {
            inner: Mutex::new(ReadinessInner {
                flags,
                fired: false,
            }),
            store,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReadinessInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that `modality` delivered data.
    ///
    /// Idempotent: only the first call per modality changes anything, and only
    /// the call that completes the set begins a session.
    pub fn notify_received(&self, modality: &str) -> NotifyOutcome {
        let key = Modality::new(modality);
        let outcome = {
            let mut inner = self.lock();
            match inner.flags.get(&key).copied() {
                None => NotifyOutcome::Unknown,
                Some(true) => NotifyOutcome::NoChange,
                Some(false) => {
                    inner.flags.insert(key.clone(), true);
                    let expected = inner.flags.len();
                    let received = inner.flags.values().filter(|r| **r).count();
                    if inner.fired || received < expected {
                        NotifyOutcome::Waiting { received, expected }
                    } else {
                        inner.fired = true;
                        let now = self.store.now_ms();
                        match self.store.transact(|txn| txn.begin_next(now)) {
                            Some(session) => NotifyOutcome::SessionStarted(session),
                            None => NotifyOutcome::NoChange,
                        }
                    }
                }
            }
        };

        match &outcome {
            NotifyOutcome::Unknown => {
                tracing::warn!(modality = %key, "notification for untracked modality ignored");
            }
            NotifyOutcome::Waiting { received, expected } => {
                tracing::info!(modality = %key, "modality received, waiting ({}/{})", received, expected);
            }
            NotifyOutcome::SessionStarted(s) => {
                tracing::info!(
                    modality = %key,
                    session = %s.id,
                    start_ms = s.start_epoch_ms,
                    "all modalities ready, session started"
                );
            }
            NotifyOutcome::NoChange => {}
        }
        outcome
    }

    /// Whether the gate is open.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let inner = self.lock();
        inner.fired || inner.flags.is_empty()
    }

    /// Copy of the per-modality flags.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        self.lock()
            .flags
            .iter()
            .map(|(m, r)| (m.as_str().to_string(), *r))
            .collect()
    }

    /// Tracked modality names.
    #[must_use]
    pub fn expected(&self) -> Vec<Modality> {
        self.lock().flags.keys().cloned().collect()
    }

    /// Clear every flag and close the gate.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.fired = false;
        for flag in inner.flags.values_mut() {
            *flag = false;
        }
        drop(inner);
        tracing::info!("modality readiness reset");
    }
}

// =============================================================================
// FIRST-SAVE LOG GATE
// =============================================================================

/// Remembers, per modality, the session of the last logged save so that each
/// session logs its first persisted artifact exactly once.
#[derive(Debug, Default)]
pub struct FirstSaveLog {
    last: Mutex<HashMap<String, String>>,
}

impl FirstSaveLog {
    /// Create an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` the first time `modality` saves under `session_id`.
    pub fn first_for_session(&self, modality: &str, session_id: &str) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match last.get(modality) {
            Some(prev) if prev == session_id => false,
            _ => {
                last.insert(modality.to_string(), session_id.to_string());
                true
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
