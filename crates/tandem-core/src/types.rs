//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the session engine:
//! - `Session` snapshots and their lifecycle events
//! - `Modality` names for the independent data producers
//! - `TandemError`, the single error type of the core
//!
//! ## Session Invariant
//!
//! A session id is non-empty exactly when its start epoch is positive.
//! `Session::none()` is the only inactive value; every constructor that
//! could break the invariant returns `None` instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Session label used when data is persisted while no session is active.
pub const NO_SESSION: &str = "no_session";

// =============================================================================
// SESSION
// =============================================================================

/// Snapshot of the shared session record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Session {
    /// Session identifier (`no_1`, `no_2`, ... or externally supplied).
    pub id: String,
    /// Session anchor in epoch milliseconds, `0` when inactive.
    pub start_epoch_ms: i64,
}

impl Session {
    /// Build an active session, rejecting ids that are blank or starts that are not positive.
    #[must_use]
    pub fn new(id: &str, start_epoch_ms: i64) -> Option<Self> {
        let id = id.trim();
        if id.is_empty() || start_epoch_ms <= 0 {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            start_epoch_ms,
        })
    }

    /// The inactive session.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether this snapshot describes an active session.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.id.is_empty() && self.start_epoch_ms > 0
    }

    /// Session id for file labels, falling back to [`NO_SESSION`].
    #[must_use]
    pub fn label(&self) -> &str {
        if self.is_active() {
            &self.id
        } else {
            NO_SESSION
        }
    }

    /// Start epoch if active.
    #[must_use]
    pub fn start(&self) -> Option<i64> {
        self.is_active().then_some(self.start_epoch_ms)
    }
}

/// Lifecycle notification fanned out to session subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session began (including the second half of a rotation).
    Begun(Session),
    /// The active session ended.
    Ended(Session),
}

// =============================================================================
// MODALITY
// =============================================================================

/// Name of one independent data-producing source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Modality(String);

impl Modality {
    /// Heart rate from the wearable sensor.
    pub const HR: &'static str = "hr";
    /// RR interval from the wearable sensor.
    pub const RR: &'static str = "rr";
    /// Gaze records pushed by the head-mounted device.
    pub const EYE: &'static str = "eye";
    /// Microphone waveform pushed by the head-mounted device.
    pub const AUDIO: &'static str = "audio";

    /// Create a modality name; names are case-insensitive and stored lowercase.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_ascii_lowercase())
    }

    /// The default gated set: `hr`, `rr`, `eye`, `audio`.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        [Self::HR, Self::RR, Self::EYE, Self::AUDIO]
            .into_iter()
            .map(Self::new)
            .collect()
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Modality {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// =============================================================================
// ERROR TYPE
// =============================================================================

/// Errors that can occur in the Tandem core and app.
#[derive(Debug, Error)]
pub enum TandemError {
    /// A file could not be created, written or flushed.
    #[error("I/O error: {0}")]
    IoError(String),

    /// A stream connection failed while pulling samples.
    #[error("Transport fault: {0}")]
    Transport(String),

    /// Stream discovery failed for one poll.
    #[error("Discovery fault: {0}")]
    Discovery(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An operation was requested from a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The external registration service rejected or did not answer.
    #[error("Registration failed: {0}")]
    Registration(String),

    /// The listener could not bind its address.
    #[error("Bind failed on {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

impl From<std::io::Error> for TandemError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for TandemError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
