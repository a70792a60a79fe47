//! # Clock Module
//!
//! Epoch-millisecond time that never runs backward.
//!
//! The wall clock is read exactly once, when a [`MonotonicClock`] is created.
//! Every later reading is that anchor plus the elapsed time of the monotonic
//! counter, so NTP steps or manual clock changes cannot reorder timestamps
//! taken inside one process.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A source of epoch milliseconds, shareable across threads.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

// =============================================================================
// MONOTONIC CLOCK
// =============================================================================

/// Wall-anchored monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor_epoch_ms: i64,
    anchor: Instant,
}

impl MonotonicClock {
    /// Capture the wall clock and the monotonic counter together.
    #[must_use]
    pub fn new() -> Self {
        let anchor_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self::with_anchor(anchor_epoch_ms)
    }

    /// Anchor the clock at an explicit epoch instead of the wall clock.
    #[must_use]
    pub fn with_anchor(anchor_epoch_ms: i64) -> Self {
        Self {
            anchor_epoch_ms,
            anchor: Instant::now(),
        }
    }

    /// The epoch captured at construction.
    #[must_use]
    pub fn anchor_epoch_ms(&self) -> i64 {
        self.anchor_epoch_ms
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> i64 {
        let elapsed = self.anchor.elapsed().as_millis() as i64;
        self.anchor_epoch_ms.saturating_add(elapsed)
    }
}

// =============================================================================
// MANUAL CLOCK
// =============================================================================

/// Clock that only moves when told to. Used by tests and replay tools.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `start_ms`.
    #[must_use]
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    /// Move forward by `delta_ms`.
    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// =============================================================================
// FORMATTING
// =============================================================================

fn to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// File-name stamp, e.g. `2025-03-01_09-15-02.417Z`.
#[must_use]
pub fn file_stamp_utc(ms: i64) -> String {
    to_utc(ms).format("%Y-%m-%d_%H-%M-%S%.3fZ").to_string()
}

/// Human-readable UTC time, e.g. `2025-03-01 09:15:02.417`.
#[must_use]
pub fn iso_utc(ms: i64) -> String {
    to_utc(ms).format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

// =============================================================================
// TESTS
// =============================================================================
