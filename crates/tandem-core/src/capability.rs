//! # Capability Module
//!
//! Small contracts the coordinator drives at run boundaries.
//!
//! A supervised run needs two things from the components it does not own:
//! writers that can be flushed and closed on demand, and producers that can be
//! switched on after registration and off after the last flush. Components
//! opt in by implementing these traits and being registered with the
//! coordinator.

use crate::types::TandemError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A writer that can be forced to persist and release its file.
pub trait Flushable: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Flush buffered data and close the current file.
    ///
    /// Must be safe to call repeatedly; a later write opens a new file.
    fn flush_and_close(&self) -> Result<(), TandemError>;
}

/// A data producer that can be enabled and disabled.
pub trait Producer: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Switch production on or off.
    fn set_enabled(&self, enabled: bool);

    /// Whether production is on.
    fn is_enabled(&self) -> bool;
}

/// Shared on/off switch that a producer loop polls.
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    name: String,
    enabled: Arc<AtomicBool>,
}

impl ProducerHandle {
    /// Create a handle, initially enabled or not.
    #[must_use]
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }
}

impl Producer for ProducerHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            tracing::debug!(producer = %self.name, enabled, "producer toggled");
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}
