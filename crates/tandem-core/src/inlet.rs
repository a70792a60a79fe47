//! # Inlet Module
//!
//! Pull consumer bound to one discovered stream.
//!
//! Each host tick the inlet drains every buffered sample and hands it to a
//! callback together with its device timestamp converted to local epoch
//! milliseconds. The remote/local clock offset is cached and refreshed at most
//! once per correction interval.
//!
//! Conversion:
//!
//! ```text
//! local_ms = now_ms + (device_ts + offset - device_now) * 1000
//! ```
//!
//! where `device_now` is the stream clock read at pull time. A transport fault
//! disables the inlet; the caller decides whether to rebind on the next `Found`.

use crate::discovery::{SampleSource, StreamDescriptor};
use crate::types::{Modality, TandemError};

/// Default interval between clock-offset refreshes.
pub const DEFAULT_CORRECTION_INTERVAL_MS: i64 = 1_000;

/// One drained sample.
#[derive(Debug, Clone, PartialEq)]
pub struct InletSample {
    /// Device timestamp in stream-clock seconds.
    pub device_ts: f64,
    /// Device timestamp converted to local epoch milliseconds.
    pub local_ms: i64,
    /// Channel values.
    pub values: Vec<f64>,
}

/// Outcome of one drain.
#[derive(Debug, Default)]
pub struct PullReport {
    /// Samples delivered to the callback.
    pub pulled: usize,
    /// Set when the drain stopped on a transport fault.
    pub fault: Option<TandemError>,
}

/// Drain-to-empty consumer with cached clock correction.
pub struct ClockCorrectedInlet {
    descriptor: StreamDescriptor,
    modality: Modality,
    source: Box<dyn SampleSource>,
    correction_interval_ms: i64,
    offset_s: f64,
    next_correction_ms: Option<i64>,
    enabled: bool,
    buf: Vec<f64>,
}

impl std::fmt::Debug for ClockCorrectedInlet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockCorrectedInlet")
            .field("stream", &self.descriptor.name)
            .field("modality", &self.modality)
            .field("offset_s", &self.offset_s)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ClockCorrectedInlet {
    /// Bind `source` for `descriptor`, feeding `modality`.
    #[must_use]
    pub fn new(
        descriptor: StreamDescriptor,
        modality: Modality,
        source: Box<dyn SampleSource>,
        correction_interval_ms: i64,
    ) -> Self {
        let channels = descriptor.channel_count.max(1) as usize;
        Self {
            descriptor,
            modality,
            source,
            correction_interval_ms: correction_interval_ms.max(1),
            offset_s: 0.0,
            next_correction_ms: None,
            enabled: true,
            buf: Vec::with_capacity(channels),
        }
    }

    /// The stream this inlet is bound to.
    #[must_use]
    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// The modality this inlet feeds.
    #[must_use]
    pub fn modality(&self) -> &Modality {
        &self.modality
    }

    /// Whether the inlet still pulls.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Last cached clock offset in seconds.
    #[must_use]
    pub fn offset_s(&self) -> f64 {
        self.offset_s
    }

    fn refresh_offset(&mut self, now_ms: i64) {
        if self.next_correction_ms.is_some_and(|due| now_ms < due) {
            return;
        }
        match self.source.time_correction() {
            Ok(offset) => self.offset_s = offset,
            Err(e) => {
                tracing::warn!(stream = %self.descriptor.name, error = %e, "time correction failed, keeping cached offset");
            }
        }
        self.next_correction_ms = Some(now_ms.saturating_add(self.correction_interval_ms));
    }

    /// Drain every buffered sample, calling `on_sample` for each.
    ///
    /// A disabled inlet returns an empty report without touching the source.
    pub fn pull_all(&mut self, now_ms: i64, mut on_sample: impl FnMut(&InletSample)) -> PullReport {
        let mut report = PullReport::default();
        if !self.enabled {
            return report;
        }
        self.refresh_offset(now_ms);

        loop {
            self.buf.clear();
            match self.source.pull_sample(&mut self.buf) {
                Ok(Some(device_ts)) => {
                    let device_now = self.source.local_clock();
                    let delta_ms = ((device_ts + self.offset_s - device_now) * 1000.0).round() as i64;
                    let sample = InletSample {
                        device_ts,
                        local_ms: now_ms.saturating_add(delta_ms),
                        values: self.buf.clone(),
                    };
                    on_sample(&sample);
                    report.pulled += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(
                        stream = %self.descriptor.name,
                        modality = %self.modality,
                        error = %e,
                        "transport fault, inlet disabled"
                    );
                    self.enabled = false;
                    report.fault = Some(e);
                    break;
                }
            }
        }
        report
    }
}

// =============================================================================
// TESTS
// =============================================================================
