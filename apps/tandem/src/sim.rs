//! # Simulated Sensor Backend
//!
//! A stand-in for a wearable chest strap publishing a `HeartRate` stream and
//! an `RRinterval` stream at 1 Hz. Samples accrue in real time between pulls,
//! so the inlet host sees the same buffered, drain-to-empty behaviour a device
//! binding would give it.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tandem_core::{SampleSource, StreamDescriptor, StreamDiscovery, TandemError};

const HOST: &str = "tandem-sim";

/// Simulated discovery of one heart-rate strap.
#[derive(Debug, Clone)]
pub struct SimulatedDiscovery {
    epoch: Instant,
    rate_hz: f64,
}

impl Default for SimulatedDiscovery {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl SimulatedDiscovery {
    /// Streams emitting `rate_hz` samples per second.
    #[must_use]
    pub fn new(rate_hz: f64) -> Self {
        Self {
            epoch: Instant::now(),
            rate_hz: rate_hz.max(0.1),
        }
    }

    fn descriptor(&self, name: &str, stream_type: &str) -> StreamDescriptor {
        StreamDescriptor {
            name: name.to_string(),
            stream_type: stream_type.to_string(),
            host: HOST.to_string(),
            source_id: format!("{}-{}", HOST, stream_type.to_lowercase()),
            channel_count: 1,
            declared_rate: self.rate_hz,
        }
    }
}

impl StreamDiscovery for SimulatedDiscovery {
    fn resolve(&self, _timeout: Duration) -> Result<Vec<StreamDescriptor>, TandemError> {
        Ok(vec![
            self.descriptor("HeartRate", "HR"),
            self.descriptor("RRinterval", "RR"),
        ])
    }

    fn open(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn SampleSource>, TandemError> {
        let signal = match descriptor.stream_type.as_str() {
            "HR" => Signal::HeartRate,
            "RR" => Signal::RrInterval,
            other => {
                return Err(TandemError::Transport(format!(
                    "Simulator has no stream of type {}",
                    other
                )));
            }
        };
        let now = self.epoch.elapsed().as_secs_f64();
        Ok(Box::new(SimulatedSource {
            epoch: self.epoch,
            period: 1.0 / self.rate_hz,
            next_ts: now,
            signal,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    HeartRate,
    RrInterval,
}

impl Signal {
    fn value_at(self, t: f64) -> f64 {
        let bpm = 72.0 + 6.0 * (t / 15.0).sin();
        match self {
            Self::HeartRate => bpm,
            Self::RrInterval => 60_000.0 / bpm,
        }
    }
}

struct SimulatedSource {
    epoch: Instant,
    period: f64,
    next_ts: f64,
    signal: Signal,
}

impl SampleSource for SimulatedSource {
    fn pull_sample(&mut self, buf: &mut Vec<f64>) -> Result<Option<f64>, TandemError> {
        if self.next_ts > self.local_clock() {
            return Ok(None);
        }
        let ts = self.next_ts;
        buf.push(self.signal.value_at(ts));
        self.next_ts += self.period;
        Ok(Some(ts))
    }

    fn time_correction(&mut self) -> Result<f64, TandemError> {
        Ok(0.0)
    }

    fn local_clock(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// Discovery that never sees any stream; used when no device backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDiscovery;

impl StreamDiscovery for NullDiscovery {
    fn resolve(&self, _timeout: Duration) -> Result<Vec<StreamDescriptor>, TandemError> {
        Ok(Vec::new())
    }

    fn open(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn SampleSource>, TandemError> {
        Err(TandemError::Transport(format!(
            "No backend can open {}",
            descriptor.name
        )))
    }
}

/// Discovery backend for `tandem run`.
#[must_use]
pub fn backend(simulate: bool) -> Arc<dyn StreamDiscovery> {
    if simulate {
        tracing::info!("using simulated heart-rate strap");
        Arc::new(SimulatedDiscovery::default())
    } else {
        tracing::warn!("no device backend configured, pull-side streams will not be found");
        Arc::new(NullDiscovery)
    }
}
