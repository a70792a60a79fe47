//! # Discovery Module
//!
//! Interface to the external stream network.
//!
//! The session engine never talks to a device binding directly. A
//! [`StreamDiscovery`] lists the streams currently visible and opens a
//! [`SampleSource`] for one of them; the app provides either a real binding or
//! the built-in simulator.

use crate::types::TandemError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One stream as reported by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    pub stream_type: String,
    pub host: String,
    pub source_id: String,
    pub channel_count: u32,
    /// Nominal sampling rate in Hz; `0.0` for irregular streams.
    pub declared_rate: f64,
}

impl StreamDescriptor {
    /// Identity used for found/lost tracking: name plus type.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}|{}", self.name, self.stream_type)
    }

    /// Lowercased `name=..,type=..,sid=..` blob for keyword matching.
    #[must_use]
    pub fn search_blob(&self) -> String {
        format!(
            "name={},type={},sid={}",
            self.name, self.stream_type, self.source_id
        )
        .to_lowercase()
    }
}

/// Whether every keyword appears (case-insensitive) in at least one descriptor.
///
/// An empty keyword list always matches, even with no descriptors.
#[must_use]
pub fn matches_all_keywords(streams: &[StreamDescriptor], keywords: &[String]) -> bool {
    let blobs: Vec<String> = streams.iter().map(StreamDescriptor::search_blob).collect();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .all(|k| blobs.iter().any(|b| b.contains(&k)))
}

/// Lists visible streams and opens them.
pub trait StreamDiscovery: Send + Sync {
    /// Streams visible within `timeout`.
    fn resolve(&self, timeout: Duration) -> Result<Vec<StreamDescriptor>, TandemError>;

    /// Open a pull connection to `descriptor`.
    fn open(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn SampleSource>, TandemError>;
}

/// Pull side of one open stream.
pub trait SampleSource: Send {
    /// Pop one buffered sample into `buf`, returning its device timestamp in
    /// seconds, or `None` when the buffer is empty.
    fn pull_sample(&mut self, buf: &mut Vec<f64>) -> Result<Option<f64>, TandemError>;

    /// Offset in seconds to add to device timestamps to get local stream-clock time.
    fn time_correction(&mut self) -> Result<f64, TandemError>;

    /// Current stream-clock time in seconds.
    fn local_clock(&self) -> f64;
}
