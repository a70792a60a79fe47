//! # Resolver Module
//!
//! Found/lost tracking of external streams on a dedicated poll thread.
//!
//! Each poll asks [`StreamDiscovery`] for the visible streams and diffs them
//! against the known set by [`StreamDescriptor::key`]. A stream missing from a
//! single poll is reported lost immediately; there is no hysteresis. Observers
//! subscribe through channels and, when they subscribe late, first receive a
//! `Found` for every stream already known.

use crate::discovery::{StreamDescriptor, StreamDiscovery};
use crate::types::TandemError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default poll period.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(100);

/// Granularity at which the poll thread checks its stop flag while idle.
const STOP_CHECK: Duration = Duration::from_millis(10);

/// Stream visibility change.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Found(StreamDescriptor),
    Lost(StreamDescriptor),
}

#[derive(Default)]
struct ResolverInner {
    known: BTreeMap<String, StreamDescriptor>,
    subscribers: Vec<Sender<StreamEvent>>,
}

impl ResolverInner {
    fn publish(&mut self, event: &StreamEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Polls discovery and fans out found/lost events.
pub struct StreamResolver {
    discovery: Arc<dyn StreamDiscovery>,
    resolve_timeout: Duration,
    inner: Mutex<ResolverInner>,
}

impl std::fmt::Debug for StreamResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResolver")
            .field("resolve_timeout", &self.resolve_timeout)
            .field("known", &self.known().len())
            .finish()
    }
}

impl StreamResolver {
    /// Create a resolver over `discovery`, waiting at most `resolve_timeout` per poll.
    #[must_use]
    pub fn new(discovery: Arc<dyn StreamDiscovery>, resolve_timeout: Duration) -> Self {
        Self {
            discovery,
            resolve_timeout,
            inner: Mutex::new(ResolverInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResolverInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The discovery backend, for opening inlets on found streams.
    #[must_use]
    pub fn discovery(&self) -> &Arc<dyn StreamDiscovery> {
        &self.discovery
    }

    /// Subscribe to events; every currently-known stream is replayed as `Found`.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<StreamEvent> {
        let (tx, rx) = channel();
        let mut inner = self.lock();
        for desc in inner.known.values() {
            // The receiver is still in scope, so this cannot fail.
            let _ = tx.send(StreamEvent::Found(desc.clone()));
        }
        inner.subscribers.push(tx);
        rx
    }

    /// Streams currently considered visible.
    #[must_use]
    pub fn known(&self) -> Vec<StreamDescriptor> {
        self.lock().known.values().cloned().collect()
    }

    /// Drop `key` from the known set without publishing `Lost`.
    ///
    /// If the stream is still visible, the next poll announces it as `Found`
    /// again, which lets a consumer that gave up on a faulted stream rebind.
    pub fn forget(&self, key: &str) -> bool {
        let forgotten = self.lock().known.remove(key);
        if let Some(desc) = &forgotten {
            tracing::debug!(stream = %desc.name, "stream forgotten, will be re-announced");
        }
        forgotten.is_some()
    }

    /// Run one discovery poll and publish the differences.
    ///
    /// On a discovery fault the known set is left untouched.
    pub fn poll_once(&self) -> Result<(), TandemError> {
        let visible = self.discovery.resolve(self.resolve_timeout)?;
        let visible: BTreeMap<String, StreamDescriptor> =
            visible.into_iter().map(|d| (d.key(), d)).collect();

        let mut inner = self.lock();
        let lost: Vec<String> = inner
            .known
            .keys()
            .filter(|k| !visible.contains_key(*k))
            .cloned()
            .collect();
        for key in lost {
            if let Some(desc) = inner.known.remove(&key) {
                tracing::info!(stream = %desc.name, stream_type = %desc.stream_type, "stream lost");
                inner.publish(&StreamEvent::Lost(desc));
            }
        }
        for (key, desc) in visible {
            if !inner.known.contains_key(&key) {
                tracing::info!(
                    stream = %desc.name,
                    stream_type = %desc.stream_type,
                    host = %desc.host,
                    "stream found"
                );
                inner.known.insert(key, desc.clone());
                inner.publish(&StreamEvent::Found(desc));
            }
        }
        Ok(())
    }

    /// Start the poll loop on its own thread.
    pub fn spawn(self: &Arc<Self>, period: Duration) -> Result<ResolverHandle, TandemError> {
        let stop = Arc::new(AtomicBool::new(false));
        let resolver = Arc::clone(self);
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("tandem-resolver".to_string())
            .spawn(move || {
                tracing::debug!(period_ms = period.as_millis() as u64, "resolver loop started");
                while !flag.load(Ordering::SeqCst) {
                    if let Err(e) = resolver.poll_once() {
                        tracing::warn!(error = %e, "discovery poll skipped");
                    }
                    let deadline = Instant::now() + period;
                    while !flag.load(Ordering::SeqCst) && Instant::now() < deadline {
                        std::thread::sleep(STOP_CHECK.min(period));
                    }
                }
                tracing::debug!("resolver loop stopped");
            })?;
        Ok(ResolverHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Stops and joins the poll thread.
#[derive(Debug)]
pub struct ResolverHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ResolverHandle {
    /// Signal the loop and wait up to `timeout` for it to exit.
    ///
    /// Returns `false` if the thread was still running at the deadline; it is
    /// then detached.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        let Some(thread) = self.thread.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "resolver thread did not stop in time");
                return false;
            }
            std::thread::sleep(STOP_CHECK);
        }
        thread.join().is_ok()
    }
}

impl Drop for ResolverHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// TESTS
// =============================================================================
