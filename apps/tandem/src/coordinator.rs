//! # Experiment Coordinator
//!
//! Supervises one end-to-end recording run:
//!
//! ```text
//! Idle -> WaitingForStreams -> Recording -> Grace -> Stopping -> Done
//! ```
//!
//! The session is registered externally and begun locally before any producer
//! is switched on, so the first sample of every modality already carries the
//! run's id and anchor. On the way out, writers are flushed before the session
//! ends and producers are switched off last.
//!
//! All waiting uses tokio timers; nothing here blocks a runtime thread.

use crate::registrar::Registrar;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{
    Flushable, Producer, Session, SessionStore, StreamDiscovery, TandemError,
    discovery::matches_all_keywords,
};
use tokio::sync::watch;
use tokio::time::Instant;

/// Run phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    WaitingForStreams,
    Recording,
    Grace,
    Stopping,
    Done,
}

/// Timing and matching parameters of a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub record: Duration,
    pub grace: Duration,
    pub poll: Duration,
    pub resolve_timeout: Duration,
    /// Give up waiting for streams after this long and record anyway.
    pub wait_timeout: Option<Duration>,
    /// Every keyword must appear in some stream's name, type or source id.
    pub keywords: Vec<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            record: Duration::from_secs(10),
            grace: Duration::from_secs(2),
            poll: Duration::from_millis(250),
            resolve_timeout: Duration::from_millis(200),
            wait_timeout: None,
            keywords: vec!["HR".to_string(), "RR".to_string()],
        }
    }
}

/// What a completed run recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub session: Session,
    pub ended_ms: i64,
    /// `false` when the stream wait timed out.
    pub streams_matched: bool,
}

/// State machine driving one supervised run at a time.
pub struct ExperimentCoordinator<R: Registrar> {
    settings: RunSettings,
    discovery: Arc<dyn StreamDiscovery>,
    store: Arc<SessionStore>,
    registrar: R,
    flushables: Vec<Arc<dyn Flushable>>,
    producers: Vec<Arc<dyn Producer>>,
    state: watch::Sender<RunState>,
}

impl<R: Registrar> ExperimentCoordinator<R> {
    /// Create an idle coordinator.
    #[must_use]
    pub fn new(
        settings: RunSettings,
        discovery: Arc<dyn StreamDiscovery>,
        store: Arc<SessionStore>,
        registrar: R,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            settings,
            discovery,
            store,
            registrar,
            flushables: Vec::new(),
            producers: Vec::new(),
            state,
        }
    }

    /// Flush and close `writer` when a run stops.
    pub fn add_flushable(&mut self, writer: Arc<dyn Flushable>) {
        self.flushables.push(writer);
    }

    /// Enable `producer` at recording start and disable it after stopping.
    pub fn add_producer(&mut self, producer: Arc<dyn Producer>) {
        self.producers.push(producer);
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Observe phase changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    fn enter(&self, next: RunState) {
        self.state.send_replace(next);
        tracing::debug!(state = ?next, "coordinator state");
    }

    /// Perform one complete run.
    ///
    /// Fails with `InvalidState` unless the coordinator is `Idle` or `Done`.
    pub async fn run(&self) -> Result<RunSummary, TandemError> {
        let claimed = self.state.send_if_modified(|s| {
            if matches!(s, RunState::Idle | RunState::Done) {
                *s = RunState::WaitingForStreams;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(TandemError::InvalidState(format!(
                "run already in progress ({:?})",
                self.state()
            )));
        }

        tracing::info!(keywords = ?self.settings.keywords, "waiting for streams");
        let streams_matched = self.wait_for_streams().await;

        // Register and begin before any producer starts.
        let id = self.store.allocate_id();
        let start = self.store.now_ms();
        let Some(session) = Session::new(&id, start) else {
            self.enter(RunState::Done);
            return Err(TandemError::InvalidState(format!(
                "clock reading {} cannot anchor a session",
                start
            )));
        };
        if let Err(e) = self.registrar.register(&session).await {
            tracing::warn!(error = %e, session = %session.id, "registration failed, continuing with local session");
        }
        self.store.begin(&session.id, session.start_epoch_ms);
        for p in &self.producers {
            p.set_enabled(true);
        }
        self.enter(RunState::Recording);
        tracing::info!(
            session = %session.id,
            start_ms = session.start_epoch_ms,
            duration_ms = self.settings.record.as_millis() as u64,
            "recording started"
        );

        tokio::time::sleep(self.settings.record).await;

        self.enter(RunState::Grace);
        if !self.settings.grace.is_zero() {
            tracing::info!(grace_ms = self.settings.grace.as_millis() as u64, "grace period for last uploads");
            tokio::time::sleep(self.settings.grace).await;
        }

        self.enter(RunState::Stopping);
        for w in &self.flushables {
            if let Err(e) = w.flush_and_close() {
                tracing::error!(writer = w.name(), error = %e, "flush failed");
            }
        }
        self.store.end();
        for p in &self.producers {
            p.set_enabled(false);
        }

        let ended_ms = self.store.now_ms();
        tracing::info!(session = %session.id, end_ms = ended_ms, "recording stopped");
        self.enter(RunState::Done);
        Ok(RunSummary {
            session,
            ended_ms,
            streams_matched,
        })
    }

    /// Poll discovery until the keyword filter matches or the wait times out.
    async fn wait_for_streams(&self) -> bool {
        let started = Instant::now();
        loop {
            let discovery = Arc::clone(&self.discovery);
            let timeout = self.settings.resolve_timeout;
            let resolved = tokio::task::spawn_blocking(move || discovery.resolve(timeout))
                .await
                .map_err(|e| TandemError::Discovery(e.to_string()))
                .and_then(|r| r);

            match resolved {
                Ok(streams) if !streams.is_empty() => {
                    if matches_all_keywords(&streams, &self.settings.keywords) {
                        tracing::info!(streams = streams.len(), "streams ready");
                        return true;
                    }
                    let names: Vec<String> = streams.iter().map(|s| s.search_blob()).collect();
                    tracing::debug!(?names, "streams found but keywords not matched yet");
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "discovery failed, retrying"),
            }

            let expired = self.settings.wait_timeout.filter(|limit| started.elapsed() >= *limit);
            if let Some(limit) = expired {
                tracing::warn!(timeout_ms = limit.as_millis() as u64, "stream wait timed out, recording anyway");
                return false;
            }
            tokio::time::sleep(self.settings.poll).await;
        }
    }
}
