//! # Inlet Host
//!
//! The cooperative tick loop of the pull side.
//!
//! Each tick the host applies pending found/lost events from the resolver,
//! binding a [`ClockCorrectedInlet`] to every found stream that matches a
//! configured binding and dropping the inlet of every lost one. It then drains
//! each bound inlet into the recorder of its modality. A faulted inlet is
//! dropped and its stream forgotten by the resolver, so the next poll that
//! still sees the stream announces it again and the host rebinds.
//!
//! Ticks run on the blocking pool: pulls and recorder writes touch files.

use crate::config::StreamBinding;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tandem_core::{
    ClockCorrectedInlet, Modality, Producer, ProducerHandle, SensorRecorder, SessionStore,
    StreamDescriptor, StreamEvent, StreamResolver,
};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

/// Counters from one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub bound: usize,
    pub unbound: usize,
    pub pulled: usize,
    pub written: usize,
    pub faults: usize,
}

/// Pull-side driver owning every bound inlet.
pub struct InletHost {
    resolver: Arc<StreamResolver>,
    events: Receiver<StreamEvent>,
    bindings: Vec<StreamBinding>,
    recorders: HashMap<Modality, Arc<SensorRecorder>>,
    inlets: HashMap<String, ClockCorrectedInlet>,
    store: Arc<SessionStore>,
    producer: ProducerHandle,
    correction_interval_ms: i64,
}

impl InletHost {
    /// Create a host subscribed to `resolver`.
    #[must_use]
    pub fn new(
        resolver: Arc<StreamResolver>,
        bindings: Vec<StreamBinding>,
        store: Arc<SessionStore>,
        producer: ProducerHandle,
        correction_interval_ms: i64,
    ) -> Self {
        let events = resolver.subscribe();
        Self {
            resolver,
            events,
            bindings,
            recorders: HashMap::new(),
            inlets: HashMap::new(),
            store,
            producer,
            correction_interval_ms,
        }
    }

    /// Route samples of `recorder`'s modality into it.
    pub fn add_recorder(&mut self, recorder: Arc<SensorRecorder>) {
        self.recorders.insert(recorder.modality().clone(), recorder);
    }

    /// Number of currently bound inlets.
    #[must_use]
    pub fn bound(&self) -> usize {
        self.inlets.len()
    }

    fn binding_for(&self, desc: &StreamDescriptor) -> Option<Modality> {
        self.bindings
            .iter()
            .find(|b| {
                b.name == desc.name
                    && b.stream_type
                        .as_deref()
                        .is_none_or(|t| t.eq_ignore_ascii_case(&desc.stream_type))
            })
            .map(|b| Modality::new(&b.modality))
    }

    fn apply_events(&mut self, report: &mut TickReport) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                StreamEvent::Found(desc) => {
                    if self.inlets.contains_key(&desc.key()) {
                        continue;
                    }
                    let Some(modality) = self.binding_for(&desc) else {
                        tracing::debug!(stream = %desc.name, "no binding for stream, ignored");
                        continue;
                    };
                    match self.resolver.discovery().open(&desc) {
                        Ok(source) => {
                            tracing::info!(stream = %desc.name, modality = %modality, "inlet bound");
                            let inlet = ClockCorrectedInlet::new(
                                desc.clone(),
                                modality,
                                source,
                                self.correction_interval_ms,
                            );
                            self.inlets.insert(desc.key(), inlet);
                            report.bound += 1;
                        }
                        Err(e) => {
                            tracing::warn!(stream = %desc.name, error = %e, "cannot open stream");
                        }
                    }
                }
                StreamEvent::Lost(desc) => {
                    if self.inlets.remove(&desc.key()).is_some() {
                        tracing::info!(stream = %desc.name, "inlet unbound");
                        report.unbound += 1;
                    }
                }
            }
        }
    }

    /// Apply stream events, then drain every bound inlet.
    ///
    /// While the producer switch is off, samples are drained and discarded.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        self.apply_events(&mut report);

        let now = self.store.now_ms();
        let enabled = self.producer.is_enabled();
        let mut faulted = Vec::new();

        for (key, inlet) in &mut self.inlets {
            let recorder = self.recorders.get(inlet.modality()).filter(|_| enabled);
            let mut written = 0;
            let pull = inlet.pull_all(now, |sample| {
                let Some(recorder) = recorder else {
                    return;
                };
                match recorder.record(sample) {
                    Ok(true) => written += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(modality = %recorder.modality(), error = %e, "sample write failed");
                    }
                }
            });
            report.pulled += pull.pulled;
            report.written += written;
            if pull.fault.is_some() {
                report.faults += 1;
                faulted.push(key.clone());
            }
        }
        for key in faulted {
            self.inlets.remove(&key);
            self.resolver.forget(&key);
        }
        report
    }

    /// Tick every `period` until `shutdown` turns true.
    pub async fn run(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(period_ms = period.as_millis() as u64, "inlet host started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ticked = tokio::task::spawn_blocking(move || {
                        let report = self.tick();
                        (self, report)
                    })
                    .await;
                    match ticked {
                        Ok((host, report)) => {
                            self = host;
                            if report.faults > 0 {
                                tracing::warn!(faults = report.faults, "inlets dropped after transport faults");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "inlet tick failed, host stopped");
                            return;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(bound = self.inlets.len(), "inlet host stopped");
    }
}

// =============================================================================
// TESTS
// =============================================================================
