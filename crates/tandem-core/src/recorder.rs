//! # Recorder Module
//!
//! CSV sink for pulled sensor samples (heart rate, RR interval).
//!
//! The first sample ever seen reports the modality to the readiness gate.
//! Samples are written only while a session is active, one file per session:
//! when the active session id changes the current file is closed (with its
//! JSON sidecar) and a new one is opened under the new session's name.

use crate::artifact::{ArtifactName, create_unique, file_name, sibling};
use crate::capability::Flushable;
use crate::clock::iso_utc;
use crate::inlet::InletSample;
use crate::readiness::ReadinessTracker;
use crate::session::SessionStore;
use crate::types::{Modality, Session, TandemError};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// CSV header of every sensor file.
pub const SENSOR_CSV_HEADER: &str =
    "utc_ms,utc_iso,device_ts,value,session,session_start_utc_ms,session_start_utc_iso";

const WRITE_BUFFER: usize = 64 * 1024;

/// Sidecar written when a sensor file is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorMeta {
    pub session: String,
    pub base_utc_ms: i64,
    pub samples: u64,
    pub first_sample_utc_ms: Option<i64>,
    pub last_sample_utc_ms: Option<i64>,
    pub csv: String,
}

struct OpenCsv {
    writer: BufWriter<File>,
    path: PathBuf,
    session: Session,
    samples: u64,
    first_ms: Option<i64>,
    last_ms: Option<i64>,
}

impl OpenCsv {
    fn open(dir: &Path, modality: &Modality, session: Session) -> Result<Self, TandemError> {
        let name = ArtifactName::new(modality.clone(), &session.id, session.start_epoch_ms);
        let (file, path) = create_unique(dir, &name.stem(), "csv")?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER, file);
        writeln!(writer, "{}", SENSOR_CSV_HEADER)?;
        tracing::info!(modality = %modality, session = %session.id, path = %path.display(), "sensor csv opened");
        Ok(Self {
            writer,
            path,
            session,
            samples: 0,
            first_ms: None,
            last_ms: None,
        })
    }

    fn write(&mut self, sample: &InletSample) -> Result<(), TandemError> {
        let value = sample.values.first().copied().unwrap_or(f64::NAN);
        writeln!(
            self.writer,
            "{},{},{:.6},{:.6},{},{},{}",
            sample.local_ms,
            iso_utc(sample.local_ms),
            sample.device_ts,
            value,
            self.session.id,
            self.session.start_epoch_ms,
            iso_utc(self.session.start_epoch_ms)
        )?;
        self.samples += 1;
        self.first_ms.get_or_insert(sample.local_ms);
        self.last_ms = Some(sample.local_ms);
        Ok(())
    }

    fn close(mut self) -> Result<SensorMeta, TandemError> {
        self.writer.flush()?;
        let meta = SensorMeta {
            session: self.session.id.clone(),
            base_utc_ms: self.session.start_epoch_ms,
            samples: self.samples,
            first_sample_utc_ms: self.first_ms,
            last_sample_utc_ms: self.last_ms,
            csv: file_name(&self.path),
        };
        let json = serde_json::to_vec_pretty(&meta)?;
        std::fs::write(sibling(&self.path, "json"), json)?;
        Ok(meta)
    }
}

/// Per-modality sensor CSV writer.
pub struct SensorRecorder {
    modality: Modality,
    label: String,
    dir: PathBuf,
    store: Arc<SessionStore>,
    readiness: Arc<ReadinessTracker>,
    notified: AtomicBool,
    open: Mutex<Option<OpenCsv>>,
}

impl std::fmt::Debug for SensorRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorRecorder")
            .field("modality", &self.modality)
            .field("dir", &self.dir)
            .finish()
    }
}

impl SensorRecorder {
    /// Create a recorder writing `modality` files into `dir`.
    #[must_use]
    pub fn new(
        modality: Modality,
        dir: impl Into<PathBuf>,
        store: Arc<SessionStore>,
        readiness: Arc<ReadinessTracker>,
    ) -> Self {
        let label = format!("{}-recorder", modality);
        Self {
            modality,
            label,
            dir: dir.into(),
            store,
            readiness,
            notified: AtomicBool::new(false),
            open: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<OpenCsv>> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Modality written by this recorder.
    #[must_use]
    pub fn modality(&self) -> &Modality {
        &self.modality
    }

    /// Path of the currently open CSV, if any.
    #[must_use]
    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|o| o.path.clone())
    }

    /// Handle one sample: report readiness once, then persist if a session is active.
    ///
    /// Returns `true` when the sample was written.
    pub fn record(&self, sample: &InletSample) -> Result<bool, TandemError> {
        if !self.notified.swap(true, Ordering::SeqCst) {
            tracing::info!(
                modality = %self.modality,
                device_ts = sample.device_ts,
                "first sample received"
            );
            self.readiness.notify_received(self.modality.as_str());
        }

        let session = self.store.get();
        if !session.is_active() {
            return Ok(false);
        }

        let mut open = self.lock();
        if let Some(previous) = open.take_if(|o| o.session.id != session.id) {
            let meta = previous.close()?;
            tracing::info!(modality = %self.modality, session = %meta.session, samples = meta.samples, "sensor csv rotated");
        }
        if open.is_none() {
            *open = Some(OpenCsv::open(&self.dir, &self.modality, session)?);
        }
        if let Some(csv) = open.as_mut() {
            csv.write(sample)?;
        }
        Ok(true)
    }
}

impl Flushable for SensorRecorder {
    fn name(&self) -> &str {
        &self.label
    }

    fn flush_and_close(&self) -> Result<(), TandemError> {
        let Some(csv) = self.lock().take() else {
            return Ok(());
        };
        let meta = csv.close()?;
        tracing::info!(
            modality = %self.modality,
            session = %meta.session,
            samples = meta.samples,
            csv = %meta.csv,
            "sensor csv closed"
        );
        Ok(())
    }
}

impl Drop for SensorRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.flush_and_close() {
            tracing::warn!(modality = %self.modality, error = %e, "sensor csv close on drop failed");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
