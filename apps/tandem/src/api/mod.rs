//! # Tandem HTTP API Module
//!
//! This module implements the push-side ingestion server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Server time and current session
//! - `POST /session/start` - Start (or return the young) session
//! - `GET /session` - Current session snapshot
//! - `POST /session/stop` - Clear the active session
//! - `GET /readiness` - Modality readiness flags
//! - `POST /readiness/reset` - Clear flags and close the gate
//! - `POST /eye` - Newline-delimited gaze records
//! - `POST /audio` (also `POST /`) - Raw audio upload, streamed to disk
//!
//! Every response carries `X-Server-UtcMs`. Unknown routes answer 404
//! `not found`; handler panics answer 500 `server error`.

mod handlers;
mod middleware;
mod payload;
mod types;

// Re-export handlers and types for integration tests (via `tandem::api::*`)
pub use handlers::{CAPTURE_START_HEADER, REC_END_HEADER, REC_START_HEADER, SESSION_ID_HEADER};
pub use middleware::SERVER_TIME_HEADER;
pub use payload::{EYE_CSV_HEADER, EyeBatch, EyeRecord, estimate_utc_ms};
pub use types::{
    ApiError, AudioMeta, EyeMeta, HealthResponse, ReadinessResponse, RequestArrival,
    SessionResponse, StartRequest, StopResponse,
};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{FirstSaveLog, ReadinessTracker, SessionRotationPolicy, SessionStore, TandemError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state. Cloned per request; all fields are cheap handles.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub readiness: Arc<ReadinessTracker>,
    pub policy: SessionRotationPolicy,
    pub eye_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub saves: Arc<FirstSaveLog>,
}

impl AppState {
    /// Create state writing artifacts below `data_dir`.
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        readiness: Arc<ReadinessTracker>,
        policy: SessionRotationPolicy,
        data_dir: &Path,
    ) -> Self {
        Self {
            store,
            readiness,
            policy,
            eye_dir: data_dir.join("eye"),
            audio_dir: data_dir.join("audio"),
            saves: Arc::new(FirstSaveLog::new()),
        }
    }
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. Server time - stamps arrival, adds `X-Server-UtcMs`
/// 3. Catch panic - maps handler panics to 500
///
/// Request bodies are unbounded; eye batches and audio uploads have no size cap.
pub fn create_router(state: AppState) -> Router {
    let clock = state.store.clock().clone();

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/session", get(handlers::session_get_handler))
        .route("/session/start", post(handlers::session_start_handler))
        .route("/session/stop", post(handlers::session_stop_handler))
        .route("/readiness", get(handlers::readiness_handler))
        .route("/readiness/reset", post(handlers::readiness_reset_handler))
        .route("/eye", post(handlers::eye_handler))
        .route("/audio", post(handlers::audio_handler))
        .route("/", post(handlers::audio_handler))
        .fallback(middleware::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn_with_state(
                    clock,
                    middleware::server_time_middleware,
                ))
                .layer(CatchPanicLayer::custom(middleware::panic_response))
                .layer(DefaultBodyLimit::disable()),
        )
        .with_state(state)
}

// =============================================================================
// SERVER LIFECYCLE
// =============================================================================

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Listener plus its serving task, with idempotent start and bounded stop.
pub struct IngestionServer {
    addr: String,
    state: AppState,
    running: Option<Running>,
}

impl IngestionServer {
    /// Prepare a server for `addr` (`host:port`; port 0 picks a free port).
    #[must_use]
    pub fn new(addr: impl Into<String>, state: AppState) -> Self {
        Self {
            addr: addr.into(),
            state,
            running: None,
        }
    }

    /// Whether the serving task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.task.is_finished())
    }

    /// Bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Bind and start serving. A second call while running is a no-op.
    pub async fn start(&mut self) -> Result<SocketAddr, TandemError> {
        if let Some(running) = self.running.as_ref().filter(|r| !r.task.is_finished()) {
            tracing::debug!(addr = %running.addr, "ingestion server already running");
            return Ok(running.addr);
        }
        self.running = None;

        std::fs::create_dir_all(&self.state.eye_dir)?;
        std::fs::create_dir_all(&self.state.audio_dir)?;

        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| TandemError::Bind {
                addr: self.addr.clone(),
                reason: e.to_string(),
            })?;
        let addr = listener.local_addr()?;
        let router = create_router(self.state.clone());
        let (tx, rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "ingestion server failed");
            }
        });

        tracing::info!(%addr, "Tandem ingestion server listening");
        self.running = Some(Running {
            addr,
            shutdown: tx,
            task,
        });
        Ok(addr)
    }

    /// Close the listener and wait up to `timeout` for in-flight requests.
    ///
    /// Returns `false` if the task had to be aborted.
    pub async fn stop(&mut self, timeout: Duration) -> bool {
        let Some(running) = self.running.take() else {
            return true;
        };
        let _ = running.shutdown.send(());
        let mut task = running.task;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(_) => {
                tracing::info!(addr = %running.addr, "ingestion server stopped");
                true
            }
            Err(_) => {
                tracing::warn!(
                    addr = %running.addr,
                    timeout_ms = timeout.as_millis() as u64,
                    "ingestion server did not stop in time, aborting"
                );
                task.abort();
                false
            }
        }
    }
}
