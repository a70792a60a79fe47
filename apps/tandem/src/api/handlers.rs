//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.
//!
//! Push handlers share one shape: report the modality to the readiness gate,
//! answer `waiting` while the gate is closed, otherwise roll the session for
//! the payload's base timestamp and persist the payload plus its sidecar.

use super::{
    AppState,
    payload::EyeBatch,
    types::{
        ApiError, AudioMeta, EyeMeta, HealthResponse, ReadinessResponse, RequestArrival,
        SessionResponse, StartQuery, StartRequest, StopResponse,
    },
};
use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tandem_core::{
    ArtifactName, Modality, NO_SESSION, RotationOutcome, TandemError,
    artifact::{create_unique, file_name, sibling},
};
use tokio::io::AsyncWriteExt;

/// Default and upper bound for `lead_ms` on `/session/start`.
const DEFAULT_LEAD_MS: i64 = 1_500;
const MAX_LEAD_MS: i64 = 10_000;

pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const CAPTURE_START_HEADER: &str = "x-capture-start-utcms";
pub const REC_START_HEADER: &str = "x-rec-start-utcms";
pub const REC_END_HEADER: &str = "x-rec-end-utcms";

// =============================================================================
// HELPERS
// =============================================================================

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    header_str(headers, name).and_then(|s| s.parse().ok())
}

/// Session label for an artifact: the client's header wins, then the session
/// the rotation decision resolved to.
fn session_label(headers: &HeaderMap, outcome: &RotationOutcome) -> String {
    header_str(headers, SESSION_ID_HEADER)
        .or_else(|| outcome.session().map(|s| s.id.as_str()))
        .unwrap_or(NO_SESSION)
        .to_string()
}

/// `true` when the gate is still closed after reporting `modality`.
fn gate_closed(state: &AppState, modality: &str) -> bool {
    state.readiness.notify_received(modality);
    !state.readiness.is_ready()
}

fn waiting() -> Response {
    "waiting".into_response()
}

async fn blocking<T, F>(f: F) -> Result<T, TandemError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TandemError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TandemError::IoError(format!("Blocking task failed: {}", e)))?
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TandemError> {
    std::fs::write(path, serde_json::to_vec(value)?)?;
    Ok(())
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler(
    State(state): State<AppState>,
    Extension(RequestArrival(now)): Extension<RequestArrival>,
) -> impl IntoResponse {
    Json(HealthResponse::new(now, &state.store.get()))
}

// =============================================================================
// SESSION HANDLERS
// =============================================================================

/// Start a session, or return the current one while it is younger than the window.
pub async fn session_start_handler(
    State(state): State<AppState>,
    Extension(RequestArrival(now)): Extension<RequestArrival>,
    Query(query): Query<StartQuery>,
    body: Bytes,
) -> impl IntoResponse {
    let lead_ms = query.lead_ms.unwrap_or(DEFAULT_LEAD_MS).clamp(0, MAX_LEAD_MS);
    let adopt: Option<StartRequest> = serde_json::from_slice(&body).ok();
    let policy = state.policy;

    let (session, expired, fresh) = state.store.transact(|txn| {
        let current = txn.current();
        if policy.is_young(&current, now) {
            return (current, None, false);
        }
        let expired = current.is_active().then(|| current.clone());
        if expired.is_some() {
            txn.end();
        }
        let adopted = adopt
            .as_ref()
            .and_then(|req| txn.begin(&req.session, req.start_utc_ms));
        let session = adopted
            .or_else(|| txn.begin_next(now + lead_ms))
            .unwrap_or_default();
        (session, expired, true)
    });

    if let Some(old) = expired {
        tracing::info!(session = %old.id, elapsed_ms = now - old.start_epoch_ms, "previous session expired");
    }
    if fresh {
        tracing::info!(session = %session.id, start_ms = session.start_epoch_ms, lead_ms, "session started");
    }
    Json(SessionResponse::new(now, &session))
}

/// Current session snapshot.
pub async fn session_get_handler(
    State(state): State<AppState>,
    Extension(RequestArrival(now)): Extension<RequestArrival>,
) -> impl IntoResponse {
    Json(SessionResponse::new(now, &state.store.get()))
}

/// Clear the active session.
pub async fn session_stop_handler(
    State(state): State<AppState>,
    Extension(RequestArrival(now)): Extension<RequestArrival>,
) -> impl IntoResponse {
    state.store.end();
    Json(StopResponse {
        ok: true,
        server_utc_ms: now,
    })
}

// =============================================================================
// READINESS HANDLERS
// =============================================================================

fn readiness_snapshot(state: &AppState) -> ReadinessResponse {
    ReadinessResponse {
        ready: state.readiness.is_ready(),
        modalities: state.readiness.snapshot(),
    }
}

/// Readiness gate snapshot.
pub async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(readiness_snapshot(&state))
}

/// Clear readiness flags and close the gate.
pub async fn readiness_reset_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.readiness.reset();
    Json(readiness_snapshot(&state))
}

// =============================================================================
// EYE HANDLER
// =============================================================================

/// Persist one batch of gaze records.
pub async fn eye_handler(
    State(state): State<AppState>,
    Extension(RequestArrival(recv)): Extension<RequestArrival>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if gate_closed(&state, Modality::EYE) {
        return Ok(waiting());
    }

    let text = String::from_utf8_lossy(&body);
    let text = text.trim();
    if text.is_empty() {
        return Err(ApiError::Empty);
    }

    let capture_start = header_i64(&headers, CAPTURE_START_HEADER);
    let base = capture_start.unwrap_or(recv);
    let outcome = state.policy.ensure_for_timestamp(&state.store, base);
    let session = session_label(&headers, &outcome);

    let batch = EyeBatch::parse(text);
    let csv = batch.to_csv(capture_start, recv, &session);
    let stem = ArtifactName::new(Modality::EYE, &session, base).stem();
    let dir = state.eye_dir.clone();
    let meta = EyeMeta {
        session: session.clone(),
        base_utc_ms: base,
        server_recv_utc_ms: recv,
        capture_start_utc_ms: capture_start,
        ok: batch.ok(),
        ng: batch.ng,
        csv: String::new(),
    };

    let (path, meta) = blocking(move || {
        let (mut file, path) = create_unique(&dir, &stem, "csv")?;
        std::io::Write::write_all(&mut file, csv.as_bytes())?;
        let meta = EyeMeta {
            csv: file_name(&path),
            ..meta
        };
        write_json(&sibling(&path, "json"), &meta)?;
        Ok((path, meta))
    })
    .await?;

    if state.saves.first_for_session(Modality::EYE, &session) {
        tracing::info!(
            path = %path.display(),
            base_ms = base,
            recv_ms = recv,
            ok = meta.ok,
            ng = meta.ng,
            "eye saved"
        );
    }
    Ok("ok".into_response())
}

// =============================================================================
// AUDIO HANDLER
// =============================================================================

/// Stream one audio upload to disk.
pub async fn audio_handler(
    State(state): State<AppState>,
    Extension(RequestArrival(recv)): Extension<RequestArrival>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    if gate_closed(&state, Modality::AUDIO) {
        return Ok(waiting());
    }

    let rec_start = header_i64(&headers, REC_START_HEADER);
    let rec_end = header_i64(&headers, REC_END_HEADER);
    let base = rec_start.unwrap_or(recv);
    let outcome = state.policy.ensure_for_timestamp(&state.store, base);
    let session = session_label(&headers, &outcome);

    let stem = ArtifactName::new(Modality::AUDIO, &session, base).stem();
    let dir = state.audio_dir.clone();
    let (file, path): (std::fs::File, PathBuf) =
        blocking(move || create_unique(&dir, &stem, "wav")).await?;
    let mut file = tokio::fs::File::from_std(file);

    let mut total: u64 = 0;
    let mut first_byte: Option<i64> = None;
    let mut last_byte: Option<i64> = None;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TandemError::Transport(format!("Body read failed: {}", e)))?;
        if chunk.is_empty() {
            continue;
        }
        first_byte.get_or_insert_with(|| state.store.now_ms());
        file.write_all(&chunk).await?;
        total += chunk.len() as u64;
        last_byte = Some(state.store.now_ms());
    }
    file.flush().await?;
    drop(file);

    let meta = AudioMeta {
        session: session.clone(),
        base_utc_ms: base,
        server_req_arrival_utc_ms: recv,
        server_first_byte_utc_ms: first_byte,
        server_last_byte_utc_ms: last_byte,
        rec_start_utc_ms: rec_start,
        rec_end_utc_ms: rec_end,
        bytes: total,
        wav: file_name(&path),
    };
    let meta_path = sibling(&path, "json");
    tokio::fs::write(&meta_path, serde_json::to_vec(&meta).map_err(TandemError::from)?).await?;

    if state.saves.first_for_session(Modality::AUDIO, &session) {
        tracing::info!(
            path = %path.display(),
            base_ms = base,
            recv_ms = recv,
            rec_start_ms = ?rec_start,
            bytes = total,
            "audio saved"
        );
    }
    Ok("ok".into_response())
}
