//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API and the error
//! type handlers return.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tandem_core::{Session, TandemError};

/// Request arrival time, stamped once by the server-time middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestArrival(pub i64);

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub server_utc_ms: i64,
    pub session: String,
    pub session_start_utc_ms: Option<i64>,
}

impl HealthResponse {
    #[must_use]
    pub fn new(server_utc_ms: i64, session: &Session) -> Self {
        Self {
            ok: true,
            server_utc_ms,
            session: session.id.clone(),
            session_start_utc_ms: session.start(),
        }
    }
}

// =============================================================================
// SESSION REQUEST/RESPONSE
// =============================================================================

/// Query string of `POST /session/start`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartQuery {
    pub lead_ms: Option<i64>,
}

/// Optional body of `POST /session/start`, sent by a supervising coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub session: String,
    pub start_utc_ms: i64,
}

/// Session snapshot response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub ok: bool,
    pub server_utc_ms: i64,
    pub session: String,
    pub start_utc_ms: Option<i64>,
}

impl SessionResponse {
    #[must_use]
    pub fn new(server_utc_ms: i64, session: &Session) -> Self {
        Self {
            ok: true,
            server_utc_ms,
            session: session.id.clone(),
            start_utc_ms: session.start(),
        }
    }
}

/// Session stop response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub ok: bool,
    pub server_utc_ms: i64,
}

// =============================================================================
// READINESS RESPONSE
// =============================================================================

/// Readiness gate snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub modalities: BTreeMap<String, bool>,
}

// =============================================================================
// ARTIFACT METADATA
// =============================================================================

/// Sidecar of one eye batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EyeMeta {
    pub session: String,
    pub base_utc_ms: i64,
    pub server_recv_utc_ms: i64,
    pub capture_start_utc_ms: Option<i64>,
    pub ok: usize,
    pub ng: usize,
    pub csv: String,
}

/// Sidecar of one audio upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioMeta {
    pub session: String,
    pub base_utc_ms: i64,
    pub server_req_arrival_utc_ms: i64,
    pub server_first_byte_utc_ms: Option<i64>,
    pub server_last_byte_utc_ms: Option<i64>,
    pub rec_start_utc_ms: Option<i64>,
    pub rec_end_utc_ms: Option<i64>,
    pub bytes: u64,
    pub wav: String,
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Handler failure, rendered as a short plain-text body.
#[derive(Debug)]
pub enum ApiError {
    /// The request body was empty.
    Empty,
    /// Persistence or another internal step failed.
    Internal(TandemError),
}

impl From<TandemError> for ApiError {
    fn from(e: TandemError) -> Self {
        Self::Internal(e)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Empty => (StatusCode::BAD_REQUEST, "empty").into_response(),
            Self::Internal(e) => {
                tracing::error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "server error").into_response()
            }
        }
    }
}
