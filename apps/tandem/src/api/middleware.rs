//! # Middleware Module
//!
//! Request-arrival stamping and panic mapping for the ingestion API.
//!
//! Every response, including 404s and recovered panics, carries
//! `X-Server-UtcMs` with the moment the request arrived, read from the shared
//! session clock.

use super::types::RequestArrival;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::any::Any;
use std::sync::Arc;
use tandem_core::Clock;

/// Response header with the request arrival time in epoch milliseconds.
pub const SERVER_TIME_HEADER: HeaderName = HeaderName::from_static("x-server-utcms");

/// Stamp the arrival time into request extensions and the response headers.
pub async fn server_time_middleware(
    State(clock): State<Arc<dyn Clock>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let arrival = clock.now_ms();
    request.extensions_mut().insert(RequestArrival(arrival));
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(SERVER_TIME_HEADER, HeaderValue::from(arrival));
    response
}

/// Map a handler panic to a plain 500 without touching other requests.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(detail, "handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "server error").into_response()
}

/// Fallback for unknown routes.
pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}
