//! # Registration Client
//!
//! Tells an external server which session a supervised run is about to record,
//! so artifacts pushed to that server land under the same id and anchor.
//! Failure is never fatal: the local session stays authoritative.

use crate::api::StartRequest;
use std::future::Future;
use std::time::Duration;
use tandem_core::{Session, TandemError};

/// Announces a session to whoever needs to know about it.
pub trait Registrar: Send + Sync {
    fn register(&self, session: &Session) -> impl Future<Output = Result<(), TandemError>> + Send;
}

/// Registers with nobody.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRegistrar;

impl Registrar for NoopRegistrar {
    async fn register(&self, _session: &Session) -> Result<(), TandemError> {
        Ok(())
    }
}

/// `POST {base_url}/session/start` with `{session, start_utc_ms}`.
#[derive(Debug, Clone)]
pub struct HttpRegistrar {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRegistrar {
    /// Create a client with a per-request `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TandemError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TandemError::Registration(format!("Cannot build client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Registrar for HttpRegistrar {
    async fn register(&self, session: &Session) -> Result<(), TandemError> {
        let url = format!("{}/session/start", self.base_url);
        let body = StartRequest {
            session: session.id.clone(),
            start_utc_ms: session.start_epoch_ms,
        };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TandemError::Registration(format!("Cannot reach {}: {}", url, e)))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TandemError::Registration(format!(
                "{} answered {}: {}",
                url, status, text
            )));
        }
        tracing::info!(%url, session = %session.id, "session registered");
        Ok(())
    }
}

/// Either registrar, chosen from configuration.
#[derive(Debug, Clone)]
pub enum AnyRegistrar {
    Noop(NoopRegistrar),
    Http(HttpRegistrar),
}

impl AnyRegistrar {
    /// HTTP when `url` is set, otherwise no-op.
    pub fn from_url(url: Option<&str>, timeout: Duration) -> Result<Self, TandemError> {
        match url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => Ok(Self::Http(HttpRegistrar::new(url, timeout)?)),
            None => Ok(Self::Noop(NoopRegistrar)),
        }
    }
}

impl Registrar for AnyRegistrar {
    async fn register(&self, session: &Session) -> Result<(), TandemError> {
        match self {
            Self::Noop(r) => r.register(session).await,
            Self::Http(r) => r.register(session).await,
        }
    }
}
