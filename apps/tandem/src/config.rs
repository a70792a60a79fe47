//! # Configuration
//!
//! TOML configuration with serde defaults for every field, so an empty or
//! partial file is valid. CLI flags are applied on top of the loaded file.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//! data_dir = "recordings"
//! window_ms = 10000
//! modalities = ["hr", "rr", "eye", "audio"]
//!
//! [[streams.bindings]]
//! name = "HeartRate"
//! modality = "hr"
//!
//! [coordinator]
//! record_ms = 10000
//! keywords = ["HR", "RR"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tandem_core::{Modality, TandemError};

// =============================================================================
// SERVER
// =============================================================================

/// Ingestion server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Root directory; `eye/`, `audio/` and `sensor/` are created below it.
    pub data_dir: PathBuf,
    /// Session rotation window.
    pub window_ms: i64,
    /// Modalities that must all report before the first session opens.
    pub modalities: Vec<String>,
    /// Bounded wait for the server task on shutdown.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            data_dir: PathBuf::from("recordings"),
            window_ms: tandem_core::rotation::DEFAULT_WINDOW_MS,
            modalities: Modality::defaults()
                .iter()
                .map(|m| m.as_str().to_string())
                .collect(),
            shutdown_timeout_ms: 3_000,
        }
    }
}

impl ServerConfig {
    /// `host:port` listen address.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Tracked modalities as typed names.
    #[must_use]
    pub fn modalities(&self) -> Vec<Modality> {
        self.modalities.iter().map(|m| Modality::new(m)).collect()
    }
}

// =============================================================================
// STREAMS
// =============================================================================

/// Maps a discovered stream to the modality it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBinding {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<String>,
    pub modality: String,
}

/// Resolver and inlet host settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    pub poll_ms: u64,
    pub resolve_timeout_ms: u64,
    pub tick_ms: u64,
    pub correction_interval_ms: i64,
    pub bindings: Vec<StreamBinding>,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            poll_ms: 100,
            resolve_timeout_ms: 200,
            tick_ms: 20,
            correction_interval_ms: tandem_core::inlet::DEFAULT_CORRECTION_INTERVAL_MS,
            bindings: vec![
                StreamBinding {
                    name: "HeartRate".to_string(),
                    stream_type: None,
                    modality: Modality::HR.to_string(),
                },
                StreamBinding {
                    name: "RRinterval".to_string(),
                    stream_type: None,
                    modality: Modality::RR.to_string(),
                },
            ],
        }
    }
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Supervised run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub record_ms: u64,
    pub grace_ms: u64,
    pub poll_ms: u64,
    pub resolve_timeout_ms: u64,
    /// `0` waits for streams forever.
    pub wait_timeout_ms: u64,
    pub keywords: Vec<String>,
    /// Toggle producers at run boundaries instead of leaving them always on.
    pub control_producers: bool,
    /// External registration service; `None` registers with nobody.
    pub registrar_url: Option<String>,
    pub registrar_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            record_ms: 10_000,
            grace_ms: 2_000,
            poll_ms: 250,
            resolve_timeout_ms: 200,
            wait_timeout_ms: 0,
            keywords: vec!["HR".to_string(), "RR".to_string()],
            control_producers: false,
            registrar_url: None,
            registrar_timeout_ms: 2_000,
        }
    }
}

impl CoordinatorConfig {
    /// Overall stream wait, `None` for unbounded.
    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_ms > 0).then(|| Duration::from_millis(self.wait_timeout_ms))
    }
}

// =============================================================================
// ROOT
// =============================================================================

/// Complete effective configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    pub server: ServerConfig,
    pub streams: StreamsConfig,
    pub coordinator: CoordinatorConfig,
}

impl TandemConfig {
    /// Load `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, TandemError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            TandemError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml(&text)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse TOML text.
    pub fn from_toml(text: &str) -> Result<Self, TandemError> {
        toml::from_str(text).map_err(|e| TandemError::SerializationError(format!("Invalid config: {}", e)))
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, TandemError> {
        toml::to_string(self).map_err(|e| TandemError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = TandemConfig::from_toml("").expect("parse");
        assert_eq!(config, TandemConfig::default());
        assert_eq!(config.server.window_ms, 10_000);
        assert_eq!(config.coordinator.grace_ms, 2_000);
        assert!(config.coordinator.wait_timeout().is_none());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let config = TandemConfig::from_toml(
            r#"
            [server]
            port = 8081

            [coordinator]
            keywords = []
            wait_timeout_ms = 5000
            "#,
        )
        .expect("parse");
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.coordinator.keywords.is_empty());
        assert_eq!(config.coordinator.wait_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn rendered_toml_parses_back() {
        let config = TandemConfig::default();
        let text = config.to_toml().expect("render");
        assert_eq!(TandemConfig::from_toml(&text).expect("parse"), config);
    }

    #[test]
    fn invalid_toml_is_a_serialization_error() {
        let err = TandemConfig::from_toml("server = 3").expect_err("must fail");
        assert!(matches!(err, TandemError::SerializationError(_)));
    }
}
