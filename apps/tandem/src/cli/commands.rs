//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::SessionAction;
use crate::api::{AppState, IngestionServer};
use crate::config::{CoordinatorConfig, TandemConfig};
use crate::coordinator::{ExperimentCoordinator, RunSettings};
use crate::host::InletHost;
use crate::registrar::AnyRegistrar;
use crate::sim;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{
    Clock, Flushable, Modality, MonotonicClock, ProducerHandle, ReadinessTracker, SensorRecorder,
    SessionRotationPolicy, SessionStore, StreamResolver, TandemError,
};
use tokio::sync::watch;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

// =============================================================================
// SHARED WIRING
// =============================================================================

/// Session store, readiness gate and server state built from configuration.
struct Core {
    store: Arc<SessionStore>,
    readiness: Arc<ReadinessTracker>,
    state: AppState,
}

/// Modalities delivered by the push handlers.
const PUSH_MODALITIES: [&str; 2] = [Modality::EYE, Modality::AUDIO];

/// Configured modalities that something in this process can report.
///
/// Push modalities always qualify; sensor modalities only when `pull` runs an
/// inlet host with a binding for them. Anything else would hold the gate shut.
fn receivable_modalities(config: &TandemConfig, pull: bool) -> Vec<Modality> {
    let bound: BTreeSet<Modality> = if pull {
        config
            .streams
            .bindings
            .iter()
            .map(|b| Modality::new(&b.modality))
            .collect()
    } else {
        BTreeSet::new()
    };
    let (kept, dropped): (Vec<Modality>, Vec<Modality>) = config
        .server
        .modalities()
        .into_iter()
        .partition(|m| PUSH_MODALITIES.contains(&m.as_str()) || bound.contains(m));
    for m in &dropped {
        tracing::warn!(modality = %m, "no producer for modality in this mode, readiness ignores it");
    }
    kept
}

fn build_core(config: &TandemConfig, pull: bool) -> Core {
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let store = Arc::new(SessionStore::new(clock));
    let readiness = Arc::new(ReadinessTracker::new(
        receivable_modalities(config, pull),
        store.clone(),
    ));
    let policy = SessionRotationPolicy::new(config.server.window_ms);
    let state = AppState::new(
        store.clone(),
        readiness.clone(),
        policy,
        &config.server.data_dir,
    );
    Core {
        store,
        readiness,
        state,
    }
}

fn run_settings(c: &CoordinatorConfig) -> RunSettings {
    RunSettings {
        record: ms(c.record_ms),
        grace: ms(c.grace_ms),
        poll: ms(c.poll_ms),
        resolve_timeout: ms(c.resolve_timeout_ms),
        wait_timeout: c.wait_timeout(),
        keywords: c.keywords.clone(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

// =============================================================================
// SERVE COMMAND
// =============================================================================

/// Run the ingestion server until ctrl-c.
pub async fn cmd_serve(config: TandemConfig) -> Result<(), TandemError> {
    let core = build_core(&config, false);
    let gated: Vec<String> = core
        .readiness
        .expected()
        .iter()
        .map(|m| m.to_string())
        .collect();

    println!("Tandem Ingestion Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Address:    {}", config.server.addr());
    println!("  Data dir:   {}", config.server.data_dir.display());
    println!("  Window:     {} ms", config.server.window_ms);
    println!("  Modalities: {}", gated.join(", "));
    println!();

    let mut server = IngestionServer::new(config.server.addr(), core.state);
    server.start().await?;
    shutdown_signal().await;
    server.stop(ms(config.server.shutdown_timeout_ms)).await;
    Ok(())
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Run server, resolver and inlet host; with `supervise`, perform one run and exit.
pub async fn cmd_run(config: TandemConfig, supervise: bool, simulate: bool) -> Result<(), TandemError> {
    let core = build_core(&config, true);
    let shutdown_timeout = ms(config.server.shutdown_timeout_ms);

    let mut server = IngestionServer::new(config.server.addr(), core.state.clone());
    server.start().await?;

    let discovery = sim::backend(simulate);
    let resolver = Arc::new(StreamResolver::new(
        discovery.clone(),
        ms(config.streams.resolve_timeout_ms),
    ));
    let resolver_handle = resolver.spawn(ms(config.streams.poll_ms))?;

    let controlled = supervise && config.coordinator.control_producers;
    let producer = ProducerHandle::new("sensor-inlets", !controlled);
    let mut host = InletHost::new(
        resolver.clone(),
        config.streams.bindings.clone(),
        core.store.clone(),
        producer.clone(),
        config.streams.correction_interval_ms,
    );

    let sensor_dir = config.server.data_dir.join("sensor");
    let modalities: BTreeSet<Modality> = config
        .streams
        .bindings
        .iter()
        .map(|b| Modality::new(&b.modality))
        .collect();
    let recorders: Vec<Arc<SensorRecorder>> = modalities
        .into_iter()
        .map(|m| {
            Arc::new(SensorRecorder::new(
                m,
                &sensor_dir,
                core.store.clone(),
                core.readiness.clone(),
            ))
        })
        .collect();
    for r in &recorders {
        host.add_recorder(r.clone());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let host_task = tokio::spawn(host.run(ms(config.streams.tick_ms), stop_rx));

    if supervise {
        let registrar = AnyRegistrar::from_url(
            config.coordinator.registrar_url.as_deref(),
            ms(config.coordinator.registrar_timeout_ms),
        )?;
        let mut coordinator = ExperimentCoordinator::new(
            run_settings(&config.coordinator),
            discovery,
            core.store.clone(),
            registrar,
        );
        for r in &recorders {
            coordinator.add_flushable(r.clone());
        }
        if controlled {
            coordinator.add_producer(Arc::new(producer));
        }
        tokio::select! {
            result = coordinator.run() => match result {
                Ok(summary) => tracing::info!(
                    session = %summary.session.id,
                    start_ms = summary.session.start_epoch_ms,
                    end_ms = summary.ended_ms,
                    streams_matched = summary.streams_matched,
                    "supervised run complete"
                ),
                Err(e) => tracing::error!(error = %e, "supervised run failed"),
            },
            () = shutdown_signal() => {}
        }
    } else {
        shutdown_signal().await;
    }

    let _ = stop_tx.send(true);
    if let Err(e) = host_task.await {
        tracing::warn!(error = %e, "inlet host task ended abnormally");
    }
    for r in &recorders {
        if let Err(e) = r.flush_and_close() {
            tracing::warn!(writer = r.name(), error = %e, "final flush failed");
        }
    }
    resolver_handle.stop(shutdown_timeout);
    server.stop(shutdown_timeout).await;
    Ok(())
}

// =============================================================================
// SESSION COMMAND
// =============================================================================

/// Call the session endpoints of a running server and print the reply.
pub async fn cmd_session(url: &str, action: SessionAction) -> Result<(), TandemError> {
    let base = url.trim_end_matches('/');
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| TandemError::Transport(e.to_string()))?;

    let request = match action {
        SessionAction::Start { lead_ms } => {
            let mut req = client.post(format!("{}/session/start", base));
            if let Some(lead) = lead_ms {
                req = req.query(&[("lead_ms", lead)]);
            }
            req
        }
        SessionAction::Status => client.get(format!("{}/session", base)),
        SessionAction::Stop => client.post(format!("{}/session/stop", base)),
    };

    let resp = request
        .send()
        .await
        .map_err(|e| TandemError::Transport(format!("Cannot reach {}: {}", base, e)))?;
    let status = resp.status();
    let body: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| TandemError::SerializationError(format!("Unexpected reply ({}): {}", status, e)))?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

// =============================================================================
// CONFIG COMMAND
// =============================================================================

/// Print the effective configuration.
pub fn cmd_config(config: &TandemConfig) -> Result<(), TandemError> {
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use std::path::Path;

    fn count(dir: &Path, ext: &str) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().extension().is_some_and(|x| x == ext))
                    .count()
            })
            .unwrap_or(0)
    }

    fn names(modalities: Vec<Modality>) -> BTreeSet<String> {
        modalities.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn serve_gates_only_on_push_modalities() {
        let config = TandemConfig::default();
        assert_eq!(
            names(receivable_modalities(&config, false)),
            BTreeSet::from(["audio".to_string(), "eye".to_string()])
        );
    }

    #[test]
    fn run_keeps_bound_sensor_modalities() {
        let config = TandemConfig::default();
        assert_eq!(
            names(receivable_modalities(&config, true)),
            names(config.server.modalities())
        );
    }

    #[test]
    fn run_drops_sensor_modalities_without_binding() {
        let mut config = TandemConfig::default();
        config.streams.bindings.retain(|b| b.modality == "hr");
        assert!(!names(receivable_modalities(&config, true)).contains("rr"));
    }

    #[tokio::test]
    async fn serve_defaults_persist_eye_and_audio() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut config = TandemConfig::default();
        config.server.data_dir = dir.path().to_path_buf();
        let core = build_core(&config, false);
        let server = axum_test::TestServer::new(create_router(core.state)).expect("server");
        let line = "0.5,0.1,1.6,0.2,0.0,0.0,1.0";

        assert_eq!(server.post("/eye").text(line).await.text(), "waiting");
        let audio = server
            .post("/audio")
            .bytes(bytes::Bytes::from_static(b"RIFF"))
            .await;
        assert_eq!(audio.text(), "ok");
        assert_eq!(server.post("/eye").text(line).await.text(), "ok");

        assert!(core.readiness.is_ready());
        assert!(core.store.get().is_active());
        assert_eq!(count(&dir.path().join("eye"), "csv"), 1);
        assert_eq!(count(&dir.path().join("audio"), "wav"), 1);
    }
}
