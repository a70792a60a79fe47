//! Integration tests for the Tandem ingestion API.
//!
//! Uses axum-test to exercise the handlers without binding a port, with a
//! manual clock driving request arrival times.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tandem::api::{
    AppState, AudioMeta, CAPTURE_START_HEADER, EYE_CSV_HEADER, EyeMeta, HealthResponse,
    IngestionServer, REC_END_HEADER, REC_START_HEADER, ReadinessResponse, SERVER_TIME_HEADER,
    SESSION_ID_HEADER, SessionResponse, StopResponse, create_router,
};
use tandem_core::{
    ManualClock, Modality, ReadinessTracker, SessionRotationPolicy, SessionStore, TandemError,
};
use tempfile::TempDir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

struct Fixture {
    server: TestServer,
    clock: Arc<ManualClock>,
    store: Arc<SessionStore>,
    readiness: Arc<ReadinessTracker>,
    dir: TempDir,
}

/// Server tracking `modalities` with a 10 s window, clock at 1000 ms.
fn fixture_with(modalities: Vec<Modality>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(1_000));
    let store = Arc::new(SessionStore::new(clock.clone()));
    let readiness = Arc::new(ReadinessTracker::new(modalities, store.clone()));
    let state = AppState::new(
        store.clone(),
        readiness.clone(),
        SessionRotationPolicy::new(10_000),
        dir.path(),
    );
    Fixture {
        server: TestServer::new(create_router(state)).unwrap(),
        clock,
        store,
        readiness,
        dir,
    }
}

/// Server with the readiness gate already open and no session.
fn fixture() -> Fixture {
    fixture_with(Vec::new())
}

fn header(name: &str, value: impl ToString) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_bytes(name.as_bytes()).unwrap(),
        value.to_string().parse::<HeaderValue>().unwrap(),
    )
}

/// Files in `dir` with extension `ext`, sorted by name.
fn files(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out: Vec<PathBuf> = entries
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == ext))
        .collect();
    out.sort();
    out
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> T {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

const EYE_LINE: &str = "0.5,0.1,1.6,0.2,0.0,0.0,1.0";

// =============================================================================
// HEALTH AND MIDDLEWARE TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let f = fixture();

    let response = f.server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert!(health.ok);
    assert_eq!(health.server_utc_ms, 1_000);
    assert_eq!(health.session, "");
    assert_eq!(health.session_start_utc_ms, None);
}

#[tokio::test]
async fn test_server_time_header_on_every_response() {
    let f = fixture();
    f.clock.set(4_242);

    for response in [
        f.server.get("/health").await,
        f.server.get("/no/such/route").await,
        f.server.post("/eye").text("").await,
    ] {
        let stamp = response.headers().get(SERVER_TIME_HEADER).unwrap();
        assert_eq!(stamp.to_str().unwrap(), "4242");
    }
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let f = fixture();

    let response = f.server.get("/nope").await;

    response.assert_status_not_found();
    assert_eq!(response.text(), "not found");
}

// =============================================================================
// SESSION ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_session_start_uses_default_lead() {
    let f = fixture();

    let response = f.server.post("/session/start").await;

    response.assert_status_ok();
    let body: SessionResponse = response.json();
    assert!(body.ok);
    assert_eq!(body.session, "no_1");
    assert_eq!(body.start_utc_ms, Some(2_500));
}

#[tokio::test]
async fn test_session_start_is_idempotent_within_window() {
    let f = fixture();

    let first: SessionResponse = f
        .server
        .post("/session/start")
        .add_query_param("lead_ms", 0)
        .await
        .json();
    f.clock.advance(9_999);
    let second: SessionResponse = f.server.post("/session/start").await.json();

    assert_eq!(first.session, "no_1");
    assert_eq!(second.session, "no_1");
    assert_eq!(second.start_utc_ms, Some(1_000));
    assert_eq!(second.server_utc_ms, 10_999);
}

#[tokio::test]
async fn test_session_start_after_window_allocates_next() {
    let f = fixture();

    f.server.post("/session/start").add_query_param("lead_ms", 0).await;
    f.clock.advance(10_000);
    let body: SessionResponse = f
        .server
        .post("/session/start")
        .add_query_param("lead_ms", 0)
        .await
        .json();

    assert_eq!(body.session, "no_2");
    assert_eq!(body.start_utc_ms, Some(11_000));
}

#[tokio::test]
async fn test_session_start_clamps_lead() {
    let f = fixture();

    let high: SessionResponse = f
        .server
        .post("/session/start")
        .add_query_param("lead_ms", 60_000)
        .await
        .json();
    assert_eq!(high.start_utc_ms, Some(11_000));

    f.server.post("/session/stop").await;
    let low: SessionResponse = f
        .server
        .post("/session/start")
        .add_query_param("lead_ms", -5)
        .await
        .json();
    assert_eq!(low.start_utc_ms, Some(1_000));
}

#[tokio::test]
async fn test_session_start_adopts_supervisor_session() {
    let f = fixture();

    let body: SessionResponse = f
        .server
        .post("/session/start")
        .json(&json!({ "session": "no_7", "start_utc_ms": 900 }))
        .await
        .json();

    assert_eq!(body.session, "no_7");
    assert_eq!(body.start_utc_ms, Some(900));
    assert_eq!(f.store.get().id, "no_7");
}

#[tokio::test]
async fn test_session_get_and_stop() {
    let f = fixture();
    f.server.post("/session/start").add_query_param("lead_ms", 0).await;

    let current: SessionResponse = f.server.get("/session").await.json();
    assert_eq!(current.session, "no_1");

    let stopped: StopResponse = f.server.post("/session/stop").await.json();
    assert!(stopped.ok);
    assert_eq!(stopped.server_utc_ms, 1_000);

    let after: SessionResponse = f.server.get("/session").await.json();
    assert_eq!(after.session, "");
    assert_eq!(after.start_utc_ms, None);
}

// =============================================================================
// READINESS TESTS
// =============================================================================

#[tokio::test]
async fn test_push_waits_until_every_modality_reported() {
    let f = fixture_with(Modality::defaults());
    f.readiness.notify_received(Modality::HR);
    f.readiness.notify_received(Modality::RR);

    let response = f.server.post("/eye").text(EYE_LINE).await;
    response.assert_status_ok();
    assert_eq!(response.text(), "waiting");
    assert!(files(&f.dir.path().join("eye"), "csv").is_empty());
    assert!(!f.store.get().is_active());

    let response = f.server.post("/audio").bytes(bytes::Bytes::from_static(b"RIFF")).await;
    response.assert_status_ok();
    assert_eq!(response.text(), "ok");
    assert_eq!(f.store.get().id, "no_1");
    assert_eq!(files(&f.dir.path().join("audio"), "wav").len(), 1);
}

#[tokio::test]
async fn test_readiness_snapshot_and_reset() {
    let f = fixture_with(Modality::defaults());
    f.server.post("/eye").text(EYE_LINE).await;

    let snapshot: ReadinessResponse = f.server.get("/readiness").await.json();
    assert!(!snapshot.ready);
    assert_eq!(snapshot.modalities.get("eye"), Some(&true));
    assert_eq!(snapshot.modalities.get("hr"), Some(&false));

    for m in [Modality::HR, Modality::RR, Modality::AUDIO] {
        f.readiness.notify_received(m);
    }
    let open: ReadinessResponse = f.server.get("/readiness").await.json();
    assert!(open.ready);

    let reset: ReadinessResponse = f.server.post("/readiness/reset").await.json();
    assert!(!reset.ready);
    assert!(reset.modalities.values().all(|r| !r));
}

// =============================================================================
// EYE UPLOAD TESTS
// =============================================================================

#[tokio::test]
async fn test_eye_counts_malformed_lines() {
    let f = fixture();
    f.server.post("/session/start").add_query_param("lead_ms", 0).await;

    let mut lines: Vec<String> = (0..7)
        .map(|i| format!("{},0.1,1.6,0.2,0.0,0.0,1.0", f64::from(i) * 0.01))
        .collect();
    lines.insert(2, "garbage".to_string());
    lines.insert(5, "1,2,3".to_string());
    lines.push("1;2;3;4;5;6;7;8".to_string());
    let response = f
        .server
        .post("/eye")
        .add_header(
            HeaderName::from_static(CAPTURE_START_HEADER),
            HeaderValue::from(1_500_i64),
        )
        .text(lines.join("\n"))
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), "ok");

    let eye_dir = f.dir.path().join("eye");
    let metas = files(&eye_dir, "json");
    assert_eq!(metas.len(), 1);
    let meta: EyeMeta = read_json(&metas[0]);
    assert_eq!(meta.ok, 7);
    assert_eq!(meta.ng, 3);
    assert_eq!(meta.session, "no_1");
    assert_eq!(meta.base_utc_ms, 1_500);
    assert_eq!(meta.capture_start_utc_ms, Some(1_500));
    assert_eq!(meta.server_recv_utc_ms, 1_000);

    let csv = std::fs::read_to_string(eye_dir.join(&meta.csv)).unwrap();
    let rows: Vec<&str> = csv.lines().collect();
    assert_eq!(rows[0], EYE_CSV_HEADER);
    assert_eq!(rows.len(), 8);
    assert!(rows[1].ends_with(",no_1"));
}

#[tokio::test]
async fn test_eye_empty_body_is_bad_request() {
    let f = fixture();

    let response = f.server.post("/eye").text("  \n ").await;

    response.assert_status_bad_request();
    assert_eq!(response.text(), "empty");
}

#[tokio::test]
async fn test_eye_large_batch_is_accepted() {
    let f = fixture();
    let count = 700_000;
    let body = vec![EYE_LINE; count].join("\n");
    assert!(body.len() > 16 * 1024 * 1024);

    let response = f.server.post("/eye").text(body).await;

    response.assert_status_ok();
    assert_eq!(response.text(), "ok");
    let metas = files(&f.dir.path().join("eye"), "json");
    assert_eq!(metas.len(), 1);
    let meta: EyeMeta = read_json(&metas[0]);
    assert_eq!(meta.ok, count);
    assert_eq!(meta.ng, 0);
}

#[tokio::test]
async fn test_eye_session_header_labels_artifact() {
    let f = fixture();
    let (name, value) = header(SESSION_ID_HEADER, "pilot-3");

    f.server.post("/eye").add_header(name, value).text(EYE_LINE).await.assert_status_ok();

    let metas = files(&f.dir.path().join("eye"), "json");
    let meta: EyeMeta = read_json(&metas[0]);
    assert_eq!(meta.session, "pilot-3");
    assert!(meta.csv.starts_with("eye_pilot-3_"));
    assert!(meta.csv.ends_with("_1000.csv"));
}

#[tokio::test]
async fn test_eye_without_session_is_still_saved() {
    let f = fixture();

    f.server.post("/eye").text(EYE_LINE).await.assert_status_ok();

    let metas = files(&f.dir.path().join("eye"), "json");
    assert_eq!(metas.len(), 1);
    let meta: EyeMeta = read_json(&metas[0]);
    assert!(meta.csv.starts_with("eye_no_session_"));
}

#[tokio::test]
async fn test_identical_uploads_do_not_overwrite() {
    let f = fixture();

    f.server.post("/eye").text(EYE_LINE).await.assert_status_ok();
    f.server.post("/eye").text(EYE_LINE).await.assert_status_ok();

    assert_eq!(files(&f.dir.path().join("eye"), "csv").len(), 2);
}

// =============================================================================
// ROTATION TESTS
// =============================================================================

#[tokio::test]
async fn test_late_payload_rotates_session() {
    let f = fixture();
    f.server.post("/session/start").add_query_param("lead_ms", 0).await;
    let name = HeaderName::from_static(CAPTURE_START_HEADER);

    f.server
        .post("/eye")
        .add_header(name.clone(), HeaderValue::from(1_000_i64))
        .text(EYE_LINE)
        .await
        .assert_status_ok();
    assert_eq!(f.store.get().id, "no_1");

    f.server
        .post("/eye")
        .add_header(name.clone(), HeaderValue::from(11_000_i64))
        .text(EYE_LINE)
        .await
        .assert_status_ok();
    assert_eq!(f.store.get().id, "no_1");

    f.clock.set(11_001);
    f.server
        .post("/eye")
        .add_header(name, HeaderValue::from(11_001_i64))
        .text(EYE_LINE)
        .await
        .assert_status_ok();

    let current: SessionResponse = f.server.get("/session").await.json();
    assert_eq!(current.session, "no_2");
    assert_eq!(current.start_utc_ms, Some(11_001));

    let sessions: Vec<String> = files(&f.dir.path().join("eye"), "json")
        .iter()
        .map(|p| read_json::<EyeMeta>(p).session)
        .collect();
    assert_eq!(sessions.iter().filter(|s| *s == "no_1").count(), 2);
    assert_eq!(sessions.iter().filter(|s| *s == "no_2").count(), 1);
}

// =============================================================================
// AUDIO UPLOAD TESTS
// =============================================================================

#[tokio::test]
async fn test_audio_is_streamed_with_metadata() {
    let f = fixture();
    f.server.post("/session/start").add_query_param("lead_ms", 0).await;
    let payload: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
    let (start_name, start_value) = header(REC_START_HEADER, 1_200);
    let (end_name, end_value) = header(REC_END_HEADER, 4_200);

    let response = f
        .server
        .post("/audio")
        .add_header(start_name, start_value)
        .add_header(end_name, end_value)
        .bytes(bytes::Bytes::from(payload.clone()))
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), "ok");

    let audio_dir = f.dir.path().join("audio");
    let metas = files(&audio_dir, "json");
    assert_eq!(metas.len(), 1);
    let meta: AudioMeta = read_json(&metas[0]);
    assert_eq!(meta.session, "no_1");
    assert_eq!(meta.bytes, payload.len() as u64);
    assert_eq!(meta.base_utc_ms, 1_200);
    assert_eq!(meta.rec_start_utc_ms, Some(1_200));
    assert_eq!(meta.rec_end_utc_ms, Some(4_200));
    assert_eq!(meta.server_req_arrival_utc_ms, 1_000);
    assert_eq!(meta.server_first_byte_utc_ms, Some(1_000));
    assert_eq!(meta.server_last_byte_utc_ms, Some(1_000));
    assert_eq!(std::fs::read(audio_dir.join(&meta.wav)).unwrap(), payload);
}

#[tokio::test]
async fn test_audio_accepted_at_root() {
    let f = fixture();

    let response = f.server.post("/").bytes(bytes::Bytes::from_static(b"RIFF")).await;

    response.assert_status_ok();
    let metas = files(&f.dir.path().join("audio"), "json");
    let meta: Value = read_json(&metas[0]);
    assert_eq!(meta["bytes"], json!(4));
    assert_eq!(meta["rec_start_utc_ms"], Value::Null);
}

#[tokio::test]
async fn test_audio_empty_body_keeps_empty_file() {
    let f = fixture();

    f.server.post("/audio").await.assert_status_ok();

    let metas = files(&f.dir.path().join("audio"), "json");
    let meta: AudioMeta = read_json(&metas[0]);
    assert_eq!(meta.bytes, 0);
    assert_eq!(meta.server_first_byte_utc_ms, None);
}

// =============================================================================
// SERVER LIFECYCLE TESTS
// =============================================================================

fn lifecycle_state(dir: &TempDir) -> AppState {
    let store = Arc::new(SessionStore::new(Arc::new(ManualClock::new(1_000))));
    let readiness = Arc::new(ReadinessTracker::new(Vec::new(), store.clone()));
    AppState::new(store, readiness, SessionRotationPolicy::default(), dir.path())
}

#[tokio::test]
async fn test_server_start_is_idempotent_and_stops() {
    let dir = TempDir::new().unwrap();
    let mut server = IngestionServer::new("127.0.0.1:0", lifecycle_state(&dir));
    assert!(!server.is_running());

    let addr = server.start().await.unwrap();
    assert!(server.is_running());
    assert_eq!(server.start().await.unwrap(), addr);
    assert_eq!(server.local_addr(), Some(addr));

    let health: HealthResponse = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(health.ok);

    assert!(server.stop(Duration::from_secs(3)).await);
    assert!(!server.is_running());
    assert_eq!(server.local_addr(), None);
    assert!(server.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_server_reports_occupied_port() {
    let dir = TempDir::new().unwrap();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = occupied.local_addr().unwrap().to_string();
    let mut server = IngestionServer::new(addr.clone(), lifecycle_state(&dir));

    let err = server.start().await.unwrap_err();

    match err {
        TandemError::Bind { addr: reported, .. } => assert_eq!(reported, addr),
        other => panic!("expected bind error, got {:?}", other),
    }
    assert!(!server.is_running());
}
