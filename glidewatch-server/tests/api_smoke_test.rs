//! API Smoke Tests
//!
//! Drives the HTTP surface the way the host plugin and operators use it:
//! presence and chunk events in, kick directives and login decisions out.
//! The runtime runs on a manual clock and evaluation passes are triggered
//! directly, so no test depends on wall time.

use axum::body::Body;
use glidewatch_core::{ActorId, ManualClock};
use glidewatch_server::api::{self, ApiState};
use glidewatch_server::notifier::WsTransport;
use glidewatch_server::{AppConfig, GuardRuntime};
use http::Request;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestServer {
    runtime: GuardRuntime,
    state: ApiState,
    clock: Arc<ManualClock>,
    _dir: tempfile::TempDir,
}

/// Runtime with a manual clock; the background tick is pushed out to an hour
/// so only explicit `evaluate()` calls run detection.
fn start() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.detection.tick_interval_ms = 3_600_000;
    let clock = Arc::new(ManualClock::starting_now());
    let runtime = GuardRuntime::start(
        config,
        dir.path().join("glidewatch.json"),
        Arc::new(WsTransport),
        clock.clone(),
    );
    let state = runtime.api_state();
    TestServer {
        runtime,
        state,
        clock,
        _dir: dir,
    }
}

async fn call(state: &ApiState, method: &str, uri: &str, body: Option<Value>) -> (u16, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = api::build_router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status().as_u16();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Presence for Steve gliding at chunk (`chunk_x`, 0), view distance 2
/// (25 expected chunks, 48 block radius).
fn presence(chunk_x: i32) -> Value {
    json!({
        "type": "presence",
        "actor": 1,
        "presence": {
            "name": "Steve",
            "world": 0,
            "position": {"x": (chunk_x * 16 + 8) as f64, "y": 100.0, "z": 8.0},
            "gliding": true,
            "view_distance": 2
        }
    })
}

/// The 5x5 square of chunks around (`chunk_x`, 0).
fn chunk_square(chunk_x: i32) -> Vec<Value> {
    let mut events = Vec::new();
    for dx in -2..=2 {
        for dz in -2..=2 {
            events.push(json!({
                "type": "chunk_generated",
                "world": 0,
                "chunk_x": chunk_x + dx,
                "chunk_z": dz
            }));
        }
    }
    events
}

async fn post_events(state: &ApiState, events: Vec<Value>) -> Value {
    let (status, body) = call(state, "POST", "/host/events", Some(json!({ "events": events }))).await;
    assert_eq!(status, 200, "body: {body}");
    body
}

// ============================================================================
// Health / metrics
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = start();
    let (status, json) = call(&server.state, "GET", "/health", None).await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "ok");
    assert!(!json["version"].as_str().unwrap().is_empty());
    server.runtime.shutdown().await;
}

#[tokio::test]
async fn test_metrics_json_reports_gauges() {
    let server = start();
    post_events(&server.state, vec![presence(0)]).await;

    let (status, json) = call(&server.state, "GET", "/metrics/json", None).await;
    assert_eq!(status, 200);
    assert_eq!(json["online_actors"], 1);
    assert_eq!(json["tracked_actors"], 1);
    assert_eq!(json["host_events"], 1);
    server.runtime.shutdown().await;
}

#[tokio::test]
async fn test_prometheus_format() {
    let server = start();
    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let resp = api::build_router(server.state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), 200);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("# TYPE glidewatch_bans_total counter"));
    assert!(text.contains("glidewatch_tracked_actors 0"));
    server.runtime.shutdown().await;
}

// ============================================================================
// Host flow
// ============================================================================

#[tokio::test]
async fn test_events_are_attributed() {
    let server = start();
    let mut events = vec![presence(0)];
    events.extend(chunk_square(0));
    let body = post_events(&server.state, events).await;
    assert_eq!(body["accepted"], 26);

    let (status, json) = call(&server.state, "GET", "/admin/status/steve", None).await;
    assert_eq!(status, 200);
    assert_eq!(json["chunk_count"], 25);
    assert_eq!(json["gliding"], true);
    assert_eq!(json["banned"], false);
    server.runtime.shutdown().await;
}

#[tokio::test]
async fn test_repeated_bursts_end_in_ban_and_login_refusal() {
    let server = start();

    for round in 0..5 {
        // Fly to fresh terrain each round so every chunk is new
        let at = round * 10;
        let mut events = vec![presence(at)];
        events.extend(chunk_square(at));
        post_events(&server.state, events).await;

        server.state.engine.evaluate();
        server.clock.advance_secs(4);
    }

    let body = post_events(&server.state, vec![]).await;
    let directives = body["directives"].as_array().unwrap();
    let kick = directives
        .iter()
        .find(|d| d["type"] == "kick")
        .expect("kick directive after the fifth trigger");
    assert_eq!(kick["actor"], 1);
    assert!(kick["message"].as_str().unwrap().contains("10 minutes"));

    post_events(&server.state, vec![json!({"type": "disconnect", "actor": 1})]).await;

    let (status, decision) = call(
        &server.state,
        "POST",
        "/host/login",
        Some(json!({"actor": 1, "name": "Steve"})),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(decision["decision"], "deny");
    assert_eq!(decision["remaining_minutes"], 10);

    let (_, bans) = call(&server.state, "GET", "/admin/bans", None).await;
    assert_eq!(bans.as_array().unwrap().len(), 1);
    assert_eq!(bans[0]["actor_name"], "Steve");

    let (status, _) = call(&server.state, "POST", "/admin/unban/STEVE", None).await;
    assert_eq!(status, 200);

    let (_, decision) = call(
        &server.state,
        "POST",
        "/host/login",
        Some(json!({"actor": 1, "name": "Steve"})),
    )
    .await;
    assert_eq!(decision["decision"], "allow");
    server.runtime.shutdown().await;
}

#[tokio::test]
async fn test_water_resets_streak() {
    let server = start();
    let mut events = vec![presence(0)];
    events.extend(chunk_square(0));
    post_events(&server.state, events).await;
    server.state.engine.evaluate();

    let mut wet = presence(0);
    wet["presence"]["in_liquid"] = json!(true);
    post_events(&server.state, vec![wet]).await;
    server.clock.advance_secs(4);
    server.state.engine.evaluate();

    let (_, json) = call(&server.state, "GET", "/admin/status/Steve", None).await;
    assert_eq!(json["continuous_count"], 0);
    server.runtime.shutdown().await;
}

// ============================================================================
// Admin
// ============================================================================

#[tokio::test]
async fn test_unknown_actor_is_404() {
    let server = start();
    let (status, json) = call(&server.state, "GET", "/admin/status/nobody", None).await;
    assert_eq!(status, 404);
    assert!(json["error"].as_str().unwrap().contains("nobody"));

    let (status, _) = call(&server.state, "POST", "/admin/unban/nobody", None).await;
    assert_eq!(status, 404);
    server.runtime.shutdown().await;
}

#[tokio::test]
async fn test_unban_of_expired_ban_is_404() {
    let server = start();
    server.state.engine.bans().ban(ActorId(1), "Steve");
    server.clock.advance_secs(11 * 60);

    let (status, json) = call(&server.state, "POST", "/admin/unban/Steve", None).await;
    assert_eq!(status, 404);
    assert!(json["error"].as_str().unwrap().contains("not banned"));
    assert!(server.state.engine.bans().is_empty(), "expired record dropped");
    server.runtime.shutdown().await;
}

#[tokio::test]
async fn test_reload_endpoint_reports_errors() {
    let server = start();
    // No file yet: reload fails and the status records why
    let (status, json) = call(&server.state, "POST", "/admin/reload", None).await;
    assert_eq!(status, 422);
    assert!(json["error"].is_string());

    let path = server.state.reloader.path().to_path_buf();
    std::fs::write(&path, r#"{"detection": {"continuous_threshold": 3}}"#).unwrap();
    let (status, json) = call(&server.state, "POST", "/admin/reload", None).await;
    assert_eq!(status, 200);
    assert_eq!(json["reload_count"], 1);
    assert_eq!(json["last_reload_success"], true);
    server.runtime.shutdown().await;
}

#[tokio::test]
async fn test_malformed_event_is_rejected() {
    let server = start();
    let (status, _) = call(
        &server.state,
        "POST",
        "/host/events",
        Some(json!({"events": [{"type": "teleport", "actor": 1}]})),
    )
    .await;
    assert!(status == 400 || status == 422, "status {status}");
    server.runtime.shutdown().await;
}
