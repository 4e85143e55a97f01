//! HTTP/JSON API Layer
//!
//! ## Architecture
//! ```text
//! Host server plugin            Operators
//!       ↓ POST /host/*              ↓ GET/POST /admin/*
//! Axum Router (http.bind, default 127.0.0.1:8787)
//!       ↓
//! EventPump (ordered)           DetectionEngine / BanStore (direct reads)
//! ```
//!
//! ## Endpoints
//! - `GET  /health`
//! - `GET  /metrics`, `GET /metrics/json`
//! - `POST /host/events`: batch of host events, returns pending directives
//! - `POST /host/login`: login gate
//! - `GET  /admin/status/{name}`, `GET /admin/bans`, `GET /admin/windows`
//! - `POST /admin/unban/{name}`
//! - `GET|POST /admin/reload`

pub mod admin;
pub mod host;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{middleware, routing::get, Json, Router};
use glidewatch_core::{ChunkAttributor, DetectionEngine};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bridge::{EventSender, HostRegistry, KickQueue};
use crate::hotreload::ConfigReloader;
use crate::metrics::ServerMetrics;

/// Shared state available to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<DetectionEngine>,
    pub attributor: Arc<ChunkAttributor>,
    /// Presence reported by the host
    pub registry: Arc<HostRegistry>,
    /// Kicks and warnings waiting for the host
    pub directives: Arc<KickQueue>,
    /// Channel into the event pump
    pub events: EventSender,
    pub reloader: Arc<ConfigReloader>,
    /// Server-wide metrics (lock-free atomics)
    pub metrics: Arc<ServerMetrics>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// JSON error with a status code.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Build the full API router with all endpoints
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(crate::metrics::prometheus_handler))
        .route("/metrics/json", get(crate::metrics::json_metrics_handler))
        .merge(host::routes())
        .merge(admin::routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `shutdown` resolves.
pub async fn serve(
    state: ApiState,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
