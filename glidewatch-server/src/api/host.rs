//! Host endpoints: the game server's side of the bridge
//!
//! Endpoints:
//! - POST /host/events
//! - POST /host/login

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{extract::State, routing::post, Json, Router};
use glidewatch_core::{ActorId, LoginDecision};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::{error_response, ApiState};
use crate::bridge::{HostDirective, HostEvent, HostEventPayload};

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/host/events", post(post_events))
        .route("/host/login", post(login))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EventBatch {
    pub events: Vec<HostEventPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventBatchResponse {
    pub accepted: usize,
    /// Kicks and warnings the host must apply
    pub directives: Vec<HostDirective>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub actor: ActorId,
    pub name: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Queue a batch, wait until the pump has handled it, then hand back every
/// pending directive.
async fn post_events(State(state): State<ApiState>, Json(batch): Json<EventBatch>) -> Response {
    let accepted = batch.events.len();
    for payload in batch.events {
        if state.events.send(HostEvent::Host(payload)).is_err() {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "event pump stopped");
        }
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    if state.events.send(HostEvent::Flush { reply: reply_tx }).is_err() || reply_rx.await.is_err() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "event pump stopped");
    }

    Json(EventBatchResponse {
        accepted,
        directives: state.directives.drain(),
    })
    .into_response()
}

async fn login(State(state): State<ApiState>, Json(req): Json<LoginRequest>) -> Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    let sent = state.events.send(HostEvent::Login {
        actor: req.actor,
        name: req.name,
        reply: reply_tx,
    });
    if sent.is_err() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "event pump stopped");
    }

    match reply_rx.await {
        Ok(decision) => Json::<LoginDecision>(decision).into_response(),
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "event pump stopped"),
    }
}
