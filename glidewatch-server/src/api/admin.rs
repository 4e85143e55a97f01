//! Operator endpoints
//!
//! Endpoints:
//! - GET  /admin/status/{name}
//! - GET  /admin/bans
//! - GET  /admin/windows
//! - POST /admin/unban/{name}
//! - GET  /admin/reload  (status)
//! - POST /admin/reload  (reload now)

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{extract::State, routing::get, routing::post, Json, Router};
use glidewatch_core::{ActiveBan, ActorId, WindowSnapshot};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{error_response, ApiState};

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/admin/status/{name}", get(status))
        .route("/admin/bans", get(bans))
        .route("/admin/windows", get(windows))
        .route("/admin/unban/{name}", post(unban))
        .route("/admin/reload", get(reload_status).post(reload))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnbanResponse {
    pub actor_id: ActorId,
    pub actor_name: String,
}

async fn status(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.engine.status_by_name(&name) {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("no record of `{name}`")),
    }
}

async fn bans(State(state): State<ApiState>) -> Json<Vec<ActiveBan>> {
    Json(state.engine.bans().active_bans())
}

async fn windows(State(state): State<ApiState>) -> Json<Vec<WindowSnapshot>> {
    Json(state.engine.snapshots())
}

async fn unban(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let bans = state.engine.bans();
    let Some(record) = bans.find_by_name(&name) else {
        return error_response(StatusCode::NOT_FOUND, format!("`{name}` is not banned"));
    };
    // drops the record if it has already expired
    if !bans.is_banned(record.actor_id) {
        return error_response(StatusCode::NOT_FOUND, format!("`{name}` is not banned"));
    }
    match bans.unban(record.actor_id) {
        Some(record) => {
            info!(actor = %record.actor_id, name = %record.actor_name, "Ban lifted by operator");
            Json(UnbanResponse {
                actor_id: record.actor_id,
                actor_name: record.actor_name,
            })
            .into_response()
        }
        None => error_response(StatusCode::NOT_FOUND, format!("`{name}` is not banned")),
    }
}

async fn reload_status(State(state): State<ApiState>) -> Response {
    Json(state.reloader.status()).into_response()
}

async fn reload(State(state): State<ApiState>) -> Response {
    match state.reloader.reload() {
        Ok(()) => Json(state.reloader.status()).into_response(),
        Err(e) => error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}
