//! Coordinator HTTP API
//!
//! Admin surface for the membership service: servers enlist and report
//! suspected crashes here, and operators inspect the list. Mutating
//! handlers run on the blocking pool because the membership mutators hold
//! a lock and `hint-down` performs a synchronous verification ping.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::membership::{MasterRecoveryInfo, ServerId, ServerList, ServiceMask};

/// Shared coordinator state for HTTP handlers.
#[derive(Clone)]
pub struct CoordState {
    pub list: Arc<ServerList>,
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/servers", get(servers))
        .route("/enlist", post(enlist))
        .route("/hint-down", post(hint_down))
        .route("/recovery-info", post(recovery_info))
        .route("/sync", post(sync))
        .with_state(state)
}

/// Cluster overview: list version, counts, slot usage.
async fn status(State(state): State<CoordState>) -> Response {
    let list = &state.list;
    Json(json!({
        "version": list.version(),
        "masters": list.master_count(),
        "backups": list.backup_count(),
        "slots": list.len(),
    }))
    .into_response()
}

/// Full server list as members would see it.
async fn servers(State(state): State<CoordState>) -> Response {
    let filter = ServiceMask::MASTER | ServiceMask::BACKUP | ServiceMask::MEMBERSHIP;
    Json(state.list.serialize(filter)).into_response()
}

#[derive(Deserialize)]
struct EnlistRequest {
    /// Id of the presumed-dead server this one replaces, if any.
    #[serde(default)]
    replaces_id: Option<ServerId>,
    /// Service names: "master", "backup", "membership", "ping".
    services: Vec<String>,
    #[serde(default)]
    read_speed: u32,
    service_locator: String,
}

async fn enlist(State(state): State<CoordState>, Json(req): Json<EnlistRequest>) -> Response {
    let mask = match ServiceMask::from_names(&req.services) {
        Ok(mask) => mask,
        Err(e) => return (e.to_http_status(), e.to_string()).into_response(),
    };

    let list = state.list.clone();
    let result = tokio::task::spawn_blocking(move || {
        list.enlist_server(req.replaces_id, mask, req.read_speed, &req.service_locator)
    })
    .await;

    match result {
        Ok(Ok(id)) => Json(json!({ "server_id": id })).into_response(),
        Ok(Err(e)) => (e.to_http_status(), e.to_string()).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("enlist task failed: {}", e),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct HintDownRequest {
    server_id: ServerId,
}

async fn hint_down(State(state): State<CoordState>, Json(req): Json<HintDownRequest>) -> Response {
    let list = state.list.clone();
    let result = tokio::task::spawn_blocking(move || list.hint_server_down(req.server_id)).await;

    match result {
        Ok(Ok(down)) => Json(json!({ "down": down })).into_response(),
        Ok(Err(e)) => (e.to_http_status(), e.to_string()).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("hint-down task failed: {}", e),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct RecoveryInfoRequest {
    server_id: ServerId,
    master_recovery_info: MasterRecoveryInfo,
}

async fn recovery_info(
    State(state): State<CoordState>,
    Json(req): Json<RecoveryInfoRequest>,
) -> Response {
    let list = state.list.clone();
    let result = tokio::task::spawn_blocking(move || {
        list.set_master_recovery_info(req.server_id, req.master_recovery_info)
    })
    .await;

    match result {
        Ok(Ok(())) => Json(json!({ "status": "ok" })).into_response(),
        Ok(Err(e)) => (e.to_http_status(), e.to_string()).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("recovery-info task failed: {}", e),
        )
            .into_response(),
    }
}

/// Block until every membership-capable follower is caught up.
async fn sync(State(state): State<CoordState>) -> Response {
    let list = state.list.clone();
    match tokio::task::spawn_blocking(move || list.sync()).await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("sync task failed: {}", e),
        )
            .into_response(),
    }
}
