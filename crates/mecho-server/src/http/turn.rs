use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::{conflict, map_memory_error, ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareRequest {
    pub mode_id: String,
    pub session_key: String,
    #[allow(dead_code)]
    pub engine: String,
    #[serde(default)]
    pub force_full: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareResponse {
    pub prepare_id: String,
    pub mode: String,
    pub from_revision: i64,
    pub to_revision: i64,
    pub xml: String,
}

pub async fn prepare_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PrepareRequest>,
) -> Result<Json<PrepareResponse>, ApiError> {
    let handle = state.memory.get(&req.mode_id).map_err(map_memory_error)?;
    let from_revision = handle
        .store
        .get_last_acked_revision(&req.session_key)
        .map_err(map_memory_error)?;

    let prepared = relay_memory::delta::prepare(&handle.store, &req.session_key, from_revision, req.force_full)
        .map_err(map_memory_error)?;

    Ok(Json(PrepareResponse {
        prepare_id: prepared.prepare_id,
        mode: prepared.mode.to_string(),
        from_revision: prepared.from_revision,
        to_revision: prepared.to_revision,
        xml: prepared.xml,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub mode_id: String,
    pub prepare_id: String,
    pub session_key: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent: Option<bool>,
}

pub async fn ack_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AckRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    let status = match req.status.as_str() {
        "success" => relay_memory::types::AckStatus::Success,
        "failed" => relay_memory::types::AckStatus::Failed,
        other => {
            return Err(crate::error::bad_request(format!(
                "status must be 'success' or 'failed', got '{other}'"
            )))
        }
    };

    let handle = state.memory.get(&req.mode_id).map_err(map_memory_error)?;

    let turn = handle
        .store
        .get_prepare_turn(&req.prepare_id)
        .map_err(map_memory_error)?
        .ok_or_else(|| crate::error::not_found(format!("prepare turn not found: {}", req.prepare_id)))?;
    if turn.session_key != req.session_key {
        return Err(conflict("session_key does not match the prepare turn's session"));
    }

    let applied = handle
        .store
        .ack_prepare_turn(&req.prepare_id, status)
        .map_err(map_memory_error)?;

    handle.store.checkpoint();

    Ok(Json(AckResponse {
        ok: true,
        idempotent: if applied { None } else { Some(true) },
    }))
}
