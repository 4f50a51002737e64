use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::{map_memory_error, ApiError};

#[derive(Debug, Serialize)]
pub struct ModeListResponse {
    pub modes: Vec<String>,
}

pub async fn list_handler(State(state): State<Arc<AppState>>) -> Result<Json<ModeListResponse>, ApiError> {
    let modes = state.memory.mode_list().map_err(map_memory_error)?;
    Ok(Json(ModeListResponse { modes }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub mode_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    pub mode_id: String,
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRequest>,
) -> Result<Json<CreateResponse>, ApiError> {
    let mode_id = state.memory.mode_create(&req.mode_id).map_err(map_memory_error)?;
    Ok(Json(CreateResponse { mode_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub mode_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub ok: bool,
}

pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.memory.mode_delete(&req.mode_id).map_err(map_memory_error)?;
    Ok(Json(DeleteResponse { ok: true }))
}
