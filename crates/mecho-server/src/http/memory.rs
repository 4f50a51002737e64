use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::{map_memory_error, not_found, ApiError};

#[derive(Debug, Deserialize)]
pub struct ModeQuery {
    #[serde(rename = "modeId")]
    pub mode_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreMemoryBody {
    pub name: String,
    pub description: String,
    pub detail: String,
    pub updated_at: String,
}

pub async fn get_core_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ModeQuery>,
) -> Result<Json<Option<CoreMemoryBody>>, ApiError> {
    let handle = state.memory.get(&q.mode_id).map_err(map_memory_error)?;
    let core = handle.store.get_core().map_err(map_memory_error)?;
    Ok(Json(core.map(|c| CoreMemoryBody {
        name: c.name,
        description: c.description,
        detail: c.detail,
        updated_at: c.updated_at,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutCoreRequest {
    pub mode_id: String,
    pub name: String,
    pub description: String,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct RevisionResponse {
    pub revision: i64,
}

pub async fn put_core_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PutCoreRequest>,
) -> Result<Json<RevisionResponse>, ApiError> {
    let handle = state.memory.get(&req.mode_id).map_err(map_memory_error)?;
    let revision = handle
        .store
        .upsert_core(&req.name, &req.description, &req.detail)
        .map_err(map_memory_error)?;
    Ok(Json(RevisionResponse { revision }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CuratedSummary {
    pub memory_id: String,
    pub name: String,
    pub description: String,
    pub updated_at: String,
}

pub async fn list_curated_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ModeQuery>,
) -> Result<Json<Vec<CuratedSummary>>, ApiError> {
    let handle = state.memory.get(&q.mode_id).map_err(map_memory_error)?;
    let rows = handle.store.list_curated().map_err(map_memory_error)?;
    Ok(Json(
        rows.into_iter()
            .map(|r| CuratedSummary {
                memory_id: r.memory_id,
                name: r.name,
                description: r.description,
                updated_at: r.updated_at,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CuratedDetailQuery {
    #[serde(rename = "modeId")]
    pub mode_id: String,
    #[serde(rename = "memoryId")]
    pub memory_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CuratedDetail {
    pub memory_id: String,
    pub name: String,
    pub description: String,
    pub detail: String,
    pub updated_at: String,
}

pub async fn get_curated_detail_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CuratedDetailQuery>,
) -> Result<Json<CuratedDetail>, ApiError> {
    let handle = state.memory.get(&q.mode_id).map_err(map_memory_error)?;
    let row = handle
        .store
        .get_curated(&q.memory_id)
        .map_err(map_memory_error)?
        .filter(|r| !r.is_deleted)
        .ok_or_else(|| not_found(format!("curated memory not found: {}", q.memory_id)))?;
    Ok(Json(CuratedDetail {
        memory_id: row.memory_id,
        name: row.name,
        description: row.description,
        detail: row.detail,
        updated_at: row.updated_at,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutCuratedRequest {
    pub mode_id: String,
    pub memory_id: String,
    pub name: String,
    pub description: String,
    pub detail: String,
}

pub async fn put_curated_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PutCuratedRequest>,
) -> Result<Json<RevisionResponse>, ApiError> {
    let handle = state.memory.get(&req.mode_id).map_err(map_memory_error)?;
    let revision = handle
        .store
        .upsert_curated(&req.memory_id, &req.name, &req.description, &req.detail)
        .map_err(map_memory_error)?;
    Ok(Json(RevisionResponse { revision }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCuratedRequest {
    pub mode_id: String,
    pub memory_id: String,
}

pub async fn delete_curated_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteCuratedRequest>,
) -> Result<Json<RevisionResponse>, ApiError> {
    let handle = state.memory.get(&req.mode_id).map_err(map_memory_error)?;
    let revision = handle
        .store
        .soft_delete_curated(&req.memory_id)
        .map_err(map_memory_error)?;
    Ok(Json(RevisionResponse { revision }))
}
