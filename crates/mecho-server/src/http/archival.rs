use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::{bad_gateway, map_memory_error, ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub mode_id: String,
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub candidate_limit: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub memory_id: String,
    pub name: String,
    pub description: String,
    pub detail: Option<String>,
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
}

pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let handle = state.memory.get(&req.mode_id).map_err(map_memory_error)?;
    let query_embedding = state
        .embedding
        .embed(&req.query)
        .await
        .map_err(|e| bad_gateway(e.to_string()))?;
    let hits = handle
        .archival
        .search(&query_embedding, req.top_k, req.candidate_limit, req.min_score)
        .map_err(map_memory_error)?;
    Ok(Json(SearchResponse {
        hits: hits
            .into_iter()
            .map(|h| SearchHit {
                memory_id: h.memory_id,
                name: h.name,
                description: h.description,
                detail: h.detail,
                score: h.score,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertRequest {
    pub mode_id: String,
    #[serde(default)]
    pub memory_id: Option<String>,
    pub name: String,
    pub description: String,
    pub detail: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertResponse {
    pub memory_id: String,
    pub created: bool,
}

pub async fn upsert_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpsertRequest>,
) -> Result<Json<UpsertResponse>, ApiError> {
    let handle = state.memory.get(&req.mode_id).map_err(map_memory_error)?;

    let name = req.name.trim();
    let description = req.description.trim();
    let detail = req.detail.trim();
    let embedding_text = format!("name: {name}\ndescription: {description}\ndetail: {detail}");
    let embedding = state
        .embedding
        .embed(&embedding_text)
        .await
        .map_err(|e| bad_gateway(e.to_string()))?;

    let metadata_json = req
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| crate::error::bad_request(e.to_string()))?;

    let (memory_id, created) = handle
        .archival
        .upsert(
            req.memory_id.as_deref(),
            name,
            description,
            detail,
            embedding,
            metadata_json.as_deref(),
        )
        .map_err(map_memory_error)?;

    Ok(Json(UpsertResponse { memory_id, created }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub mode_id: String,
    pub memory_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub ok: bool,
}

pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let handle = state.memory.get(&req.mode_id).map_err(map_memory_error)?;
    handle.archival.delete(&req.memory_id).map_err(map_memory_error)?;
    Ok(Json(DeleteResponse { ok: true }))
}
