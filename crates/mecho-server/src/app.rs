use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use relay_memory::MemoryService;

use crate::config::MechoConfig;
use crate::embedding::EmbeddingClient;

/// Central shared state, passed as `Arc<AppState>` to every handler.
pub struct AppState {
    pub memory: MemoryService,
    pub embedding: EmbeddingClient,
}

impl AppState {
    pub fn new(config: &MechoConfig) -> Self {
        Self {
            memory: MemoryService::new(config.server.modes_root.clone()),
            embedding: EmbeddingClient::new(
                config.embedding.base_url.clone(),
                config.embedding.api_key.clone(),
            ),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/v1/turn/prepare", post(crate::http::turn::prepare_handler))
        .route("/v1/turn/ack", post(crate::http::turn::ack_handler))
        .route(
            "/v1/memory/core",
            get(crate::http::memory::get_core_handler).put(crate::http::memory::put_core_handler),
        )
        .route(
            "/v1/memory/curated",
            get(crate::http::memory::list_curated_handler)
                .put(crate::http::memory::put_curated_handler)
                .delete(crate::http::memory::delete_curated_handler),
        )
        .route(
            "/v1/memory/curated/detail",
            get(crate::http::memory::get_curated_detail_handler),
        )
        .route(
            "/v1/archival/search",
            post(crate::http::archival::search_handler),
        )
        .route(
            "/v1/archival/upsert",
            post(crate::http::archival::upsert_handler),
        )
        .route("/v1/archival", delete(crate::http::archival::delete_handler))
        .route("/v1/mode/list", get(crate::http::mode::list_handler))
        .route("/v1/mode/create", post(crate::http::mode::create_handler))
        .route("/v1/mode/delete", post(crate::http::mode::delete_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
