use axum::http::StatusCode;
use axum::Json;
use relay_memory::MemoryError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn error_body(msg: impl Into<String>) -> Json<ErrorBody> {
    Json(ErrorBody { error: msg.into() })
}

pub fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, error_body(msg))
}

pub fn not_found(msg: impl Into<String>) -> ApiError {
    (StatusCode::NOT_FOUND, error_body(msg))
}

pub fn conflict(msg: impl Into<String>) -> ApiError {
    (StatusCode::CONFLICT, error_body(msg))
}

pub fn bad_gateway(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_GATEWAY, error_body(msg))
}

/// Map a `relay-memory` error onto the `400/404/409` taxonomy the HTTP
/// handlers use; anything else collapses to `400` with its display text.
pub fn map_memory_error(err: MemoryError) -> ApiError {
    match err {
        MemoryError::ModeNotFound { .. } => not_found(err.to_string()),
        MemoryError::MemoryNotFound { .. } => not_found(err.to_string()),
        MemoryError::PrepareNotFound { .. } => not_found(err.to_string()),
        MemoryError::InvalidModeId(_) => bad_request(err.to_string()),
        MemoryError::FieldTooLong { .. } => bad_request(err.to_string()),
        MemoryError::Database(_) | MemoryError::Serialization(_) | MemoryError::Io(_) => {
            bad_gateway(err.to_string())
        }
    }
}
