use thiserror::Error;

/// Shared error taxonomy used at crate boundaries that don't already have a
/// narrower, domain-specific error enum of their own (session/memory/runner
/// errors each define their own `thiserror` type and convert into this one
/// only at the HTTP/CLI edge).
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Stable wire-level error code, mirrored in every HTTP error body.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "CONFIG_ERROR",
            RelayError::Validation(_) => "VALIDATION_ERROR",
            RelayError::NotFound(_) => "NOT_FOUND",
            RelayError::Conflict(_) => "CONFLICT",
            RelayError::Transient(_) => "TRANSIENT",
            RelayError::Auth(_) => "AUTH_FAILED",
            RelayError::RateLimit(_) => "RATE_LIMIT",
            RelayError::Cancelled => "CANCELLED",
            RelayError::Timeout { .. } => "TIMEOUT",
            RelayError::Database(_) => "DATABASE_ERROR",
            RelayError::Serialization(_) => "SERIALIZATION_ERROR",
            RelayError::Io(_) => "IO_ERROR",
            RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
