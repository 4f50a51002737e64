use thiserror::Error;

/// Errors that can occur during session store operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The requested session does not exist.
    #[error("session not found: {key}")]
    NotFound { key: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The provided session key string is malformed.
    #[error("invalid session key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
