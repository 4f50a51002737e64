use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("mode not found: {mode_id}")]
    ModeNotFound { mode_id: String },

    #[error("curated memory not found: {memory_id}")]
    MemoryNotFound { memory_id: String },

    #[error("prepare turn not found: {prepare_id}")]
    PrepareNotFound { prepare_id: String },

    #[error("invalid mode id: {0}")]
    InvalidModeId(String),

    #[error("field too long: {field} is {len} chars, max {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
