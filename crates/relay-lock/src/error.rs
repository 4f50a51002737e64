use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LockError>;
