use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid schedule JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("No schedule with key '{0}'")]
    NotFound(String),

    #[error("A schedule with key '{0}' already exists")]
    Duplicate(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
