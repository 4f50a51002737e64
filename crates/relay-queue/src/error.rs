use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum QueueError {
    #[error("a task with key '{0}' is already running or pending")]
    Duplicate(String),

    #[error("queue is full ({pending} pending + {running} running >= {max})")]
    QueueFull {
        pending: usize,
        running: usize,
        max: usize,
    },

    #[error("no task found for key '{0}'")]
    NotFound(String),

    #[error("failed to allocate turn workspace: {0}")]
    Workspace(String),
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Duplicate(_) => "duplicate",
            QueueError::QueueFull { .. } => "queue_full",
            QueueError::NotFound(_) => "not_found",
            QueueError::Workspace(_) => "workspace_error",
        }
    }
}
