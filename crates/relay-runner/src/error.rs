use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum RunnerError {
    #[error("failed to spawn subprocess: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("session resume failed: {0}")]
    SessionResumeFailed(String),

    #[error("exceeded max turns")]
    MaxTurnsExceeded,

    #[error("failed to parse subprocess output: {0}")]
    Parse(String),

    #[error("cancelled")]
    Cancelled,
}

impl RunnerError {
    /// Classify a raw stderr/terminal message into a structured error. Every
    /// pattern here has shown up in a real agent CLI's failure text; the
    /// match is deliberately loose (substring, case-insensitive) since CLIs
    /// don't publish a stable error taxonomy of their own.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("max turns") || lower.contains("maximum turns") {
            return RunnerError::MaxTurnsExceeded;
        }
        if lower.contains("unauthorized")
            || lower.contains("invalid api key")
            || lower.contains("authentication")
        {
            return RunnerError::Auth(message.to_string());
        }
        if lower.contains("rate limit") || lower.contains("429") {
            return RunnerError::RateLimit(message.to_string());
        }
        if lower.contains("overloaded")
            || lower.contains("529")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("temporarily unavailable")
        {
            return RunnerError::Transient(message.to_string());
        }
        if lower.contains("no conversation found")
            || lower.contains("session not found")
            || lower.contains("resume") && lower.contains("fail")
        {
            return RunnerError::SessionResumeFailed(message.to_string());
        }

        RunnerError::Transient(message.to_string())
    }

    pub fn is_retryable_transient(&self) -> bool {
        matches!(self, RunnerError::Transient(_) | RunnerError::RateLimit(_))
    }
}
