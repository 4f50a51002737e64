use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::RunnerError;

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub env_overrides: HashMap<String, String>,
    pub workdir: Option<std::path::PathBuf>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_context_tokens: u64,
    pub context_window: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub success: bool,
    pub text: String,
    pub session_id: Option<String>,
    pub error: Option<RunnerError>,
    pub duration_ms: u64,
    pub is_timeout: bool,
    pub usage: Option<Usage>,
}

impl RunResult {
    pub fn cancelled(duration_ms: u64) -> Self {
        Self {
            success: false,
            text: String::new(),
            session_id: None,
            error: Some(RunnerError::Cancelled),
            duration_ms,
            is_timeout: false,
            usage: None,
        }
    }
}

/// One streamed event from a running subprocess, emitted as soon as it's
/// parsed off stdout so a live-update UI can render progress before the
/// run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerEvent {
    AssistantDelta { text: String },
    ToolUse { name: String, input: serde_json::Value },
    ToolResult { name: String, output: String },
    Status { text: String },
}
