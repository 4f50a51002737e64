use std::io::Write as _;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::cancel::CancelHandle;
use crate::error::RunnerError;
use crate::process::{spawn_streaming, CaptureBuffer};
use crate::types::{RunRequest, RunResult, RunnerEvent, Usage};
use crate::Runner;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Runner for the primary agent CLI: a `claude`-shaped binary invoked with
/// `--output-format stream-json`, one JSON object per stdout line, ending in
/// a terminal `{"type":"result", ...}` object carrying `session_id` and
/// `usage`. Supports resuming a prior turn via `--resume <id>` and retrying
/// once, uncapped, on a max-turns exhaustion.
pub struct PrimaryRunner {
    pub command: String,
}

impl PrimaryRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn build_command(
        &self,
        req: &RunRequest,
        sys_prompt_path: &std::path::Path,
    ) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--no-session-persistence")
            .arg("--system-prompt-file")
            .arg(sys_prompt_path);

        if let Some(model) = &req.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(session_id) = &req.session_id {
            cmd.arg("--resume").arg(session_id);
        }
        if let Some(max_turns) = req.max_turns {
            cmd.arg("--max-turns").arg(max_turns.to_string());
        }
        if let Some(workdir) = &req.workdir {
            cmd.current_dir(workdir);
        }
        for (key, value) in &req.env_overrides {
            cmd.env(key, value);
        }
        cmd
    }

    async fn run_once(
        &self,
        req: &RunRequest,
        cancel: &CancelHandle,
        events: &mpsc::Sender<RunnerEvent>,
        max_turns_override: Option<u32>,
    ) -> Result<TerminalOutcome, RunnerError> {
        let mut req = req.clone();
        if let Some(max_turns) = max_turns_override {
            req.max_turns = Some(max_turns);
        }

        let sys_file = write_system_prompt(req.system_prompt.as_deref())
            .map_err(|e| RunnerError::Io(e.to_string()))?;
        let cmd = self.build_command(&req, sys_file.path());
        let timeout = req
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
        let events = events.clone();
        let recv_task = tokio::spawn(async move {
            let mut capture = CaptureBuffer::new();
            let mut terminal: Option<TerminalOutcome> = None;
            let mut saw_error_line: Option<String> = None;
            while let Some(line) = line_rx.recv().await {
                if let Some(outcome) = handle_line(&line, &mut capture, &events, &mut saw_error_line).await {
                    terminal = Some(outcome);
                }
            }
            (capture, terminal, saw_error_line)
        });

        let outcome = spawn_streaming(cmd, Some(req.prompt.clone()), timeout, cancel.clone(), line_tx).await?;

        let (capture, terminal, saw_error_line) = recv_task
            .await
            .map_err(|e| RunnerError::Io(e.to_string()))?;

        if outcome.is_timeout {
            return Err(RunnerError::Transient("subprocess timed out".to_string()));
        }

        if let Some(outcome) = terminal {
            return Ok(outcome);
        }

        if let Some(err_line) = saw_error_line {
            return Err(RunnerError::classify(&err_line));
        }
        Ok(TerminalOutcome {
            text: capture.into_string(),
            session_id: None,
            usage: None,
            is_error: false,
        })
    }
}

struct TerminalOutcome {
    text: String,
    session_id: Option<String>,
    usage: Option<Usage>,
    is_error: bool,
}

async fn handle_line(
    line: &str,
    capture: &mut CaptureBuffer,
    events: &mpsc::Sender<RunnerEvent>,
    saw_error_line: &mut Option<String>,
) -> Option<TerminalOutcome> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let json: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            capture.push(line);
            capture.push("\n");
            return None;
        }
    };

    match json.get("type").and_then(|v| v.as_str()) {
        Some("assistant") => {
            if let Some(text) = json.pointer("/delta/text").and_then(|v| v.as_str()) {
                capture.push(text);
                let _ = events
                    .send(RunnerEvent::AssistantDelta {
                        text: text.to_string(),
                    })
                    .await;
            }
            None
        }
        Some("tool_use") => {
            let name = json
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let input = json.get("input").cloned().unwrap_or(serde_json::json!({}));
            let _ = events.send(RunnerEvent::ToolUse { name, input }).await;
            None
        }
        Some("tool_result") => {
            let name = json
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let output = json
                .get("output")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let _ = events.send(RunnerEvent::ToolResult { name, output }).await;
            None
        }
        Some("result") => {
            let is_error = json
                .get("is_error")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let text = json
                .get("result")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            if is_error {
                *saw_error_line = Some(text.clone());
            }
            let session_id = json
                .get("session_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let tokens_in = json
                .pointer("/usage/input_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            let tokens_out = json
                .pointer("/usage/output_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            let context_window = json
                .pointer("/usage/context_window")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32);
            Some(TerminalOutcome {
                text: if text.is_empty() {
                    capture.as_str().to_string()
                } else {
                    text
                },
                session_id,
                usage: Some(Usage {
                    input_tokens: tokens_in,
                    output_tokens: tokens_out,
                    total_context_tokens: tokens_in + tokens_out,
                    context_window,
                }),
                is_error,
            })
        }
        Some("status") => {
            if let Some(text) = json.get("text").and_then(|v| v.as_str()) {
                let _ = events
                    .send(RunnerEvent::Status {
                        text: text.to_string(),
                    })
                    .await;
            }
            None
        }
        _ => None,
    }
}

fn write_system_prompt(system_prompt: Option<&str>) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("relay-sys-")
        .suffix(".txt")
        .tempfile()?;
    if let Some(prompt) = system_prompt {
        file.write_all(prompt.as_bytes())?;
        file.flush()?;
    }
    Ok(file)
}

#[async_trait]
impl Runner for PrimaryRunner {
    fn engine_name(&self) -> &'static str {
        "primary"
    }

    fn supports_max_turns_retry(&self) -> bool {
        true
    }

    fn supports_session_resume(&self) -> bool {
        true
    }

    async fn run(
        &self,
        req: RunRequest,
        cancel: CancelHandle,
        events: mpsc::Sender<RunnerEvent>,
    ) -> RunResult {
        let started = Instant::now();

        let outcome = match self.run_once(&req, &cancel, &events, None).await {
            Err(RunnerError::MaxTurnsExceeded) => {
                warn!("primary runner hit max-turns cap, retrying uncapped once");
                self.run_once(&req, &cancel, &events, Some(u32::MAX)).await
            }
            other => other,
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(outcome) if !outcome.is_error => RunResult {
                success: true,
                text: outcome.text,
                session_id: outcome.session_id,
                error: None,
                duration_ms,
                is_timeout: false,
                usage: outcome.usage,
            },
            Ok(outcome) => RunResult {
                success: false,
                text: outcome.text.clone(),
                session_id: outcome.session_id,
                error: Some(RunnerError::classify(&outcome.text)),
                duration_ms,
                is_timeout: false,
                usage: outcome.usage,
            },
            Err(_) if cancel.is_cancelled() => RunResult::cancelled(duration_ms),
            Err(e) => {
                let is_timeout = matches!(&e, RunnerError::Transient(msg) if msg.contains("timed out"));
                RunResult {
                    success: false,
                    text: String::new(),
                    session_id: None,
                    error: Some(e),
                    duration_ms,
                    is_timeout,
                    usage: None,
                }
            }
        }
    }
}
