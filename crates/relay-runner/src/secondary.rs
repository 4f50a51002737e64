use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::cancel::CancelHandle;
use crate::error::RunnerError;
use crate::process::{spawn_streaming, CaptureBuffer};
use crate::types::{RunRequest, RunResult, RunnerEvent, Usage};
use crate::Runner;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Runner for the secondary agent CLI: resumes via a `resume <thread_id>`
/// subcommand rather than a flag, streams coarser-granularity `agent_message`
/// events instead of per-token deltas, and has no max-turns retry concept —
/// the underlying CLI doesn't expose a turn cap to exhaust.
pub struct SecondaryRunner {
    pub command: String,
}

impl SecondaryRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn build_command(&self, req: &RunRequest) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.command);

        if let Some(thread_id) = &req.session_id {
            cmd.arg("resume").arg(thread_id);
        } else {
            cmd.arg("run");
        }
        cmd.arg("--json");

        if let Some(model) = &req.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(prompt) = &req.system_prompt {
            cmd.arg("--system").arg(prompt);
        }
        if let Some(workdir) = &req.workdir {
            cmd.current_dir(workdir);
        }
        for (key, value) in &req.env_overrides {
            cmd.env(key, value);
        }
        cmd
    }
}

#[async_trait]
impl Runner for SecondaryRunner {
    fn engine_name(&self) -> &'static str {
        "secondary"
    }

    fn supports_max_turns_retry(&self) -> bool {
        false
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
        let cmd = self.build_command(&req);
        let timeout = req
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
        let events_for_task = events.clone();
        let recv_task = tokio::spawn(async move {
            let mut capture = CaptureBuffer::new();
            let mut thread_id: Option<String> = None;
            let mut usage: Option<Usage> = None;
            let mut error: Option<String> = None;

            while let Some(line) = line_rx.recv().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let json: serde_json::Value = match serde_json::from_str(line) {
                    Ok(v) => v,
                    Err(_) => {
                        capture.push(line);
                        capture.push("\n");
                        continue;
                    }
                };

                if thread_id.is_none() {
                    if let Some(id) = json.get("thread_id").and_then(|v| v.as_str()) {
                        thread_id = Some(id.to_string());
                    }
                }

                match json.get("type").and_then(|v| v.as_str()) {
                    Some("agent_message") => {
                        if let Some(text) = json.get("text").and_then(|v| v.as_str()) {
                            capture.push(text);
                            let _ = events_for_task
                                .send(RunnerEvent::AssistantDelta {
                                    text: text.to_string(),
                                })
                                .await;
                        }
                    }
                    Some("tool_call") => {
                        let name = json
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        let input = json.get("input").cloned().unwrap_or(serde_json::json!({}));
                        let _ = events_for_task
                            .send(RunnerEvent::ToolUse { name, input })
                            .await;
                    }
                    Some("tool_output") => {
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
                        let _ = events_for_task
                            .send(RunnerEvent::ToolResult { name, output })
                            .await;
                    }
                    Some("turn.completed") => {
                        let input_tokens = json
                            .pointer("/usage/input_tokens")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0);
                        let output_tokens = json
                            .pointer("/usage/output_tokens")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0);
                        usage = Some(Usage {
                            input_tokens,
                            output_tokens,
                            total_context_tokens: input_tokens + output_tokens,
                            context_window: None,
                        });
                    }
                    Some("error") => {
                        error = json
                            .get("message")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string())
                            .or(Some(line.to_string()));
                    }
                    Some("status") => {
                        if let Some(text) = json.get("text").and_then(|v| v.as_str()) {
                            let _ = events_for_task
                                .send(RunnerEvent::Status {
                                    text: text.to_string(),
                                })
                                .await;
                        }
                    }
                    _ => {}
                }
            }

            (capture, thread_id, usage, error)
        });

        let outcome = spawn_streaming(cmd, None, timeout, cancel.clone(), line_tx).await;

        let (capture, thread_id, usage, error) = match recv_task.await {
            Ok(v) => v,
            Err(e) => {
                return RunResult {
                    success: false,
                    text: String::new(),
                    session_id: None,
                    error: Some(RunnerError::Io(e.to_string())),
                    duration_ms: started.elapsed().as_millis() as u64,
                    is_timeout: false,
                    usage: None,
                };
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) if cancel.is_cancelled() => {
                return RunResult::cancelled(duration_ms);
            }
            Err(e) => {
                return RunResult {
                    success: false,
                    text: String::new(),
                    session_id: thread_id,
                    error: Some(e),
                    duration_ms,
                    is_timeout: false,
                    usage,
                };
            }
        };

        if outcome.is_timeout {
            return RunResult {
                success: false,
                text: capture.into_string(),
                session_id: thread_id,
                error: Some(RunnerError::Transient("subprocess timed out".to_string())),
                duration_ms,
                is_timeout: true,
                usage,
            };
        }

        if cancel.is_cancelled() {
            return RunResult::cancelled(duration_ms);
        }

        if let Some(message) = error {
            return RunResult {
                success: false,
                text: capture.into_string(),
                session_id: thread_id,
                error: Some(RunnerError::classify(&message)),
                duration_ms,
                is_timeout: false,
                usage,
            };
        }

        RunResult {
            success: true,
            text: capture.into_string(),
            session_id: thread_id,
            error: None,
            duration_ms,
            is_timeout: false,
            usage,
        }
    }
}
