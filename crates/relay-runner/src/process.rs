use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cancel::CancelHandle;
use crate::error::RunnerError;

/// Ring buffer cap for the *aggregated* capture text (not the live line
/// stream, which is never truncated — only what's kept for final-text
/// reconstruction).
pub const MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;

const KILL_ESCALATION_DELAY: Duration = Duration::from_millis(300);

pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub is_timeout: bool,
    pub is_cancelled: bool,
}

/// Spawn `cmd` detached into its own process group, stream stdout
/// line-by-line to `line_tx`, and race the child's exit against `timeout`.
///
/// The child is killed outright if `timeout` elapses; an externally-issued
/// `cancel.cancel()` kills it the same way and is detected here via
/// `cancel.is_cancelled()` once `wait()` returns.
pub async fn spawn_streaming(
    mut cmd: Command,
    stdin_data: Option<String>,
    timeout: Duration,
    cancel: CancelHandle,
    line_tx: mpsc::Sender<String>,
) -> Result<ProcessOutcome, RunnerError> {
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    if stdin_data.is_some() {
        cmd.stdin(std::process::Stdio::piped());
    }

    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|e| RunnerError::Spawn(e.to_string()))?;
    let pid = child.id();
    if let Some(pid) = pid {
        cancel.publish(pid);
    }

    if let Some(data) = stdin_data {
        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.write_all(data.as_bytes()).await;
            drop(stdin);
        }
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = stdout.map(|s| {
        let tx = line_tx.clone();
        tokio::spawn(async move { drain_lines(s, tx).await })
    });
    let stderr_task = stderr.map(|s| {
        let tx = line_tx.clone();
        tokio::spawn(async move { drain_lines(s, tx).await })
    });
    drop(line_tx);

    let outcome = tokio::select! {
        status = child.wait() => {
            let exit_code = status.ok().and_then(|s| s.code());
            ProcessOutcome {
                exit_code,
                is_timeout: false,
                is_cancelled: cancel.is_cancelled(),
            }
        }
        _ = tokio::time::sleep(timeout) => {
            warn!(?pid, "subprocess exceeded timeout, killing process group");
            if let Some(pid) = pid {
                kill_process_group(pid).await;
            }
            let _ = child.wait().await;
            ProcessOutcome { exit_code: None, is_timeout: true, is_cancelled: false }
        }
    };

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    Ok(outcome)
}

async fn drain_lines<R: tokio::io::AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "error reading subprocess output");
                break;
            }
        }
    }
}

/// Send SIGTERM to the whole process group, then escalate to SIGKILL after
/// a short grace period if it's still alive.
#[cfg(unix)]
pub async fn kill_process_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGTERM);
    }
    tokio::time::sleep(KILL_ESCALATION_DELAY).await;
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub async fn kill_process_group(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output();
}

/// Accumulate captured text, keeping only the most recent `MAX_CAPTURE_BYTES`
/// (ring-truncating the oldest data) so a very chatty agent can't exhaust
/// memory before the run completes.
#[derive(Clone)]
pub struct CaptureBuffer {
    buf: String,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self { buf: String::new() }
    }

    pub fn push(&mut self, text: &str) {
        self.buf.push_str(text);
        if self.buf.len() > MAX_CAPTURE_BYTES {
            let excess = self.buf.len() - MAX_CAPTURE_BYTES;
            let mut cut = excess;
            while !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new()
    }
}
