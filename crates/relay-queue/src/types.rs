use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

/// A file staged for delivery into a turn's `output/` dir, or staged from the
/// shared input dir into a turn's `input/` dir before dispatch.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub path: PathBuf,
    pub filename: String,
}

/// One unit of work accepted by the queue. `respond_to` is the seam a
/// transport plugs into — this crate ships only in-memory implementations
/// (see [`crate::sink`]); a real chat/voice/etc. transport supplies its own.
#[derive(Clone)]
pub struct Task {
    pub prompt: String,
    pub session_id: Option<String>,
    pub session_user_id: String,
    pub context_id: String,
    pub mecho_mode_id: Option<String>,
    pub model: Option<String>,
    pub task_key: String,
    pub respond_to: Arc<dyn TurnSink>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub engine: String,
    pub attachments: Vec<Attachment>,
    pub mode_name: Option<String>,
    pub rotate_from_session_id: Option<String>,
}

impl Task {
    pub fn session_key(&self) -> String {
        format!(
            "user:{}:context:{}:engine:{}",
            self.session_user_id, self.context_id, self.engine
        )
    }
}

/// Common operation set a reply target implements, per the design note's
/// `ReplyTarget` tagged variant — modeled here as a trait object so a new
/// transport never needs to touch the Queue Manager.
#[async_trait]
pub trait TurnSink: Send + Sync {
    /// Send the final reply, already split into ≤1990-char chunks.
    async fn send_chunks(&self, chunks: &[String]);

    /// Attempt to edit an existing live-update message in place with `text`.
    /// Returns `true` if an edit happened (the caller should skip re-sending
    /// that text as a fresh chunk).
    async fn try_edit_first(&self, text: &str) -> bool;

    /// Best-effort "typing…" indicator.
    async fn send_typing(&self);

    /// Deliver harvested output files.
    async fn send_attachments(&self, attachments: &[Attachment]);
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_queue_size: usize,
    pub max_concurrent_runs: usize,
    pub typing_interval_secs: u64,
    pub transient_retry_delay_secs: f64,
    pub rotation_threshold: f64,
    pub live_update_flush_interval_secs: f64,
    pub live_update_heartbeat_secs: u64,
    pub max_attachment_bytes: u64,
    pub max_reply_chunk_chars: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_concurrent_runs: 4,
            typing_interval_secs: 7,
            transient_retry_delay_secs: 1.2,
            rotation_threshold: 0.8,
            live_update_flush_interval_secs: 1.5,
            live_update_heartbeat_secs: 20,
            max_attachment_bytes: 25 * 1024 * 1024,
            max_reply_chunk_chars: 1990,
        }
    }
}

impl QueueConfig {
    /// Clamp a caller-supplied rotation threshold into the spec's [0.5, 0.95]
    /// band, falling back to the default 0.8 when unset.
    pub fn with_rotation_threshold(mut self, threshold: Option<f64>) -> Self {
        if let Some(t) = threshold {
            self.rotation_threshold = t.clamp(0.5, 0.95);
        }
        self
    }
}

/// Outcome of one dispatched task, handed back to whatever enqueued it for
/// logging/testing purposes — not sent over the wire.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_key: String,
    pub success: bool,
    pub cancelled: bool,
    pub restart_requested: bool,
}

/// A point-in-time view of one running task, returned by snapshot queries.
/// `rendered` is the same header+status+events+tail text the live-update
/// coordinator would edit into place — reused here so snapshot queries and
/// live-update edits never drift out of sync.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskSnapshot {
    pub task_key: String,
    pub engine: String,
    pub model: Option<String>,
    pub elapsed_ms: u64,
    pub rendered: String,
}
