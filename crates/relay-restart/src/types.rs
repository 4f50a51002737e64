use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parsed restart directive, harvested from either the directive file, a
/// stray JSON object in the turn's output directory, or the final reply
/// text. Every field is optional on the wire; `has_restart_signal` decides
/// whether a parsed object actually requests a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestartDirective {
    pub restart: bool,
    pub restart_required: bool,
    pub self_restart: bool,
    pub apply_and_restart: bool,
    pub reason: Option<String>,
    pub resume_prompt: Option<String>,
    pub delay_sec: Option<i64>,
}

impl RestartDirective {
    /// True if any of the boolean flags are set, or `reason`/`resumePrompt`
    /// is non-empty, or `delaySec` is positive.
    pub fn has_restart_signal(&self) -> bool {
        self.restart
            || self.restart_required
            || self.self_restart
            || self.apply_and_restart
            || self.reason.as_deref().is_some_and(|s| !s.trim().is_empty())
            || self
                .resume_prompt
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty())
            || self.delay_sec.is_some_and(|d| d > 0)
    }

    /// `delaySec` clamped into the 1-600 s window the external restart
    /// scheduler sleeps for.
    pub fn clamped_delay(&self) -> i64 {
        self.delay_sec.unwrap_or(1).clamp(1, 600)
    }
}

/// Persisted to `dataDir/restart-pending.json` when a turn's directive
/// triggers a restart. Read back on the next startup to resume the
/// conversation in the channel it left off in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResume {
    pub version: u32,
    pub id: String,
    pub requested_at: DateTime<Utc>,
    pub channel_id: String,
    pub user_id: String,
    pub context_id: String,
    pub session_user_id: String,
    pub engine: String,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub mode_name: Option<String>,
    pub mecho_mode_id: Option<String>,
    pub reason: Option<String>,
    pub resume_prompt: String,
}
