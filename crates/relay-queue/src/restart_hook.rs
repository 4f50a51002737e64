use std::path::Path;

use async_trait::async_trait;

/// Everything a restart directive needs to build a `PendingResume` record,
/// gathered at the point in the turn where the Queue Manager checks for one
/// — after the run finished and output was harvested, but before the
/// restart's own notice (if any) is appended to the reply.
pub struct RestartContext<'a> {
    pub output_dir: &'a Path,
    /// The agent's final reply text, for directive discovery step 3
    /// (whole-text JSON or the first fenced JSON block).
    pub reply_text: &'a str,
    pub session_user_id: &'a str,
    pub context_id: &'a str,
    pub engine: &'a str,
    pub session_id: Option<&'a str>,
    pub model: Option<&'a str>,
    pub mode_name: Option<&'a str>,
    pub mecho_mode_id: Option<&'a str>,
}

/// Seam the Queue Manager checks after every turn's output is harvested.
/// `relay-restart` supplies the real implementation (discovering a restart
/// directive and persisting a `PendingResume` record); this crate only
/// depends on the trait so it never needs to know about that crate's
/// file-format details.
#[async_trait]
pub trait RestartHook: Send + Sync {
    /// The directive filename to exclude from harvested output attachments.
    fn directive_filename(&self) -> &'static str;

    /// Inspect the turn for a restart directive. If found, schedule the
    /// restart and return a human-readable notice to append to the reply.
    async fn check_and_schedule(&self, ctx: RestartContext<'_>) -> Option<String>;
}

/// No-op hook used when restart handling isn't wired up (e.g. in tests).
pub struct NoRestartHook;

#[async_trait]
impl RestartHook for NoRestartHook {
    fn directive_filename(&self) -> &'static str {
        "restart-directive.json"
    }

    async fn check_and_schedule(&self, _ctx: RestartContext<'_>) -> Option<String> {
        None
    }
}
