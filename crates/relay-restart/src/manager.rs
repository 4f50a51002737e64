use std::path::PathBuf;

use async_trait::async_trait;
use relay_core::ids::{new_id, now};
use relay_queue::{RestartContext, RestartHook};
use tracing::{info, warn};

use crate::directive::discover_directive;
use crate::process::schedule_restart;
use crate::store::PendingResumeStore;
use crate::types::PendingResume;

const DIRECTIVE_FILENAME: &str = ".mecho-restart.json";
const RESUME_NOTICE: &str = "The server restarted and is resuming this conversation.";

/// Real `RestartHook` implementation: discovers a directive per turn and, if
/// one requests a restart, persists a `PendingResume` and schedules the
/// external restart process.
pub struct RestartManager {
    store: PendingResumeStore,
    restart_command: String,
}

impl RestartManager {
    pub fn new(data_dir: impl Into<PathBuf>, restart_command: impl Into<String>) -> Self {
        Self {
            store: PendingResumeStore::new(data_dir),
            restart_command: restart_command.into(),
        }
    }
}

#[async_trait]
impl RestartHook for RestartManager {
    fn directive_filename(&self) -> &'static str {
        DIRECTIVE_FILENAME
    }

    async fn check_and_schedule(&self, ctx: RestartContext<'_>) -> Option<String> {
        let directive = discover_directive(ctx.output_dir, DIRECTIVE_FILENAME, ctx.reply_text).await?;

        let reason = directive.reason.clone();
        let mut resume_prompt = RESUME_NOTICE.to_string();
        if let Some(reason) = reason.as_deref() {
            resume_prompt.push(' ');
            resume_prompt.push_str(reason);
        }
        if let Some(extra) = directive.resume_prompt.as_deref() {
            resume_prompt.push('\n');
            resume_prompt.push_str(extra);
        }

        let resume = PendingResume {
            version: 1,
            id: new_id(),
            requested_at: now(),
            channel_id: ctx.context_id.to_string(),
            user_id: ctx.session_user_id.to_string(),
            context_id: ctx.context_id.to_string(),
            session_user_id: ctx.session_user_id.to_string(),
            engine: ctx.engine.to_string(),
            session_id: ctx.session_id.map(|s| s.to_string()),
            model: ctx.model.map(|s| s.to_string()),
            mode_name: ctx.mode_name.map(|s| s.to_string()),
            mecho_mode_id: ctx.mecho_mode_id.map(|s| s.to_string()),
            reason,
            resume_prompt,
        };

        if let Err(e) = self.store.save(resume.clone()).await {
            warn!(error = %e, "failed to persist pending resume, not scheduling restart");
            return None;
        }

        let delay = directive.clamped_delay();
        info!(delay_sec = delay, id = %resume.id, "scheduling external restart");
        schedule_restart(delay, &self.restart_command);

        Some(format!(
            "Restarting in {delay}s to apply an update; I'll resume this conversation automatically."
        ))
    }
}

/// Seam the orchestrator supplies so the startup resume scan can notify the
/// originating channel and re-enqueue the resume prompt without this crate
/// depending on `relay-queue` transports directly.
#[async_trait]
pub trait ResumeEnqueuer: Send + Sync {
    /// Best-effort "server restarted" notice to the channel. Returns `false`
    /// if the channel couldn't be resolved.
    async fn send_restarted_notice(&self, channel_id: &str) -> bool;

    /// Enqueue `restart-resume:{id}` re-injecting the resume prompt with the
    /// persisted session/model/engine/mode. Returns `true` on success.
    async fn enqueue_resume(&self, task_key: String, resume: &PendingResume) -> bool;
}

/// Run once at startup: discard a stale pending resume (older than
/// `max_pending_minutes`), otherwise notify the channel and re-enqueue,
/// deleting the pending file only once the enqueue succeeds.
pub async fn resume_on_startup(
    data_dir: impl Into<PathBuf>,
    max_pending_minutes: i64,
    enqueuer: &dyn ResumeEnqueuer,
) {
    let store = PendingResumeStore::new(data_dir);
    let pending = match store.load().await {
        Ok(Some(p)) => p,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "failed to read pending resume");
            return;
        }
    };

    let age = now().signed_duration_since(pending.requested_at);
    if age.num_minutes() > max_pending_minutes {
        info!(id = %pending.id, age_minutes = age.num_minutes(), "discarding stale pending resume");
        let _ = store.delete().await;
        return;
    }

    enqueuer.send_restarted_notice(&pending.channel_id).await;

    let task_key = format!("restart-resume:{}", pending.id);
    if enqueuer.enqueue_resume(task_key, &pending).await {
        let _ = store.delete().await;
    } else {
        warn!(id = %pending.id, "failed to enqueue resume, leaving pending file for next startup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct StubEnqueuer {
        notice_sent: AtomicBool,
        enqueue_ok: bool,
        last_task_key: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ResumeEnqueuer for StubEnqueuer {
        async fn send_restarted_notice(&self, _channel_id: &str) -> bool {
            self.notice_sent.store(true, Ordering::SeqCst);
            true
        }

        async fn enqueue_resume(&self, task_key: String, _resume: &PendingResume) -> bool {
            *self.last_task_key.lock().unwrap() = Some(task_key);
            self.enqueue_ok
        }
    }

    fn sample(age_minutes: i64) -> PendingResume {
        PendingResume {
            version: 1,
            id: "r1".into(),
            requested_at: now() - chrono::Duration::minutes(age_minutes),
            channel_id: "chan".into(),
            user_id: "user".into(),
            context_id: "ctx".into(),
            session_user_id: "user".into(),
            engine: "primary".into(),
            session_id: None,
            model: None,
            mode_name: None,
            mecho_mode_id: None,
            reason: None,
            resume_prompt: "continuing".into(),
        }
    }

    #[tokio::test]
    async fn successful_resume_deletes_pending_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingResumeStore::new(dir.path());
        store.save(sample(1)).await.unwrap();

        let enqueuer = StubEnqueuer {
            notice_sent: AtomicBool::new(false),
            enqueue_ok: true,
            last_task_key: Mutex::new(None),
        };
        resume_on_startup(dir.path(), 30, &enqueuer).await;

        assert!(enqueuer.notice_sent.load(Ordering::SeqCst));
        assert_eq!(
            *enqueuer.last_task_key.lock().unwrap(),
            Some("restart-resume:r1".to_string())
        );
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_enqueue_keeps_pending_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingResumeStore::new(dir.path());
        store.save(sample(1)).await.unwrap();

        let enqueuer = StubEnqueuer {
            notice_sent: AtomicBool::new(false),
            enqueue_ok: false,
            last_task_key: Mutex::new(None),
        };
        resume_on_startup(dir.path(), 30, &enqueuer).await;

        assert!(store.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_pending_resume_is_discarded_without_enqueue() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingResumeStore::new(dir.path());
        store.save(sample(120)).await.unwrap();

        let enqueuer = StubEnqueuer {
            notice_sent: AtomicBool::new(false),
            enqueue_ok: true,
            last_task_key: Mutex::new(None),
        };
        resume_on_startup(dir.path(), 30, &enqueuer).await;

        assert!(!enqueuer.notice_sent.load(Ordering::SeqCst));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_pending_file_is_a_silent_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let enqueuer = StubEnqueuer {
            notice_sent: AtomicBool::new(false),
            enqueue_ok: true,
            last_task_key: Mutex::new(None),
        };
        resume_on_startup(dir.path(), 30, &enqueuer).await;
        assert!(!enqueuer.notice_sent.load(Ordering::SeqCst));
    }
}
