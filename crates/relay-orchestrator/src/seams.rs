use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use relay_heartbeat::{ChannelResolver, HeartbeatEnqueuer, QueueBusyProbe};
use relay_queue::{ConsoleTurnSink, QueueError, QueueManager, Task, TurnSink};
use relay_restart::{PendingResume, ResumeEnqueuer};
use relay_scheduler::ScheduleEnqueuer;

/// Binds the scheduler, heartbeat, and restart-resume enqueue seams to a
/// real `QueueManager`, so none of those crates need to depend on
/// `relay-queue` directly. Every turn built here goes out through a fresh
/// [`ConsoleTurnSink`] — the real chat transport this binary would drive in
/// production plugs into the same `Task::respond_to` slot instead.
pub struct QueueSeams {
    queue: Arc<QueueManager>,
    default_engine: String,
}

impl QueueSeams {
    pub fn new(queue: Arc<QueueManager>, default_engine: String) -> Self {
        Self { queue, default_engine }
    }

    fn build_task(
        &self,
        task_key: String,
        session_user_id: String,
        context_id: String,
        mecho_mode_id: Option<String>,
        model: Option<String>,
        engine: String,
        prompt: String,
        session_id: Option<String>,
        mode_name: Option<String>,
        respond_to: Arc<dyn TurnSink>,
    ) -> Task {
        Task {
            prompt,
            session_id,
            session_user_id,
            context_id,
            mecho_mode_id,
            model,
            task_key,
            respond_to,
            created_at: relay_core::ids::now(),
            engine,
            attachments: Vec::new(),
            mode_name,
            rotate_from_session_id: None,
        }
    }

    async fn enqueue_accepting_duplicates(&self, task: Task) -> bool {
        match self.queue.enqueue(task).await {
            Ok(_) => true,
            Err(QueueError::Duplicate(_)) => true,
            Err(e) => {
                warn!(error = %e, "enqueue rejected");
                false
            }
        }
    }
}

#[async_trait]
impl ScheduleEnqueuer for QueueSeams {
    async fn enqueue_scheduled(
        &self,
        task_key: String,
        session_user_id: String,
        channel: String,
        mode_id: Option<String>,
        prompt: String,
    ) -> bool {
        let task = self.build_task(
            task_key,
            session_user_id,
            channel,
            mode_id,
            None,
            self.default_engine.clone(),
            prompt,
            None,
            None,
            Arc::new(ConsoleTurnSink),
        );
        self.enqueue_accepting_duplicates(task).await
    }
}

#[async_trait]
impl HeartbeatEnqueuer for QueueSeams {
    async fn enqueue_heartbeat(&self, task_key: String, channel: String, prompt: String) -> bool {
        let task = self.build_task(
            task_key,
            format!("heartbeat:{channel}"),
            channel,
            None,
            None,
            self.default_engine.clone(),
            prompt,
            None,
            None,
            Arc::new(ConsoleTurnSink),
        );
        self.enqueue_accepting_duplicates(task).await
    }
}

#[async_trait]
impl QueueBusyProbe for QueueSeams {
    async fn is_busy(&self) -> bool {
        !self.queue.running_task_keys().is_empty()
    }
}

#[async_trait]
impl ResumeEnqueuer for QueueSeams {
    async fn send_restarted_notice(&self, channel_id: &str) -> bool {
        println!("[{channel_id}] the server restarted and is resuming this conversation.");
        true
    }

    async fn enqueue_resume(&self, task_key: String, resume: &PendingResume) -> bool {
        let task = self.build_task(
            task_key,
            resume.session_user_id.clone(),
            resume.context_id.clone(),
            resume.mecho_mode_id.clone(),
            resume.model.clone(),
            resume.engine.clone(),
            resume.resume_prompt.clone(),
            resume.session_id.clone(),
            resume.mode_name.clone(),
            Arc::new(ConsoleTurnSink),
        );
        self.enqueue_accepting_duplicates(task).await
    }
}

/// Resolves every channel as present. The real transport (out of scope
/// here) would check membership/visibility against its own API instead.
pub struct AlwaysResolvable;

#[async_trait]
impl ChannelResolver for AlwaysResolvable {
    async fn resolve(&self, _channel: &str) -> bool {
        true
    }
}
