use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use relay_runner::{CancelHandle, RunRequest, RunResult, Runner, RunnerError, RunnerEvent};
use relay_sessions::{RotationSummary, SessionKey, SessionStore};

use crate::error::QueueError;
use crate::live_update::LiveUpdate;
use crate::memory_client::MemoryClient;
use crate::restart_hook::RestartHook;
use crate::types::{QueueConfig, Task, TaskSnapshot};
use crate::workspace::{split_reply_chunks, stage_input_files, TurnWorkspace};

/// Transient-API text patterns the retry ladder matches against, outside of
/// whatever [`RunnerError::classify`] already recognizes — kept loose and
/// lowercase-substring, same rationale as the runner's own classifier.
const TRANSIENT_PATTERNS: &[&str] = &["overloaded", "rate limit", "temporarily unavailable", "529", "502", "503"];
const SESSION_RESUME_FAILURE_PATTERNS: &[&str] = &["session not found", "no conversation found", "resume"];

struct RunningState {
    cancel_requested: AtomicBool,
    cancel_handle: CancelHandle,
    live_update: Arc<LiveUpdate>,
    started_at: Instant,
    engine: String,
    model: Option<String>,
}

struct QueueState {
    pending: VecDeque<Task>,
    turn_counter: u64,
    restart_shutdown_requested: bool,
}

/// Owns the pending FIFO, the running map, and the dispatch loop described
/// in the queue manager design: a single `tokio::sync::Mutex` guards the
/// deque/counters (short critical sections, no `.await` that spawns a run
/// held across the lock), while each in-flight task lives in a `DashMap`
/// keyed by `task_key` so cancellation and snapshot reads never block on the
/// dispatch path.
pub struct QueueManager {
    config: QueueConfig,
    data_dir: std::path::PathBuf,
    runners: HashMap<String, Arc<dyn Runner>>,
    sessions: Arc<SessionStore>,
    memory_client: Option<Arc<MemoryClient>>,
    restart_hook: Arc<dyn RestartHook>,
    state: Mutex<QueueState>,
    running: DashMap<String, Arc<RunningState>>,
}

impl QueueManager {
    pub fn new(
        config: QueueConfig,
        data_dir: std::path::PathBuf,
        runners: HashMap<String, Arc<dyn Runner>>,
        sessions: Arc<SessionStore>,
        memory_client: Option<Arc<MemoryClient>>,
        restart_hook: Arc<dyn RestartHook>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            data_dir,
            runners,
            sessions,
            memory_client,
            restart_hook,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                turn_counter: 0,
                restart_shutdown_requested: false,
            }),
            running: DashMap::new(),
        })
    }

    /// Enqueue `task`. Rejects a duplicate `task_key` that's already running
    /// or pending, and rejects once `|pending| + |running| >= max_queue_size`.
    /// Returns the 1-based position in the combined running+pending order.
    pub async fn enqueue(self: &Arc<Self>, task: Task) -> Result<usize, QueueError> {
        let mut state = self.state.lock().await;

        if self.running.contains_key(&task.task_key)
            || state.pending.iter().any(|t| t.task_key == task.task_key)
        {
            return Err(QueueError::Duplicate(task.task_key));
        }

        let running_len = self.running.len();
        if running_len + state.pending.len() >= self.config.max_queue_size {
            return Err(QueueError::QueueFull {
                pending: state.pending.len(),
                running: running_len,
                max: self.config.max_queue_size,
            });
        }

        state.turn_counter += 1;
        let position = running_len + state.pending.len() + 1;
        state.pending.push_back(task);
        drop(state);

        self.dispatch_more();
        Ok(position)
    }

    /// Pop and run pending tasks until `max_concurrent_runs` is saturated.
    /// Each dispatched task runs in its own `tokio::spawn`, re-invoking this
    /// on completion rather than looping on a single always-running task.
    pub fn dispatch_more(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let task = {
                    let mut state = this.state.lock().await;
                    if this.running.len() >= this.config.max_concurrent_runs {
                        return;
                    }
                    match state.pending.pop_front() {
                        Some(t) => t,
                        None => return,
                    }
                };

                let task_key = task.task_key.clone();
                let live_update = Arc::new(LiveUpdate::new(
                    Arc::clone(&task.respond_to),
                    task.engine.clone(),
                    task.model.clone(),
                    Duration::from_secs_f64(this.config.live_update_flush_interval_secs),
                    true,
                ));
                let running_state = Arc::new(RunningState {
                    cancel_requested: AtomicBool::new(false),
                    cancel_handle: CancelHandle::new(),
                    live_update: Arc::clone(&live_update),
                    started_at: Instant::now(),
                    engine: task.engine.clone(),
                    model: task.model.clone(),
                });
                this.running.insert(task_key.clone(), running_state);

                let worker = Arc::clone(&this);
                tokio::spawn(async move {
                    worker.execute(task, live_update).await;
                    worker.running.remove(&task_key);
                    worker.dispatch_more();
                    worker.maybe_self_terminate().await;
                });
            }
        });
    }

    /// Request cancellation of `task_key`. If running, marks the
    /// cancel-requested flag and invokes the published cancel handle
    /// (internally retried up to 20×50 ms if not yet published). If only
    /// pending, removes every matching entry.
    pub async fn cancel(self: &Arc<Self>, task_key: &str) -> bool {
        if let Some(entry) = self.running.get(task_key) {
            entry.cancel_requested.store(true, Ordering::SeqCst);
            let handle = entry.cancel_handle.clone();
            drop(entry);
            handle.cancel().await;
            return true;
        }

        let mut state = self.state.lock().await;
        let before = state.pending.len();
        state.pending.retain(|t| t.task_key != task_key);
        let removed = before != state.pending.len();
        removed
    }

    pub async fn task_snapshot(&self, task_key: &str) -> Option<TaskSnapshot> {
        let (engine, model, elapsed_ms, live_update) = {
            let entry = self.running.get(task_key)?;
            (
                entry.engine.clone(),
                entry.model.clone(),
                entry.started_at.elapsed().as_millis() as u64,
                Arc::clone(&entry.live_update),
            )
        };
        Some(TaskSnapshot {
            task_key: task_key.to_string(),
            engine,
            model,
            elapsed_ms,
            rendered: live_update.rendered_text().await,
        })
    }

    pub async fn live_snapshot(&self, task_key: &str) -> Option<String> {
        let live_update = Arc::clone(&self.running.get(task_key)?.live_update);
        Some(live_update.rendered_text().await)
    }

    pub async fn set_verbose(&self, task_key: &str, verbose: bool) {
        if let Some(entry) = self.running.get(task_key) {
            entry.live_update.set_verbose(verbose).await;
        }
    }

    pub async fn pending_task_keys(&self, limit: usize) -> Vec<String> {
        let state = self.state.lock().await;
        state.pending.iter().take(limit).map(|t| t.task_key.clone()).collect()
    }

    pub fn running_task_keys(&self) -> Vec<String> {
        self.running.iter().map(|e| e.key().clone()).collect()
    }

    /// The most-recently-started running task, or `None` if nothing is
    /// in flight. With several tasks concurrently running there's no single
    /// canonical "current" one; most-recently-started is the closest
    /// approximation of "what a status probe run right now would care
    /// about".
    pub async fn current_task_snapshot(&self) -> Option<TaskSnapshot> {
        let newest = self
            .running
            .iter()
            .max_by_key(|e| e.value().started_at)
            .map(|e| e.key().clone())?;
        self.task_snapshot(&newest).await
    }

    async fn maybe_self_terminate(self: &Arc<Self>) {
        let state = self.state.lock().await;
        if state.restart_shutdown_requested && state.pending.is_empty() && self.running.is_empty() {
            info!("restart requested and queue drained, signalling shutdown");
            // The orchestrator binary observes this via `is_restart_shutdown_requested`.
        }
    }

    pub async fn is_restart_shutdown_requested(&self) -> bool {
        self.state.lock().await.restart_shutdown_requested
    }

    async fn execute(self: &Arc<Self>, task: Task, live_update: Arc<LiveUpdate>) {
        let is_heartbeat = task.task_key.starts_with("heartbeat:");

        let workspace = match TurnWorkspace::allocate(&self.data_dir, &task.task_key).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(task_key = %task.task_key, error = %e, "failed to allocate turn workspace");
                task.respond_to
                    .send_chunks(&[format!("Failed to start turn: {e}")])
                    .await;
                return;
            }
        };

        task.respond_to.send_typing().await;
        let typing = spawn_typing_heartbeat(Arc::clone(&task.respond_to), self.config.typing_interval_secs);
        let live_update_heartbeat = spawn_live_update_heartbeat(
            Arc::clone(&live_update),
            self.config.live_update_heartbeat_secs,
        );

        let staged_paths: Vec<_> = task.attachments.iter().map(|a| a.path.clone()).collect();
        let attachments = stage_input_files(
            &self.data_dir.join("shared-input"),
            &workspace.input_dir,
            &staged_paths,
            self.config.max_attachment_bytes,
        )
        .await;

        let session_key = SessionKey::new(
            task.session_user_id.as_str(),
            task.context_id.as_str(),
            task.engine.as_str(),
        );

        let rotation_context = if task.session_id.is_none() {
            self.sessions.consume_summary(&session_key).ok().flatten()
        } else {
            None
        };

        let prompt = compose_prompt(&task, rotation_context.as_ref(), &attachments);
        let system_prompt = compose_system_prompt(&task, &workspace, self.restart_hook.directive_filename());

        let env_overrides = self.build_env_overrides(&task);

        let outcome = self
            .run_with_retry_ladder(&task, &session_key, prompt, system_prompt, env_overrides, is_heartbeat, Some(Arc::clone(&live_update)))
            .await;

        typing.abort();
        live_update_heartbeat.abort();

        self.persist_session_result(&task, &session_key, &outcome).await;

        let mut reply_text = outcome.text.clone();

        if let Some(usage) = &outcome.usage {
            if !is_heartbeat {
                if let Some(notice) = self
                    .maybe_rotate(&task, &session_key, usage, outcome.session_id.as_deref())
                    .await
                {
                    reply_text.push_str("\n\n");
                    reply_text.push_str(&notice);
                }
            }
        }

        let harvested = workspace
            .harvest_output(self.restart_hook.directive_filename(), self.config.max_attachment_bytes)
            .await;

        let restart_ctx = crate::restart_hook::RestartContext {
            output_dir: &workspace.output_dir,
            reply_text: &reply_text,
            session_user_id: &task.session_user_id,
            context_id: &task.context_id,
            engine: &task.engine,
            session_id: outcome.session_id.as_deref(),
            model: task.model.as_deref(),
            mode_name: task.mode_name.as_deref(),
            mecho_mode_id: task.mecho_mode_id.as_deref(),
        };
        if let Some(notice) = self.restart_hook.check_and_schedule(restart_ctx).await {
            reply_text.push_str("\n\n");
            reply_text.push_str(&notice);
            self.state.lock().await.restart_shutdown_requested = true;
        }

        let chunks = split_reply_chunks(&reply_text, self.config.max_reply_chunk_chars);
        let mut chunks_to_send = chunks.as_slice();
        if !chunks.is_empty() {
            if task.respond_to.try_edit_first(&chunks[0]).await {
                chunks_to_send = &chunks[1..];
            }
        }
        if !chunks_to_send.is_empty() {
            task.respond_to.send_chunks(chunks_to_send).await;
        }
        if !harvested.is_empty() {
            task.respond_to.send_attachments(&harvested).await;
        }

        workspace.cleanup().await;
    }

    fn build_env_overrides(&self, task: &Task) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let (Some(base), Some(mode_id)) = (self.memory_client_base(), &task.mecho_mode_id) {
            overrides.insert("MECHO_API_URL".to_string(), base);
            overrides.insert("MECHO_MODE_ID".to_string(), mode_id.clone());
        }
        overrides
    }

    fn memory_client_base(&self) -> Option<String> {
        self.memory_client.as_ref().map(|c| c.base_url().to_string())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_with_retry_ladder(
        self: &Arc<Self>,
        task: &Task,
        session_key: &SessionKey,
        prompt: String,
        system_prompt: String,
        env_overrides: HashMap<String, String>,
        is_heartbeat: bool,
        live_update: Option<Arc<LiveUpdate>>,
    ) -> RunResult {
        let Some(runner) = self.runners.get(&task.engine).cloned() else {
            return RunResult {
                success: false,
                text: format!("no runner registered for engine '{}'", task.engine),
                session_id: None,
                error: Some(RunnerError::Spawn("unknown engine".to_string())),
                duration_ms: 0,
                is_timeout: false,
                usage: None,
            };
        };

        let mode_id = task.mecho_mode_id.clone();

        let mut req = RunRequest {
            prompt,
            system_prompt: Some(system_prompt),
            session_id: task.session_id.clone(),
            model: task.model.clone(),
            max_turns: None,
            env_overrides,
            workdir: None,
            timeout_secs: None,
        };

        let prepared = self.prepare_memory(task, session_key, &mode_id, req.session_id.is_none()).await;
        if let Some(xml) = &prepared {
            if !xml.xml.is_empty() {
                req.prompt = format!("{}\n\n{}", xml.xml, req.prompt);
            }
        }

        let mut result = self
            .run_once(&runner, req.clone(), task, is_heartbeat, live_update.clone())
            .await;

        if self.is_cancelled(&task.task_key) {
            self.ack_memory(task, session_key, &mode_id, prepared.as_ref(), false).await;
            return RunResult::cancelled(result.duration_ms);
        }

        // Ladder step (b): timeout → rerun once with model unset.
        if result.is_timeout && !self.is_cancelled(&task.task_key) {
            let mut retry_req = req.clone();
            retry_req.model = None;
            result = self.run_once(&runner, retry_req, task, is_heartbeat, live_update.clone()).await;
        }
        // Ladder step (c): transient-API pattern → sleep 1.2s, rerun once.
        else if matches_transient(&result) && !self.is_cancelled(&task.task_key) {
            tokio::time::sleep(Duration::from_secs_f64(self.config.transient_retry_delay_secs)).await;
            if !self.is_cancelled(&task.task_key) {
                result = self.run_once(&runner, req.clone(), task, is_heartbeat, live_update.clone()).await;
            }
        }
        // Ladder step (d): session-resume failure → forget session, rerun once.
        else if runner.supports_session_resume()
            && req.session_id.is_some()
            && matches_session_resume_failure(&result)
            && !self.is_cancelled(&task.task_key)
        {
            let _ = self.sessions.delete_session(&task.session_user_id, &task.context_id, Some(task.engine.as_str()));
            let mut retry_req = req.clone();
            retry_req.session_id = None;
            result = self.run_once(&runner, retry_req, task, is_heartbeat, live_update).await;
        }

        self.ack_memory(task, session_key, &mode_id, prepared.as_ref(), result.success).await;
        result
    }

    async fn run_once(
        self: &Arc<Self>,
        runner: &Arc<dyn Runner>,
        req: RunRequest,
        task: &Task,
        is_heartbeat: bool,
        live_update: Option<Arc<LiveUpdate>>,
    ) -> RunResult {
        let cancel_handle = self
            .running
            .get(&task.task_key)
            .map(|e| e.cancel_handle.clone())
            .unwrap_or_default();

        let (tx, mut rx) = mpsc::channel::<RunnerEvent>(256);
        let mut block_tracker = BlockTracker::new();

        let forward_task = tokio::spawn(async move {
            let mut blocks = Vec::new();
            while let Some(event) = rx.recv().await {
                if let Some(lu) = &live_update {
                    match &event {
                        RunnerEvent::AssistantDelta { text } => lu.push_assistant_delta(text).await,
                        RunnerEvent::ToolUse { name, .. } => lu.push_event(format!("tool_use: {name}")).await,
                        RunnerEvent::ToolResult { name, .. } => lu.push_event(format!("tool_result: {name}")).await,
                        RunnerEvent::Status { text } => lu.push_status(text.clone()).await,
                    }
                }
                block_tracker.observe(&event);
            }
            blocks.push(block_tracker.longest_block());
            blocks
        });

        let result = runner.run(req, cancel_handle, tx).await;
        let blocks = forward_task.await.unwrap_or_default();

        if is_heartbeat {
            if let Some(longest) = blocks.into_iter().flatten().next() {
                if longest.len() > result.text.len() {
                    let mut patched = result;
                    patched.text = longest;
                    return patched;
                }
            }
        }

        result
    }

    fn is_cancelled(&self, task_key: &str) -> bool {
        self.running
            .get(task_key)
            .map(|e| e.cancel_requested.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn prepare_memory(
        &self,
        task: &Task,
        session_key: &SessionKey,
        mode_id: &Option<String>,
        force_full: bool,
    ) -> Option<crate::memory_client::PrepareResponse> {
        let client = self.memory_client.as_ref()?;
        let mode_id = mode_id.as_ref()?;
        client
            .prepare(
                mode_id,
                &session_key.format(),
                &task.engine,
                force_full || task.session_id.is_none(),
            )
            .await
    }

    async fn ack_memory(
        &self,
        task: &Task,
        session_key: &SessionKey,
        mode_id: &Option<String>,
        prepared: Option<&crate::memory_client::PrepareResponse>,
        success: bool,
    ) {
        let (Some(client), Some(mode_id), Some(prepared)) = (self.memory_client.as_ref(), mode_id, prepared) else {
            return;
        };
        let _ = task;
        client
            .ack(mode_id, &prepared.prepare_id, &session_key.format(), success)
            .await;
    }

    async fn persist_session_result(&self, task: &Task, session_key: &SessionKey, result: &RunResult) {
        if let Some(session_id) = &result.session_id {
            if let Err(e) = self.sessions.save_session(session_key, session_id) {
                warn!(error = %e, "failed to save session after turn");
            }
        } else if result.success && task.session_id.is_some() {
            if let Err(e) = self.sessions.touch_session(session_key) {
                warn!(error = %e, "failed to touch session after turn");
            }
        }

        if let Some(usage) = &result.usage {
            let _ = self.sessions.update_session_tokens(
                session_key,
                usage.total_context_tokens,
                usage.context_window,
            );
        }
    }

    /// Rotation check: if `total_context_tokens / context_window` crosses
    /// the configured threshold, summarize and rotate the session. Skips
    /// heartbeat tasks (decided: heartbeats never drive rotation).
    async fn maybe_rotate(
        self: &Arc<Self>,
        task: &Task,
        session_key: &SessionKey,
        usage: &relay_runner::Usage,
        session_id: Option<&str>,
    ) -> Option<String> {
        let context_window = usage.context_window?;
        if context_window == 0 {
            return None;
        }
        let ratio = usage.total_context_tokens as f64 / context_window as f64;
        if ratio < self.config.rotation_threshold {
            return None;
        }

        let runner = self.runners.get(&task.engine)?.clone();
        let summarize_req = RunRequest {
            prompt: "Summarize this conversation so it can be resumed later. Be concise but complete.".to_string(),
            system_prompt: None,
            session_id: session_id.map(|s| s.to_string()),
            model: task.model.clone(),
            max_turns: Some(1),
            env_overrides: HashMap::new(),
            workdir: None,
            timeout_secs: Some(120),
        };

        let (tx, mut rx) = mpsc::channel::<RunnerEvent>(16);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let summary_result = runner.run(summarize_req, CancelHandle::new(), tx).await;
        if !summary_result.success || summary_result.text.is_empty() {
            return None;
        }

        let summary = RotationSummary {
            summary_text: summary_result.text,
            source_session_id: session_id.unwrap_or_default().to_string(),
            context_tokens_at_rotation: usage.total_context_tokens,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.sessions.save_summary(session_key, &summary) {
            warn!(error = %e, "failed to save rotation summary");
            return None;
        }
        let _ = self.sessions.delete_session(&task.session_user_id, &task.context_id, Some(task.engine.as_str()));

        Some("_(session rotated: context window was getting full, a summary was saved and will carry forward next turn)_".to_string())
    }
}

fn matches_transient(result: &RunResult) -> bool {
    if result.error.as_ref().map(RunnerError::is_retryable_transient).unwrap_or(false) {
        return true;
    }
    let haystack = result.text.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| haystack.contains(p))
}

fn matches_session_resume_failure(result: &RunResult) -> bool {
    if matches!(result.error, Some(RunnerError::SessionResumeFailed(_))) {
        return true;
    }
    let haystack = result.text.to_lowercase();
    SESSION_RESUME_FAILURE_PATTERNS.iter().any(|p| haystack.contains(p))
}

fn compose_prompt(task: &Task, rotation: Option<&RotationSummary>, attachments: &[crate::types::Attachment]) -> String {
    let mut out = String::new();
    if let Some(summary) = rotation {
        out.push_str("[Continuing from a prior session summary]\n");
        out.push_str(&summary.summary_text);
        out.push_str("\n\n---\n\n");
    }
    out.push_str(&task.prompt);
    if !attachments.is_empty() {
        out.push_str("\n\n[Input Attachments]\n");
        for a in attachments {
            out.push_str("- ");
            out.push_str(&a.filename);
            out.push('\n');
        }
    }
    out
}

fn compose_system_prompt(task: &Task, workspace: &TurnWorkspace, restart_filename: &str) -> String {
    let mut out = String::new();
    if let Some(mode_name) = &task.mode_name {
        out.push_str(mode_name);
        out.push_str("\n\n");
    }
    out.push_str(&format!(
        "[Attachment Bridge Rules]\nRead input files from: {}\nWrite output files to: {}\nTo request a restart, write a JSON directive file named '{}' into the output directory.",
        workspace.input_dir.display(),
        workspace.output_dir.display(),
        restart_filename,
    ));
    out
}

fn spawn_typing_heartbeat(sink: Arc<dyn crate::types::TurnSink>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            sink.send_typing().await;
        }
    })
}

fn spawn_live_update_heartbeat(live_update: Arc<LiveUpdate>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            live_update.heartbeat().await;
        }
    })
}

/// Tracks assistant text in distinct "blocks" separated by tool-event
/// boundaries, so a heartbeat task whose final `result.text` got clipped by
/// internal rotation can recover the longest captured block instead.
struct BlockTracker {
    blocks: Vec<String>,
    current: String,
}

impl BlockTracker {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            current: String::new(),
        }
    }

    fn observe(&mut self, event: &RunnerEvent) {
        match event {
            RunnerEvent::AssistantDelta { text } => self.current.push_str(text),
            RunnerEvent::ToolUse { .. } | RunnerEvent::ToolResult { .. } => {
                if !self.current.is_empty() {
                    self.blocks.push(std::mem::take(&mut self.current));
                }
            }
            RunnerEvent::Status { .. } => {}
        }
    }

    fn longest_block(mut self) -> Option<String> {
        if !self.current.is_empty() {
            self.blocks.push(self.current);
        }
        self.blocks.into_iter().max_by_key(|b| b.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::restart_hook::NoRestartHook;
    use crate::sink::{ChannelTurnSink, SinkMessage};
    use crate::types::{Attachment as TaskAttachment, Task};

    use super::*;

    /// Runner stub that emits a couple of streamed events and a canned
    /// result, optionally after a tiny artificial delay so cancellation
    /// has a window to land mid-run.
    struct StubRunner {
        reply_text: String,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StubRunner {
        fn new(reply_text: impl Into<String>) -> Self {
            Self {
                reply_text: reply_text.into(),
                delay: Duration::from_millis(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Runner for StubRunner {
        fn engine_name(&self) -> &'static str {
            "primary"
        }
        fn supports_max_turns_retry(&self) -> bool {
            false
        }
        fn supports_session_resume(&self) -> bool {
            true
        }
        async fn run(&self, _req: RunRequest, _cancel: CancelHandle, events: mpsc::Sender<RunnerEvent>) -> RunResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = events
                .send(RunnerEvent::AssistantDelta {
                    text: self.reply_text.clone(),
                })
                .await;
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            RunResult {
                success: true,
                text: self.reply_text.clone(),
                session_id: Some("sess-1".to_string()),
                error: None,
                duration_ms: 0,
                is_timeout: false,
                usage: None,
            }
        }
    }

    fn test_session_store() -> Arc<SessionStore> {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        relay_sessions::db::init_db(&conn).unwrap();
        Arc::new(SessionStore::new(conn))
    }

    fn test_manager(data_dir: std::path::PathBuf, runner: Arc<dyn Runner>, max_concurrent: usize) -> Arc<QueueManager> {
        let mut runners: HashMap<String, Arc<dyn Runner>> = HashMap::new();
        runners.insert("primary".to_string(), runner);
        let config = QueueConfig {
            max_concurrent_runs: max_concurrent,
            ..QueueConfig::default()
        };
        QueueManager::new(config, data_dir, runners, test_session_store(), None, Arc::new(NoRestartHook))
    }

    fn test_task(task_key: &str, respond_to: Arc<dyn crate::types::TurnSink>) -> Task {
        Task {
            prompt: "hello".to_string(),
            session_id: None,
            session_user_id: "user-1".to_string(),
            context_id: "ctx-1".to_string(),
            mecho_mode_id: None,
            model: None,
            task_key: task_key.to_string(),
            respond_to,
            created_at: chrono::Utc::now(),
            engine: "primary".to_string(),
            attachments: Vec::<TaskAttachment>::new(),
            mode_name: None,
            rotate_from_session_id: None,
        }
    }

    #[tokio::test]
    async fn enqueue_dispatches_and_delivers_reply() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = test_manager(tmp.path().to_path_buf(), Arc::new(StubRunner::new("hi there")), 2);
        let (sink, mut rx) = ChannelTurnSink::new();
        let task = test_task("task-1", Arc::new(sink));

        manager.enqueue(task).await.unwrap();

        let mut saw_reply = false;
        for _ in 0..50 {
            match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Some(SinkMessage::Chunks(chunks))) => {
                    assert!(chunks.iter().any(|c| c.contains("hi there")));
                    saw_reply = true;
                    break;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_reply, "expected a final chunks reply");
    }

    #[tokio::test]
    async fn duplicate_task_key_is_rejected_while_running() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(StubRunner {
            reply_text: "slow".to_string(),
            delay: Duration::from_millis(300),
            calls: AtomicUsize::new(0),
        });
        let manager = test_manager(tmp.path().to_path_buf(), runner, 1);
        let (sink, _rx) = ChannelTurnSink::new();
        manager.enqueue(test_task("dup", Arc::new(sink))).await.unwrap();

        let (sink2, _rx2) = ChannelTurnSink::new();
        let result = manager.enqueue(test_task("dup", Arc::new(sink2))).await;
        assert!(matches!(result, Err(QueueError::Duplicate(_))));
    }

    #[tokio::test]
    async fn cancel_removes_a_pending_task() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(StubRunner {
            reply_text: "slow".to_string(),
            delay: Duration::from_millis(300),
            calls: AtomicUsize::new(0),
        });
        let manager = test_manager(tmp.path().to_path_buf(), runner, 1);

        let (sink1, _rx1) = ChannelTurnSink::new();
        manager.enqueue(test_task("running", Arc::new(sink1))).await.unwrap();

        let (sink2, _rx2) = ChannelTurnSink::new();
        manager.enqueue(test_task("pending", Arc::new(sink2))).await.unwrap();

        assert_eq!(manager.pending_task_keys(10).await, vec!["pending".to_string()]);
        assert!(manager.cancel("pending").await);
        assert!(manager.pending_task_keys(10).await.is_empty());
    }
}
