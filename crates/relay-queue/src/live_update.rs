use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::types::TurnSink;

const EVENTS_RING_CAP: usize = 12;
const ASSISTANT_TAIL_CAP: usize = 900;

struct LiveUpdateState {
    status: String,
    events: VecDeque<String>,
    assistant_tail: String,
    last_flush: Instant,
    verbose: bool,
}

/// Coordinates the single edit-in-place live-update message for one running
/// task. Flushes coalesce to at most one edit per
/// [`crate::types::QueueConfig::live_update_flush_interval_secs`]; disabling
/// verbose mode pauses edits but keeps capturing so re-enabling attaches
/// immediately with the latest state.
pub struct LiveUpdate {
    sink: Arc<dyn TurnSink>,
    engine: String,
    model: Option<String>,
    started_at: Instant,
    flush_interval: Duration,
    state: Mutex<LiveUpdateState>,
}

impl LiveUpdate {
    pub fn new(
        sink: Arc<dyn TurnSink>,
        engine: String,
        model: Option<String>,
        flush_interval: Duration,
        verbose: bool,
    ) -> Self {
        Self {
            sink,
            engine,
            model,
            started_at: Instant::now(),
            flush_interval,
            state: Mutex::new(LiveUpdateState {
                status: "starting".to_string(),
                events: VecDeque::new(),
                assistant_tail: String::new(),
                last_flush: Instant::now() - flush_interval,
                verbose,
            }),
        }
    }

    pub async fn set_verbose(&self, verbose: bool) {
        let mut state = self.state.lock().await;
        let was_off = !state.verbose;
        state.verbose = verbose;
        if verbose && was_off {
            drop(state);
            self.flush(true).await;
        }
    }

    pub async fn push_status(&self, status: impl Into<String>) {
        {
            let mut state = self.state.lock().await;
            state.status = status.into();
        }
        self.flush(false).await;
    }

    pub async fn push_event(&self, event: impl Into<String>) {
        {
            let mut state = self.state.lock().await;
            if state.events.len() >= EVENTS_RING_CAP {
                state.events.pop_front();
            }
            state.events.push_back(event.into());
        }
        self.flush(false).await;
    }

    pub async fn push_assistant_delta(&self, delta: &str) {
        {
            let mut state = self.state.lock().await;
            state.assistant_tail.push_str(delta);
            if state.assistant_tail.len() > ASSISTANT_TAIL_CAP {
                let excess = state.assistant_tail.len() - ASSISTANT_TAIL_CAP;
                let mut cut = excess;
                while !state.assistant_tail.is_char_boundary(cut) {
                    cut += 1;
                }
                state.assistant_tail.drain(..cut);
            }
        }
        self.flush(false).await;
    }

    /// Render and send an edit if verbose and the flush interval elapsed
    /// since the last edit (or `force` bypasses the interval, used when
    /// verbose is just re-enabled and a 20 s heartbeat should see it
    /// immediately).
    async fn flush(&self, force: bool) {
        let text = {
            let mut state = self.state.lock().await;
            if !state.verbose {
                return;
            }
            if !force && state.last_flush.elapsed() < self.flush_interval {
                return;
            }
            state.last_flush = Instant::now();
            self.render(&state)
        };
        self.sink.try_edit_first(&text).await;
    }

    /// Called on a 20 s heartbeat timer to keep the message fresh even when
    /// nothing new has been pushed.
    pub async fn heartbeat(&self) {
        self.flush(true).await;
    }

    /// Render the current state without sending an edit — used by snapshot
    /// queries so they see exactly what the next live-update edit would show.
    pub async fn rendered_text(&self) -> String {
        let state = self.state.lock().await;
        self.render(&state)
    }

    fn render(&self, state: &LiveUpdateState) -> String {
        let elapsed = self.started_at.elapsed().as_secs();
        let model = self.model.as_deref().unwrap_or("default");
        let mut out = format!(
            "**{}** · {} · {}s\n{}\n",
            self.engine, model, elapsed, state.status
        );
        for event in &state.events {
            out.push_str("- ");
            out.push_str(event);
            out.push('\n');
        }
        if !state.assistant_tail.is_empty() {
            out.push('\n');
            out.push_str(&state.assistant_tail);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelTurnSink;

    #[tokio::test]
    async fn disabling_verbose_pauses_edits_but_keeps_capture() {
        let (sink, mut rx) = ChannelTurnSink::new();
        let live = LiveUpdate::new(
            Arc::new(sink),
            "primary".to_string(),
            Some("model-x".to_string()),
            Duration::from_millis(0),
            true,
        );

        live.push_status("running").await;
        assert!(rx.try_recv().is_ok());

        live.set_verbose(false).await;
        live.push_status("still running").await;
        assert!(rx.try_recv().is_err());

        live.set_verbose(true).await;
        let msg = rx.try_recv().expect("edit should replay latest state");
        match msg {
            crate::sink::SinkMessage::Edit(text) => assert!(text.contains("still running")),
            _ => panic!("expected edit message"),
        }
    }
}
