use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use tracing::{debug, info};

use crate::active_hours::within_active_hours;
use crate::types::HeartbeatConfig;

/// Whether the target channel can currently be resolved (exists, bot still a
/// member, etc.) — a real transport answers this; a heartbeat whose channel
/// has gone away should skip quietly rather than enqueue a turn no one will
/// ever see.
#[async_trait]
pub trait ChannelResolver: Send + Sync {
    async fn resolve(&self, channel: &str) -> bool;
}

/// Whether the queue currently has any work in flight. A heartbeat never
/// piles onto a busy queue — it just waits for the next aligned slot.
#[async_trait]
pub trait QueueBusyProbe: Send + Sync {
    async fn is_busy(&self) -> bool;
}

/// Enqueue seam — `relay-orchestrator` supplies the real implementation over
/// a `QueueManager`, so this crate never depends on `relay-queue` directly.
#[async_trait]
pub trait HeartbeatEnqueuer: Send + Sync {
    async fn enqueue_heartbeat(&self, task_key: String, channel: String, prompt: String) -> bool;
}

/// Drives one channel's periodic self-check enqueue, aligned to the clock.
pub struct HeartbeatEngine {
    config: HeartbeatConfig,
    channel_resolver: Arc<dyn ChannelResolver>,
    busy_probe: Arc<dyn QueueBusyProbe>,
    enqueuer: Arc<dyn HeartbeatEnqueuer>,
}

impl HeartbeatEngine {
    pub fn new(
        config: HeartbeatConfig,
        channel_resolver: Arc<dyn ChannelResolver>,
        busy_probe: Arc<dyn QueueBusyProbe>,
        enqueuer: Arc<dyn HeartbeatEnqueuer>,
    ) -> Self {
        Self {
            config,
            channel_resolver,
            busy_probe,
            enqueuer,
        }
    }

    /// Run until `shutdown` fires. Sleeps to each aligned slot
    /// (`ceil(now / interval) + 10s buffer`), then attempts one enqueue.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if !self.config.enabled || self.config.checklist_text.trim().is_empty() {
            info!(channel = %self.config.channel, "heartbeat disabled or checklist empty, not starting");
            return;
        }
        info!(channel = %self.config.channel, interval_secs = self.config.interval_secs, "heartbeat engine started");

        loop {
            let sleep_for = next_slot_delay(self.config.interval_secs);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    self.fire_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(channel = %self.config.channel, "heartbeat engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn fire_once(&self) {
        let hour = Utc::now().hour();
        if !within_active_hours(hour, self.config.active_start_hour, self.config.active_end_hour) {
            debug!(channel = %self.config.channel, hour, "outside active hours, skipping heartbeat");
            return;
        }
        if !self.channel_resolver.resolve(&self.config.channel).await {
            debug!(channel = %self.config.channel, "channel not resolvable, skipping heartbeat");
            return;
        }
        if self.busy_probe.is_busy().await {
            debug!(channel = %self.config.channel, "queue busy, skipping this heartbeat slot");
            return;
        }

        let task_key = format!("heartbeat:{}", self.config.channel);
        let prompt = build_prompt(&self.config.checklist_text);
        self.enqueuer.enqueue_heartbeat(task_key, self.config.channel.clone(), prompt).await;
    }
}

fn build_prompt(checklist_text: &str) -> String {
    format!(
        "Run this self-check. Reply with exactly \"OK-token\" if everything is fine, otherwise \
         describe the problem.\n\n[Checklist]\n{checklist_text}"
    )
}

/// Seconds until `ceil(now / interval) + 10s` — the next aligned slot plus a
/// fixed buffer so the heartbeat doesn't race other work landing exactly on
/// the boundary.
fn next_slot_delay(interval_secs: u64) -> std::time::Duration {
    let interval_secs = interval_secs.max(1);
    let now = Utc::now().timestamp().max(0) as u64;
    let next_slot = now.div_ceil(interval_secs) * interval_secs;
    let next_slot = if next_slot == now { next_slot + interval_secs } else { next_slot };
    let delay = (next_slot - now) + 10;
    std::time::Duration::from_secs(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_slot_delay_is_within_interval_plus_buffer() {
        let delay = next_slot_delay(3600).as_secs();
        assert!(delay > 10 && delay <= 3610);
    }

    #[test]
    fn build_prompt_embeds_checklist() {
        let prompt = build_prompt("check disk space");
        assert!(prompt.contains("check disk space"));
        assert!(prompt.contains("OK-token"));
    }
}
