use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cron::CronExpr;
use crate::error::Result;
use crate::store::ScheduleStore;
use crate::types::ScheduleEntry;

/// Seam the scheduler enqueues through — `relay-orchestrator` supplies the
/// real implementation over a `QueueManager`, so this crate never depends on
/// `relay-queue` directly.
#[async_trait]
pub trait ScheduleEnqueuer: Send + Sync {
    /// Attempt to enqueue one fired schedule's turn. Returns `true` on
    /// successful enqueue (including "already running/pending", which still
    /// counts as delivered for dedup purposes) and `false` only when the
    /// enqueue was rejected outright (e.g. queue full) — a `false` means the
    /// minute bucket should be retried rather than marked fired.
    async fn enqueue_scheduled(
        &self,
        task_key: String,
        session_user_id: String,
        channel: String,
        mode_id: Option<String>,
        prompt: String,
    ) -> bool;
}

/// CRUD handle over the persisted schedule set, usable independently of the
/// running [`SchedulerEngine`] (e.g. from an admin HTTP endpoint).
pub struct SchedulerHandle {
    store: Arc<ScheduleStore>,
}

impl SchedulerHandle {
    pub fn new(store: Arc<ScheduleStore>) -> Self {
        Self { store }
    }

    pub fn add_schedule(&self, entry: ScheduleEntry) -> Result<()> {
        CronExpr::parse(&entry.cron)?;
        self.store.upsert(entry)
    }

    pub fn remove_schedule(&self, key: &str) -> Result<()> {
        self.store.remove(key)
    }

    pub fn set_enabled(&self, key: &str, enabled: bool) -> Result<()> {
        self.store.set_enabled(key, enabled)
    }

    pub fn list_schedules(&self) -> Vec<ScheduleEntry> {
        self.store.list()
    }
}

/// Single 60 s tick loop, aligned to the wall-clock minute boundary and
/// evaluated in a fixed `Tz` rather than the host's local time. Tracks a
/// `(minute_bucket, fired set)` pair so a schedule that matches for an
/// entire minute only ever enqueues once.
pub struct SchedulerEngine {
    store: Arc<ScheduleStore>,
    enqueuer: Arc<dyn ScheduleEnqueuer>,
    tz: Tz,
    fired: HashSet<String>,
    current_bucket: Option<(i32, u32, u32, u32, u32)>,
}

impl SchedulerEngine {
    pub fn new(store: Arc<ScheduleStore>, enqueuer: Arc<dyn ScheduleEnqueuer>, tz: Tz) -> Self {
        Self {
            store,
            enqueuer,
            tz,
            fired: HashSet::new(),
            current_bucket: None,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        let mut interval = aligned_minute_interval();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&mut self) {
        let now = Utc::now().with_timezone(&self.tz);
        let bucket = (now.year(), now.month(), now.day(), now.hour(), now.minute());
        if self.current_bucket != Some(bucket) {
            self.fired.clear();
            self.current_bucket = Some(bucket);
        }

        let weekday = now.weekday().num_days_from_sunday();
        for entry in self.store.list() {
            if !entry.enabled {
                continue;
            }
            let cron = match CronExpr::parse(&entry.cron) {
                Ok(c) => c,
                Err(e) => {
                    warn!(schedule = %entry.key, error = %e, "skipping schedule with unparsable cron");
                    continue;
                }
            };
            if !cron.matches(now.minute(), now.hour(), now.day(), now.month(), weekday) {
                continue;
            }

            let fired_key = format!("{}:{}", entry.key, entry.channel);
            if self.fired.contains(&fired_key) {
                continue;
            }

            let task_key = format!("schedule:{}:{}", entry.key, entry.channel);
            let session_user_id = entry
                .mode_id
                .as_deref()
                .map(|m| format!("mode:{m}"))
                .unwrap_or_else(|| format!("schedule:{}", entry.key));

            let delivered = self
                .enqueuer
                .enqueue_scheduled(task_key, session_user_id, entry.channel.clone(), entry.mode_id.clone(), entry.prompt.clone())
                .await;
            if delivered {
                self.fired.insert(fired_key);
            }
        }
    }
}

/// A `tokio::time::interval` whose first tick lands on the next wall-clock
/// minute boundary, then free-runs at a plain 60 s period — ticks never
/// drift relative to each other, only relative to the wall clock, which
/// matches the ±1 minute granularity this component promises.
fn aligned_minute_interval() -> tokio::time::Interval {
    let now = Utc::now();
    let secs_into_minute = now.second() as u64;
    let delay = if secs_into_minute == 0 { 0 } else { 60 - secs_into_minute };
    let start = tokio::time::Instant::now() + std::time::Duration::from_secs(delay);
    tokio::time::interval_at(start, std::time::Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct RecordingEnqueuer {
        calls: Mutex<Vec<(String, String)>>,
        accept: bool,
    }

    #[async_trait]
    impl ScheduleEnqueuer for RecordingEnqueuer {
        async fn enqueue_scheduled(
            &self,
            task_key: String,
            session_user_id: String,
            _channel: String,
            _mode_id: Option<String>,
            _prompt: String,
        ) -> bool {
            self.calls.lock().unwrap().push((task_key, session_user_id));
            self.accept
        }
    }

    #[tokio::test]
    async fn matching_schedule_fires_once_per_minute_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(ScheduleStore::load(tmp.path()).unwrap());
        store
            .upsert(ScheduleEntry {
                key: "always".to_string(),
                cron: "* * * * *".to_string(),
                channel: "general".to_string(),
                prompt: "ping".to_string(),
                mode_id: None,
                enabled: true,
            })
            .unwrap();

        let enqueuer = Arc::new(RecordingEnqueuer {
            calls: Mutex::new(Vec::new()),
            accept: true,
        });
        let mut engine = SchedulerEngine::new(Arc::clone(&store), enqueuer.clone(), chrono_tz::UTC);

        engine.tick().await;
        engine.tick().await;

        let calls = enqueuer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1, "second tick within the same minute must be deduped");
        assert_eq!(calls[0].0, "schedule:always:general");
        assert_eq!(calls[0].1, "schedule:always");
    }

    #[tokio::test]
    async fn rejected_enqueue_is_retried_next_tick() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(ScheduleStore::load(tmp.path()).unwrap());
        store
            .upsert(ScheduleEntry {
                key: "busy".to_string(),
                cron: "* * * * *".to_string(),
                channel: "general".to_string(),
                prompt: "ping".to_string(),
                mode_id: None,
                enabled: true,
            })
            .unwrap();

        let enqueuer = Arc::new(RecordingEnqueuer {
            calls: Mutex::new(Vec::new()),
            accept: false,
        });
        let mut engine = SchedulerEngine::new(Arc::clone(&store), enqueuer.clone(), chrono_tz::UTC);

        engine.tick().await;
        engine.tick().await;

        assert_eq!(enqueuer.calls.lock().unwrap().len(), 2, "a rejected enqueue must not be marked fired");
    }

    #[tokio::test]
    async fn disabled_schedule_never_fires() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(ScheduleStore::load(tmp.path()).unwrap());
        store
            .upsert(ScheduleEntry {
                key: "off".to_string(),
                cron: "* * * * *".to_string(),
                channel: "general".to_string(),
                prompt: "ping".to_string(),
                mode_id: None,
                enabled: false,
            })
            .unwrap();

        let enqueuer = Arc::new(RecordingEnqueuer {
            calls: Mutex::new(Vec::new()),
            accept: true,
        });
        let mut engine = SchedulerEngine::new(store, enqueuer.clone(), chrono_tz::UTC);
        engine.tick().await;
        assert!(enqueuer.calls.lock().unwrap().is_empty());
    }
}
