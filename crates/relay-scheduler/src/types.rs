use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// One scheduled enqueue: a five-field cron expression gating a fixed prompt
/// against a channel, optionally scoped to a mecho mode. Schedules with a
/// `mode_id` are persisted under `schedules/modes/{mode_id}.json`; schedules
/// without one live in the shared `schedules/root.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub key: String,
    pub cron: String,
    pub channel: String,
    pub prompt: String,
    #[serde(default)]
    pub mode_id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}
