use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contents of `.runtime/bot.lock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub cwd: String,
}
