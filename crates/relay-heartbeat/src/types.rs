/// Static configuration for one channel's heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub channel: String,
    pub interval_secs: u64,
    /// Active-hours window, inclusive start / exclusive end, in the
    /// deployment's local hour-of-day (0-23). `start > end` means the
    /// window wraps past midnight (e.g. 22 → 6 covers 22:00 through 05:59).
    pub active_start_hour: u32,
    pub active_end_hour: u32,
    pub checklist_text: String,
    pub ok_token: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: String::new(),
            interval_secs: 3600,
            active_start_hour: 0,
            active_end_hour: 24,
            checklist_text: String::new(),
            ok_token: "OK-token".to_string(),
        }
    }
}

/// What the reply interceptor decided to do with a heartbeat turn's first
/// reply chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Matched the "all clear" sentinel, or repeated the last delivered
    /// report within the dedup window — don't forward to the real channel.
    Suppress,
    /// Forward every chunk to the real channel.
    Forward,
}
