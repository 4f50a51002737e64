use serde::{Deserialize, Serialize};

/// `relay-orchestrator.toml` + `RELAY_*` env overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub restart: RestartSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root directory for `sessions.db`, `turn-work/`, override files, and
    /// the restart-pending record.
    #[serde(default = "default_data_dir")]
    pub dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { dir: default_data_dir() }
    }
}

fn default_data_dir() -> String {
    relay_core::config::home_relative("mecho-relay/data")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    #[serde(default = "default_typing_interval_secs")]
    pub typing_interval_secs: u64,
    #[serde(default = "default_transient_retry_delay_secs")]
    pub transient_retry_delay_secs: f64,
    #[serde(default)]
    pub rotation_threshold: Option<f64>,
    #[serde(default = "default_live_update_flush_interval_secs")]
    pub live_update_flush_interval_secs: f64,
    #[serde(default = "default_live_update_heartbeat_secs")]
    pub live_update_heartbeat_secs: u64,
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
    #[serde(default = "default_max_reply_chunk_chars")]
    pub max_reply_chunk_chars: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        let d = relay_queue::QueueConfig::default();
        Self {
            max_queue_size: d.max_queue_size,
            max_concurrent_runs: d.max_concurrent_runs,
            typing_interval_secs: d.typing_interval_secs,
            transient_retry_delay_secs: d.transient_retry_delay_secs,
            rotation_threshold: None,
            live_update_flush_interval_secs: d.live_update_flush_interval_secs,
            live_update_heartbeat_secs: d.live_update_heartbeat_secs,
            max_attachment_bytes: d.max_attachment_bytes,
            max_reply_chunk_chars: d.max_reply_chunk_chars,
        }
    }
}

impl QueueSettings {
    pub fn into_queue_config(self) -> relay_queue::QueueConfig {
        relay_queue::QueueConfig {
            max_queue_size: self.max_queue_size,
            max_concurrent_runs: self.max_concurrent_runs,
            typing_interval_secs: self.typing_interval_secs,
            transient_retry_delay_secs: self.transient_retry_delay_secs,
            rotation_threshold: relay_queue::QueueConfig::default().rotation_threshold,
            live_update_flush_interval_secs: self.live_update_flush_interval_secs,
            live_update_heartbeat_secs: self.live_update_heartbeat_secs,
            max_attachment_bytes: self.max_attachment_bytes,
            max_reply_chunk_chars: self.max_reply_chunk_chars,
        }
        .with_rotation_threshold(self.rotation_threshold)
    }
}

fn default_max_queue_size() -> usize {
    relay_queue::QueueConfig::default().max_queue_size
}
fn default_max_concurrent_runs() -> usize {
    relay_queue::QueueConfig::default().max_concurrent_runs
}
fn default_typing_interval_secs() -> u64 {
    relay_queue::QueueConfig::default().typing_interval_secs
}
fn default_transient_retry_delay_secs() -> f64 {
    relay_queue::QueueConfig::default().transient_retry_delay_secs
}
fn default_live_update_flush_interval_secs() -> f64 {
    relay_queue::QueueConfig::default().live_update_flush_interval_secs
}
fn default_live_update_heartbeat_secs() -> u64 {
    relay_queue::QueueConfig::default().live_update_heartbeat_secs
}
fn default_max_attachment_bytes() -> u64 {
    relay_queue::QueueConfig::default().max_attachment_bytes
}
fn default_max_reply_chunk_chars() -> usize {
    relay_queue::QueueConfig::default().max_reply_chunk_chars
}

/// Which agent CLIs can run a turn. The primary variant always exists;
/// the secondary is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    #[serde(default = "default_primary_command")]
    pub primary_command: String,
    #[serde(default)]
    pub secondary_command: Option<String>,
    #[serde(default = "default_engine")]
    pub default_engine: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            primary_command: default_primary_command(),
            secondary_command: None,
            default_engine: default_engine(),
        }
    }
}

fn default_primary_command() -> String {
    "claude".to_string()
}

fn default_engine() -> String {
    "primary".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Base URL of a running `mecho-server`.
    #[serde(default = "default_memory_base_url")]
    pub base_url: String,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self { base_url: default_memory_base_url() }
    }
}

fn default_memory_base_url() -> String {
    "http://127.0.0.1:18790".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartSettings {
    /// Shell command run (after a clamped delay) to respawn this process.
    #[serde(default = "default_restart_command")]
    pub command: String,
    #[serde(default = "default_max_pending_minutes")]
    pub max_pending_minutes: i64,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            command: default_restart_command(),
            max_pending_minutes: default_max_pending_minutes(),
        }
    }
}

fn default_restart_command() -> String {
    "systemctl --user restart relay-orchestrator".to_string()
}

fn default_max_pending_minutes() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { timezone: default_timezone() }
    }
}

fn default_timezone() -> String {
    "Asia/Seoul".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_channel")]
    pub channel: String,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub active_start_hour: u32,
    #[serde(default = "default_active_end_hour")]
    pub active_end_hour: u32,
    #[serde(default)]
    pub checklist_text: String,
    #[serde(default = "default_ok_token")]
    pub ok_token: String,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        let d = relay_heartbeat::HeartbeatConfig::default();
        Self {
            enabled: d.enabled,
            channel: d.channel,
            interval_secs: d.interval_secs,
            active_start_hour: d.active_start_hour,
            active_end_hour: d.active_end_hour,
            checklist_text: d.checklist_text,
            ok_token: d.ok_token,
        }
    }
}

fn default_heartbeat_channel() -> String {
    String::new()
}
fn default_heartbeat_interval_secs() -> u64 {
    relay_heartbeat::HeartbeatConfig::default().interval_secs
}
fn default_active_end_hour() -> u32 {
    relay_heartbeat::HeartbeatConfig::default().active_end_hour
}
fn default_ok_token() -> String {
    relay_heartbeat::HeartbeatConfig::default().ok_token
}

impl HeartbeatSettings {
    pub fn into_heartbeat_config(self) -> relay_heartbeat::HeartbeatConfig {
        relay_heartbeat::HeartbeatConfig {
            enabled: self.enabled,
            channel: self.channel,
            interval_secs: self.interval_secs,
            active_start_hour: self.active_start_hour,
            active_end_hour: self.active_end_hour,
            checklist_text: self.checklist_text,
            ok_token: self.ok_token,
        }
    }
}
