mod error;
mod live_update;
mod manager;
mod memory_client;
mod overrides;
mod restart_hook;
mod sink;
mod types;
mod workspace;

pub use error::QueueError;
pub use live_update::LiveUpdate;
pub use manager::QueueManager;
pub use memory_client::{MemoryClient, PrepareResponse};
pub use overrides::OverridesFile;
pub use restart_hook::{NoRestartHook, RestartContext, RestartHook};
pub use sink::{ChannelTurnSink, ConsoleTurnSink, SinkMessage};
pub use types::{Attachment, QueueConfig, Task, TaskOutcome, TaskSnapshot, TurnSink};
pub use workspace::{split_reply_chunks, TurnWorkspace};
