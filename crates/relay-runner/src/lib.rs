mod cancel;
mod error;
mod primary;
mod process;
mod secondary;
mod types;

pub use cancel::CancelHandle;
pub use error::RunnerError;
pub use primary::PrimaryRunner;
pub use process::{CaptureBuffer, MAX_CAPTURE_BYTES};
pub use secondary::SecondaryRunner;
pub use types::{RunRequest, RunResult, RunnerEvent, Usage};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A way to run one agent turn to completion, streaming events as it goes.
///
/// Implemented once per agent-CLI variant the orchestrator can shell out to.
/// Callers publish a [`CancelHandle`] before calling `run` so the in-flight
/// subprocess can be torn down from outside the call.
#[async_trait]
pub trait Runner: Send + Sync {
    fn engine_name(&self) -> &'static str;

    /// Whether a max-turns exhaustion should be retried once without the cap.
    fn supports_max_turns_retry(&self) -> bool;

    /// Whether `req.session_id` can be passed through as a resume target.
    fn supports_session_resume(&self) -> bool;

    async fn run(
        &self,
        req: RunRequest,
        cancel: CancelHandle,
        events: mpsc::Sender<RunnerEvent>,
    ) -> RunResult;
}
