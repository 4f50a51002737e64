use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cancellation handle published by a runner as soon as the child process is
/// spawned. `cancel()` may race the publish — it retries every 50ms up to 20
/// times (1s total) before giving up.
#[derive(Clone)]
pub struct CancelHandle {
    pid: Arc<AtomicU32>,
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            pid: Arc::new(AtomicU32::new(0)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn publish(&self, pid: u32) {
        self.pid.store(pid, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation of the published process group. Returns `true`
    /// if a pid was found (and kill signals sent) within the retry window.
    pub async fn cancel(&self) -> bool {
        self.cancelled.store(true, Ordering::SeqCst);

        for attempt in 0..20 {
            let pid = self.pid.load(Ordering::SeqCst);
            if pid != 0 {
                crate::process::kill_process_group(pid).await;
                return true;
            }
            if attempt < 19 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        false
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}
