mod error;
mod liveness;
mod lock;
mod types;

pub use error::{LockError, Result};
pub use liveness::is_alive;
pub use lock::ProcessLock;
pub use types::LockRecord;
