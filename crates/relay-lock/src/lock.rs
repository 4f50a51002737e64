use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::error::{LockError, Result};
use crate::liveness::is_alive;
use crate::types::LockRecord;

/// Single-instance guard over a well-known lock file. Acquiring refuses to
/// start if the recorded pid is still alive; otherwise the stale file is
/// replaced. Released via `Drop` so an early return or panic during startup
/// still cleans up.
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    /// Acquire the lock at `path`, creating parent directories as needed.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Some(existing) = read_record(&path)? {
            if is_alive(existing.pid) {
                return Err(LockError::AlreadyRunning { pid: existing.pid });
            }
            // Stale: the recorded pid is gone. Fall through and overwrite.
        }

        let record = LockRecord {
            pid: std::process::id(),
            started_at: Utc::now(),
            cwd: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        };
        let json = serde_json::to_vec_pretty(&record)?;
        fs::write(&path, json)?;

        Ok(Self { path })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove lock file on shutdown");
            }
        }
    }
}

fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    match fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(_) => Ok(None),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_when_no_lock_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".runtime").join("bot.lock");
        let lock = ProcessLock::acquire(&path).unwrap();
        assert!(path.exists());
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn refuses_when_recorded_pid_is_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.lock");
        let record = LockRecord {
            pid: std::process::id(),
            started_at: Utc::now(),
            cwd: "/tmp".into(),
        };
        fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

        let err = ProcessLock::acquire(&path).unwrap_err();
        assert!(matches!(err, LockError::AlreadyRunning { .. }));
    }

    #[test]
    fn replaces_stale_lock_from_dead_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.lock");
        let record = LockRecord {
            pid: u32::MAX,
            started_at: Utc::now(),
            cwd: "/tmp".into(),
        };
        fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

        let lock = ProcessLock::acquire(&path).unwrap();
        drop(lock);
    }
}
