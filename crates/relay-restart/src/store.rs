use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::PendingResume;

const PENDING_RESUME_VERSION: u32 = 1;

/// Read/write/delete `dataDir/restart-pending.json`.
pub struct PendingResumeStore {
    path: PathBuf,
}

impl PendingResumeStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join("restart-pending.json"),
        }
    }

    pub async fn load(&self) -> Result<Option<PendingResume>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, mut resume: PendingResume) -> Result<()> {
        resume.version = PENDING_RESUME_VERSION;
        let json = serde_json::to_vec_pretty(&resume)?;
        write_atomic(&self.path, &json).await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> PendingResume {
        PendingResume {
            version: 0,
            id: "r1".into(),
            requested_at: Utc::now(),
            channel_id: "chan".into(),
            user_id: "user".into(),
            context_id: "ctx".into(),
            session_user_id: "user".into(),
            engine: "primary".into(),
            session_id: Some("sess".into()),
            model: None,
            mode_name: None,
            mecho_mode_id: None,
            reason: Some("upgrade".into()),
            resume_prompt: "continuing".into(),
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingResumeStore::new(dir.path());
        store.save(sample()).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.id, "r1");
        assert_eq!(loaded.version, PENDING_RESUME_VERSION);
    }

    #[tokio::test]
    async fn load_with_nothing_saved_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingResumeStore::new(dir.path());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_then_load_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingResumeStore::new(dir.path());
        store.save(sample()).await.unwrap();
        store.delete().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
