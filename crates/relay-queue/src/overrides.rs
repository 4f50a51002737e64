use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

/// One of the four `*-overrides.json` files under `dataDir/`: a flat map of
/// `"userId:contextId"` to a scalar value, loaded once at startup and
/// rewritten atomically (temp-file-then-rename) on every mutation. Key
/// ordering is stable (`BTreeMap` at serialization time) so unchanged data
/// round-trips byte-for-byte.
pub struct OverridesFile<V> {
    path: PathBuf,
    entries: DashMap<String, V>,
}

impl<V> OverridesFile<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = DashMap::new();
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, V>>(&bytes) {
                Ok(map) => {
                    for (k, v) in map {
                        entries.insert(k, v);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to parse overrides file, starting empty"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to read overrides file, starting empty"),
        }
        Self { path, entries }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|v| v.clone())
    }

    pub async fn set(&self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
        self.persist().await;
    }

    pub async fn remove(&self, key: &str) {
        self.entries.remove(key);
        self.persist().await;
    }

    async fn persist(&self) {
        let snapshot: BTreeMap<String, V> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let Ok(json) = serde_json::to_vec_pretty(&snapshot) else {
            return;
        };
        if let Err(e) = write_atomic(&self.path, &json).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist overrides file");
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

    #[tokio::test]
    async fn set_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model-overrides.json");

        let file: OverridesFile<String> = OverridesFile::load(&path).await;
        file.set("user:1:context:2", "gpt-5".to_string()).await;

        let reloaded: OverridesFile<String> = OverridesFile::load(&path).await;
        assert_eq!(reloaded.get("user:1:context:2"), Some("gpt-5".to_string()));
    }

    #[tokio::test]
    async fn unchanged_writes_are_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verbose-overrides.json");

        let file: OverridesFile<bool> = OverridesFile::load(&path).await;
        file.set("a", true).await;
        file.set("b", false).await;
        let first = tokio::fs::read(&path).await.unwrap();

        file.remove("nonexistent").await;
        let second = tokio::fs::read(&path).await.unwrap();
        assert_eq!(first, second);
    }
}
