use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use rusqlite::Connection;
use tracing::info;

use crate::archival::ArchivalStore;
use crate::db::{init_archival_db, init_mode_db};
use crate::error::{MemoryError, Result};
use crate::store::ModeStore;

/// Open primary + archival handles for one mode.
pub struct ModeHandle {
    pub store: ModeStore,
    pub archival: ArchivalStore,
}

/// Process-wide cache of opened per-mode store handles, keyed by sanitized
/// `mode_id`. Directory existence under `modes_root` is the source of truth
/// for "mode exists" — the cache is just an optimization that a restart
/// starts out empty.
pub struct MemoryService {
    modes_root: PathBuf,
    cache: DashMap<String, Arc<ModeHandle>>,
}

impl MemoryService {
    pub fn new(modes_root: impl Into<PathBuf>) -> Self {
        Self {
            modes_root: modes_root.into(),
            cache: DashMap::new(),
        }
    }

    fn mode_dir(&self, mode_id: &str) -> PathBuf {
        self.modes_root.join(mode_id)
    }

    fn sanitize(raw: &str) -> Result<String> {
        relay_core::ids::sanitize_mode_id(raw)
            .ok_or_else(|| MemoryError::InvalidModeId(raw.to_string()))
    }

    /// Create the mode's directory and databases if they don't already
    /// exist. Idempotent.
    pub fn mode_create(&self, raw_mode_id: &str) -> Result<String> {
        let mode_id = Self::sanitize(raw_mode_id)?;
        let dir = self.mode_dir(&mode_id);
        std::fs::create_dir_all(&dir)?;
        let handle = open_handle(&mode_id, &dir)?;
        self.cache.insert(mode_id.clone(), Arc::new(handle));
        Ok(mode_id)
    }

    /// Remove the mode's cache entry (dropping the last `Arc` closes the
    /// connections) and delete its directory tree.
    pub fn mode_delete(&self, raw_mode_id: &str) -> Result<()> {
        let mode_id = Self::sanitize(raw_mode_id)?;
        self.cache.remove(&mode_id);
        let dir = self.mode_dir(&mode_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Enumerate mode directories on disk, not the cache — a process
    /// restart with an empty cache must still report existing modes.
    pub fn mode_list(&self) -> Result<Vec<String>> {
        if !self.modes_root.exists() {
            return Ok(Vec::new());
        }
        let mut modes = Vec::new();
        for entry in std::fs::read_dir(&self.modes_root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    modes.push(name.to_string());
                }
            }
        }
        modes.sort();
        Ok(modes)
    }

    /// Fetch (and lazily open) the handle for a mode that already exists on
    /// disk.
    pub fn get(&self, raw_mode_id: &str) -> Result<Arc<ModeHandle>> {
        let mode_id = Self::sanitize(raw_mode_id)?;
        if let Some(handle) = self.cache.get(&mode_id) {
            return Ok(handle.clone());
        }

        let dir = self.mode_dir(&mode_id);
        if !dir.exists() {
            return Err(MemoryError::ModeNotFound { mode_id });
        }

        info!(mode_id, "opening mode store handle (cache miss)");
        let handle = Arc::new(open_handle(&mode_id, &dir)?);
        self.cache.insert(mode_id, handle.clone());
        Ok(handle)
    }
}

fn open_handle(mode_id: &str, dir: &Path) -> Result<ModeHandle> {
    let primary = Connection::open(dir.join("mecho.db"))?;
    init_mode_db(&primary)?;
    let archival = Connection::open(dir.join("archival.db"))?;
    init_archival_db(&archival)?;

    Ok(ModeHandle {
        store: ModeStore::new(mode_id, primary),
        archival: ArchivalStore::new(mode_id, archival),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_list_then_delete() {
        let tmp = tempfile_dir();
        let service = MemoryService::new(&tmp);
        assert!(service.mode_list().unwrap().is_empty());
        service.mode_create("My Mode").unwrap();
        assert_eq!(service.mode_list().unwrap(), vec!["mymode".to_string()]);
        service.get("mymode").unwrap();
        service.mode_delete("mymode").unwrap();
        assert!(service.mode_list().unwrap().is_empty());
        assert!(service.get("mymode").is_err());
    }

    fn tempfile_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("relay-memory-test-{}", relay_core::ids::new_handle()));
        dir
    }
}
