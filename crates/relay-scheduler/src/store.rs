use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::types::ScheduleEntry;

const ROOT_FILE: &str = "root.json";
const MODES_DIR: &str = "modes";

/// Loads and persists [`ScheduleEntry`] definitions from `schedules/root.json`
/// (entries with no `mode_id`) merged with one file per mode under
/// `schedules/modes/{mode_id}.json`. Keyed by `key`, so a key collision
/// across files is last-write-wins at load time — in practice mode files are
/// only ever written with their own mode's entries, so this never happens in
/// normal operation.
pub struct ScheduleStore {
    dir: PathBuf,
    entries: Mutex<BTreeMap<String, ScheduleEntry>>,
}

impl ScheduleStore {
    pub fn load(schedules_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(schedules_dir)?;
        std::fs::create_dir_all(schedules_dir.join(MODES_DIR))?;

        let mut entries = BTreeMap::new();
        for entry in read_entries_file(&schedules_dir.join(ROOT_FILE))? {
            entries.insert(entry.key.clone(), entry);
        }

        let modes_dir = schedules_dir.join(MODES_DIR);
        let mut mode_files: Vec<PathBuf> = std::fs::read_dir(&modes_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        mode_files.sort();
        for path in mode_files {
            for entry in read_entries_file(&path)? {
                entries.insert(entry.key.clone(), entry);
            }
        }

        Ok(Self {
            dir: schedules_dir.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn list(&self) -> Vec<ScheduleEntry> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<ScheduleEntry> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn upsert(&self, entry: ScheduleEntry) -> Result<()> {
        {
            let mut entries = self.entries.lock().unwrap();
            entries.insert(entry.key.clone(), entry);
        }
        self.persist_all()
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        {
            let mut entries = self.entries.lock().unwrap();
            if entries.remove(key).is_none() {
                return Err(SchedulerError::NotFound(key.to_string()));
            }
        }
        self.persist_all()
    }

    pub fn set_enabled(&self, key: &str, enabled: bool) -> Result<()> {
        {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.get_mut(key).ok_or_else(|| SchedulerError::NotFound(key.to_string()))?;
            entry.enabled = enabled;
        }
        self.persist_all()
    }

    /// Regroup every entry by (no mode_id → root.json, mode_id → modes/{id}.json)
    /// and rewrite each file in stable key order, atomically.
    fn persist_all(&self) -> Result<()> {
        let entries = self.entries.lock().unwrap();
        let mut by_mode: BTreeMap<Option<String>, Vec<ScheduleEntry>> = BTreeMap::new();
        for entry in entries.values() {
            by_mode.entry(entry.mode_id.clone()).or_default().push(entry.clone());
        }
        drop(entries);

        write_entries_file(&self.dir.join(ROOT_FILE), by_mode.get(&None).map(Vec::as_slice).unwrap_or(&[]))?;

        let modes_dir = self.dir.join(MODES_DIR);
        let existing: Vec<PathBuf> = std::fs::read_dir(&modes_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        for path in existing {
            std::fs::remove_file(&path)?;
        }
        for (mode_id, mut mode_entries) in by_mode {
            let Some(mode_id) = mode_id else { continue };
            mode_entries.sort_by(|a, b| a.key.cmp(&b.key));
            write_entries_file(&modes_dir.join(format!("{mode_id}.json")), &mode_entries)?;
        }
        Ok(())
    }
}

fn read_entries_file(path: &Path) -> Result<Vec<ScheduleEntry>> {
    match std::fs::read(path) {
        Ok(bytes) => {
            if bytes.is_empty() {
                return Ok(Vec::new());
            }
            serde_json::from_slice(&bytes).map_err(|e| {
                warn!(path = %path.display(), error = %e, "malformed schedule file, treating as empty");
                e.into()
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_entries_file(path: &Path, entries: &[ScheduleEntry]) -> Result<()> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));
    let body = serde_json::to_vec_pretty(&sorted)?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, mode_id: Option<&str>) -> ScheduleEntry {
        ScheduleEntry {
            key: key.to_string(),
            cron: "0 9 * * *".to_string(),
            channel: "general".to_string(),
            prompt: "good morning".to_string(),
            mode_id: mode_id.map(str::to_string),
            enabled: true,
        }
    }

    #[test]
    fn upsert_persists_and_reloads_across_root_and_mode_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ScheduleStore::load(tmp.path()).unwrap();
        store.upsert(entry("daily", None)).unwrap();
        store.upsert(entry("trip-reminder", Some("travel"))).unwrap();

        assert!(tmp.path().join("root.json").exists());
        assert!(tmp.path().join("modes/travel.json").exists());

        let reloaded = ScheduleStore::load(tmp.path()).unwrap();
        let mut keys: Vec<_> = reloaded.list().into_iter().map(|e| e.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["daily".to_string(), "trip-reminder".to_string()]);
    }

    #[test]
    fn remove_unknown_key_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ScheduleStore::load(tmp.path()).unwrap();
        assert!(matches!(store.remove("nope"), Err(SchedulerError::NotFound(_))));
    }

    #[test]
    fn set_enabled_flips_flag_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ScheduleStore::load(tmp.path()).unwrap();
        store.upsert(entry("daily", None)).unwrap();
        store.set_enabled("daily", false).unwrap();
        assert!(!store.get("daily").unwrap().enabled);

        let reloaded = ScheduleStore::load(tmp.path()).unwrap();
        assert!(!reloaded.get("daily").unwrap().enabled);
    }
}
