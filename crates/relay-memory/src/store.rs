use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};

use crate::error::{MemoryError, Result};
use crate::types::{
    AckStatus, CoreMemory, CuratedMemory, MemoryEvent, MemoryEventType, PrepareMode, PrepareTurn,
};

/// Durable store for one mode's core memory, curated memories, revision
/// counter, event log, session-sync bookkeeping, and prepare-turn log.
///
/// Every mutating call runs as a single transaction that writes the entity,
/// bumps `revision`, and appends a `memory_event` row — the only way the
/// rev-to-event 1:1 invariant can be guaranteed.
pub struct ModeStore {
    pub mode_id: String,
    db: Mutex<Connection>,
}

impl ModeStore {
    pub fn new(mode_id: impl Into<String>, conn: Connection) -> Self {
        Self {
            mode_id: mode_id.into(),
            db: Mutex::new(conn),
        }
    }

    pub fn get_core(&self) -> Result<Option<CoreMemory>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT mode_id, name, description, detail, updated_at
                 FROM core_memory WHERE mode_id = ?1",
                rusqlite::params![self.mode_id],
                row_to_core,
            )
            .optional()?;
        Ok(row)
    }

    pub fn upsert_core(&self, name: &str, description: &str, detail: &str) -> Result<i64> {
        let core = CoreMemory {
            mode_id: self.mode_id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            detail: detail.to_string(),
            updated_at: relay_core::ids::now_rfc3339(),
        };
        core.validate()?;

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO core_memory (mode_id, name, description, detail, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(mode_id) DO UPDATE SET
                name = excluded.name, description = excluded.description,
                detail = excluded.detail, updated_at = excluded.updated_at",
            rusqlite::params![core.mode_id, core.name, core.description, core.detail, core.updated_at],
        )?;
        let rev = bump_revision(&tx, &self.mode_id)?;
        insert_event(
            &tx,
            &self.mode_id,
            rev,
            MemoryEventType::CoreUpsert,
            None,
            &serde_json::to_string(&core)?,
        )?;
        tx.commit()?;
        Ok(rev)
    }

    /// Returns the row regardless of `is_deleted` — internal consumers
    /// (the delta compiler) need to see soft-deleted rows too.
    pub fn get_curated(&self, memory_id: &str) -> Result<Option<CuratedMemory>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT mode_id, memory_id, name, description, detail, is_deleted, updated_at
                 FROM curated_memory WHERE mode_id = ?1 AND memory_id = ?2",
                rusqlite::params![self.mode_id, memory_id],
                row_to_curated,
            )
            .optional()?;
        Ok(row)
    }

    /// Non-deleted curated rows only, for listings.
    pub fn list_curated(&self) -> Result<Vec<CuratedMemory>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT mode_id, memory_id, name, description, detail, is_deleted, updated_at
             FROM curated_memory WHERE mode_id = ?1 AND is_deleted = 0
             ORDER BY memory_id",
        )?;
        let rows = stmt.query_map(rusqlite::params![self.mode_id], row_to_curated)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn upsert_curated(
        &self,
        memory_id: &str,
        name: &str,
        description: &str,
        detail: &str,
    ) -> Result<i64> {
        let curated = CuratedMemory {
            mode_id: self.mode_id.clone(),
            memory_id: memory_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            detail: detail.to_string(),
            is_deleted: false,
            updated_at: relay_core::ids::now_rfc3339(),
        };
        curated.validate()?;

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO curated_memory
                (mode_id, memory_id, name, description, detail, is_deleted, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
             ON CONFLICT(mode_id, memory_id) DO UPDATE SET
                name = excluded.name, description = excluded.description,
                detail = excluded.detail, is_deleted = 0, updated_at = excluded.updated_at",
            rusqlite::params![
                curated.mode_id,
                curated.memory_id,
                curated.name,
                curated.description,
                curated.detail,
                curated.updated_at,
            ],
        )?;
        let rev = bump_revision(&tx, &self.mode_id)?;
        insert_event(
            &tx,
            &self.mode_id,
            rev,
            MemoryEventType::CuratedUpsert,
            Some(memory_id),
            &serde_json::to_string(&curated)?,
        )?;
        tx.commit()?;
        Ok(rev)
    }

    pub fn soft_delete_curated(&self, memory_id: &str) -> Result<i64> {
        let updated_at = relay_core::ids::now_rfc3339();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let rows_changed = tx.execute(
            "UPDATE curated_memory SET is_deleted = 1, updated_at = ?1
             WHERE mode_id = ?2 AND memory_id = ?3",
            rusqlite::params![updated_at, self.mode_id, memory_id],
        )?;
        if rows_changed == 0 {
            return Err(MemoryError::MemoryNotFound {
                memory_id: memory_id.to_string(),
            });
        }
        let rev = bump_revision(&tx, &self.mode_id)?;
        insert_event(
            &tx,
            &self.mode_id,
            rev,
            MemoryEventType::CuratedDelete,
            Some(memory_id),
            &serde_json::json!({ "memory_id": memory_id }).to_string(),
        )?;
        tx.commit()?;
        Ok(rev)
    }

    pub fn get_current_revision(&self) -> Result<i64> {
        let db = self.db.lock().unwrap();
        current_revision(&db, &self.mode_id)
    }

    pub fn list_memory_events_in_range(
        &self,
        from_exclusive: i64,
        to_inclusive: i64,
    ) -> Result<Vec<MemoryEvent>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, mode_id, rev, event_type, memory_id, payload_json, created_at
             FROM memory_event
             WHERE mode_id = ?1 AND rev > ?2 AND rev <= ?3
             ORDER BY rev, id",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![self.mode_id, from_exclusive, to_inclusive],
            row_to_event,
        )?;
        rows.map(|r| r.map_err(MemoryError::from)).collect()
    }

    pub fn get_last_acked_revision(&self, session_key: &str) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let rev: Option<i64> = db
            .query_row(
                "SELECT last_acked_rev FROM session_sync WHERE session_key = ?1",
                rusqlite::params![session_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(rev.unwrap_or(0))
    }

    fn upsert_last_acked_revision(&self, session_key: &str, rev: i64) -> Result<()> {
        let now = relay_core::ids::now_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO session_sync (session_key, mode_id, last_acked_rev, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_key) DO UPDATE SET
                last_acked_rev = excluded.last_acked_rev, updated_at = excluded.updated_at",
            rusqlite::params![session_key, self.mode_id, rev, now],
        )?;
        Ok(())
    }

    pub fn create_prepare_turn(
        &self,
        session_key: &str,
        from_revision: i64,
        to_revision: i64,
        mode: PrepareMode,
    ) -> Result<String> {
        let prepare_id = relay_core::ids::new_id();
        let now = relay_core::ids::now_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO prepare_turn
                (prepare_id, session_key, mode_id, from_revision, to_revision, mode, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                prepare_id,
                session_key,
                self.mode_id,
                from_revision,
                to_revision,
                mode.to_string(),
                now,
            ],
        )?;
        Ok(prepare_id)
    }

    pub fn get_prepare_turn(&self, prepare_id: &str) -> Result<Option<PrepareTurn>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT prepare_id, session_key, mode_id, from_revision, to_revision, mode,
                        created_at, acked_at, ack_status
                 FROM prepare_turn WHERE prepare_id = ?1 AND mode_id = ?2",
                rusqlite::params![prepare_id, self.mode_id],
                row_to_prepare_turn,
            )
            .optional()?;
        Ok(row)
    }

    /// Ack a prepare turn. Idempotent: a repeated ack of an already-acked
    /// row returns `false` without changing state. Only a `success` ack
    /// advances `last_acked_rev`.
    pub fn ack_prepare_turn(&self, prepare_id: &str, status: AckStatus) -> Result<bool> {
        let turn = self
            .get_prepare_turn(prepare_id)?
            .ok_or_else(|| MemoryError::PrepareNotFound {
                prepare_id: prepare_id.to_string(),
            })?;

        if turn.acked_at.is_some() {
            return Ok(false);
        }

        let now = relay_core::ids::now_rfc3339();
        let status_str = match status {
            AckStatus::Success => "success",
            AckStatus::Failed => "failed",
        };
        {
            let db = self.db.lock().unwrap();
            db.execute(
                "UPDATE prepare_turn SET acked_at = ?1, ack_status = ?2 WHERE prepare_id = ?3",
                rusqlite::params![now, status_str, prepare_id],
            )?;
        }

        if status == AckStatus::Success {
            self.upsert_last_acked_revision(&turn.session_key, turn.to_revision)?;
        }

        Ok(true)
    }

    /// Best-effort WAL checkpoint, called after every ack. A busy database
    /// (a concurrent reader holding the WAL) is logged and otherwise
    /// ignored — this is housekeeping, not correctness.
    pub fn checkpoint(&self) {
        let db = self.db.lock().unwrap();
        if let Err(e) = db.pragma_update(None, "wal_checkpoint", "PASSIVE") {
            tracing::warn!(mode_id = %self.mode_id, error = %e, "WAL checkpoint failed, continuing");
        }
    }
}

fn current_revision(db: &Connection, mode_id: &str) -> Result<i64> {
    let rev: Option<i64> = db
        .query_row(
            "SELECT current_rev FROM revision WHERE mode_id = ?1",
            rusqlite::params![mode_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(rev.unwrap_or(0))
}

fn bump_revision(tx: &rusqlite::Transaction<'_>, mode_id: &str) -> Result<i64> {
    tx.execute(
        "INSERT INTO revision (mode_id, current_rev) VALUES (?1, 1)
         ON CONFLICT(mode_id) DO UPDATE SET current_rev = current_rev + 1",
        rusqlite::params![mode_id],
    )?;
    let rev: i64 = tx.query_row(
        "SELECT current_rev FROM revision WHERE mode_id = ?1",
        rusqlite::params![mode_id],
        |row| row.get(0),
    )?;
    Ok(rev)
}

fn insert_event(
    tx: &rusqlite::Transaction<'_>,
    mode_id: &str,
    rev: i64,
    event_type: MemoryEventType,
    memory_id: Option<&str>,
    payload_json: &str,
) -> Result<()> {
    let now = relay_core::ids::now_rfc3339();
    tx.execute(
        "INSERT INTO memory_event (mode_id, rev, event_type, memory_id, payload_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![mode_id, rev, event_type.to_string(), memory_id, payload_json, now],
    )?;
    Ok(())
}

fn row_to_core(row: &rusqlite::Row<'_>) -> rusqlite::Result<CoreMemory> {
    Ok(CoreMemory {
        mode_id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        detail: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_curated(row: &rusqlite::Row<'_>) -> rusqlite::Result<CuratedMemory> {
    Ok(CuratedMemory {
        mode_id: row.get(0)?,
        memory_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        detail: row.get(4)?,
        is_deleted: row.get::<_, i64>(5)? != 0,
        updated_at: row.get(6)?,
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEvent> {
    let event_type_str: String = row.get(3)?;
    Ok(MemoryEvent {
        id: row.get(0)?,
        mode_id: row.get(1)?,
        rev: row.get(2)?,
        event_type: event_type_str.parse().unwrap_or(MemoryEventType::CoreUpsert),
        memory_id: row.get(4)?,
        payload_json: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_prepare_turn(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrepareTurn> {
    let mode_str: String = row.get(5)?;
    let mode = match mode_str.as_str() {
        "full" => PrepareMode::Full,
        "delta" => PrepareMode::Delta,
        _ => PrepareMode::None,
    };
    let ack_status_str: Option<String> = row.get(8)?;
    let ack_status = ack_status_str.map(|s| match s.as_str() {
        "success" => AckStatus::Success,
        _ => AckStatus::Failed,
    });
    Ok(PrepareTurn {
        prepare_id: row.get(0)?,
        session_key: row.get(1)?,
        mode_id: row.get(2)?,
        from_revision: row.get(3)?,
        to_revision: row.get(4)?,
        mode,
        created_at: row.get(6)?,
        acked_at: row.get(7)?,
        ack_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(mode_id: &str) -> ModeStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_mode_db(&conn).unwrap();
        ModeStore::new(mode_id, conn)
    }

    #[test]
    fn upsert_core_bumps_revision_and_logs_event() {
        let s = store("m1");
        assert_eq!(s.get_current_revision().unwrap(), 0);
        let rev = s.upsert_core("N", "D", "T").unwrap();
        assert_eq!(rev, 1);
        assert_eq!(s.get_current_revision().unwrap(), 1);
        let events = s.list_memory_events_in_range(0, 1).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, MemoryEventType::CoreUpsert);
    }

    #[test]
    fn soft_delete_then_list_excludes_it() {
        let s = store("m1");
        s.upsert_curated("c1", "N", "D", "T").unwrap();
        s.soft_delete_curated("c1").unwrap();
        assert!(s.list_curated().unwrap().is_empty());
        let row = s.get_curated("c1").unwrap().unwrap();
        assert!(row.is_deleted);
    }

    #[test]
    fn ack_is_idempotent() {
        let s = store("m1");
        s.upsert_core("N", "D", "T").unwrap();
        let prepare_id = s.create_prepare_turn("sk1", 0, 1, PrepareMode::Full).unwrap();
        assert!(s.ack_prepare_turn(&prepare_id, AckStatus::Success).unwrap());
        assert_eq!(s.get_last_acked_revision("sk1").unwrap(), 1);
        assert!(!s.ack_prepare_turn(&prepare_id, AckStatus::Success).unwrap());
        assert_eq!(s.get_last_acked_revision("sk1").unwrap(), 1);
    }

    #[test]
    fn failed_ack_does_not_advance_last_acked() {
        let s = store("m1");
        s.upsert_core("N", "D", "T").unwrap();
        let prepare_id = s.create_prepare_turn("sk1", 0, 1, PrepareMode::Full).unwrap();
        s.ack_prepare_turn(&prepare_id, AckStatus::Failed).unwrap();
        assert_eq!(s.get_last_acked_revision("sk1").unwrap(), 0);
    }

    #[test]
    fn field_too_long_is_rejected() {
        let s = store("m1");
        let too_long = "x".repeat(crate::types::CURATED_DESCRIPTION_MAX + 1);
        let err = s.upsert_curated("c1", "N", &too_long, "T").unwrap_err();
        assert!(matches!(err, MemoryError::FieldTooLong { .. }));
    }
}
