use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use tracing::{instrument, warn};

use crate::error::{Result, SessionError};
use crate::types::{RotationSummary, Session, SessionKey};

/// Thread-safe manager for durable per-(user, context, engine) sessions.
///
/// Wraps a single SQLite connection in a `Mutex`. This is a single-process
/// target, so a connection pool would only add complexity for no benefit.
pub struct SessionStore {
    db: Mutex<Connection>,
}

impl SessionStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    pub fn get_session(&self, key: &SessionKey) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        let session_id: Option<Option<String>> = db
            .query_row(
                "SELECT session_id FROM sessions WHERE user_id = ?1 AND context_id = ?2 AND engine = ?3",
                rusqlite::params![key.user_id, key.context_id, key.engine],
                |row| row.get(0),
            )
            .optional()?;
        Ok(session_id.flatten())
    }

    #[instrument(skip(self), fields(key = %key))]
    pub fn save_session(&self, key: &SessionKey, session_id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sessions
                (user_id, context_id, engine, session_id, created_at, last_used_at, message_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)
             ON CONFLICT(user_id, context_id, engine) DO UPDATE SET
                session_id = excluded.session_id,
                last_used_at = excluded.last_used_at,
                message_count = message_count + 1",
            rusqlite::params![key.user_id, key.context_id, key.engine, session_id, now],
        )?;
        Ok(())
    }

    /// Bump `last_used_at` and `message_count` without changing `session_id`.
    #[instrument(skip(self), fields(key = %key))]
    pub fn touch_session(&self, key: &SessionKey) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE sessions SET last_used_at = ?1, message_count = message_count + 1
             WHERE user_id = ?2 AND context_id = ?3 AND engine = ?4",
            rusqlite::params![now, key.user_id, key.context_id, key.engine],
        )?;
        if rows_changed == 0 {
            return Err(SessionError::NotFound { key: key.format() });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    pub fn update_session_tokens(
        &self,
        key: &SessionKey,
        cumulative_context_tokens: u64,
        context_window: Option<u32>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE sessions SET cumulative_context_tokens = ?1, context_window = ?2
             WHERE user_id = ?3 AND context_id = ?4 AND engine = ?5",
            rusqlite::params![
                cumulative_context_tokens as i64,
                context_window,
                key.user_id,
                key.context_id,
                key.engine
            ],
        )?;
        if rows_changed == 0 {
            return Err(SessionError::NotFound { key: key.format() });
        }
        Ok(())
    }

    /// Delete the session for `(user, context, engine)`, or every engine's
    /// session for `(user, context)` when `engine` is `None`.
    #[instrument(skip(self), fields(user_id, context_id, engine))]
    pub fn delete_session(
        &self,
        user_id: &str,
        context_id: &str,
        engine: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        match engine {
            Some(engine) => {
                db.execute(
                    "DELETE FROM sessions WHERE user_id = ?1 AND context_id = ?2 AND engine = ?3",
                    rusqlite::params![user_id, context_id, engine],
                )?;
            }
            None => {
                db.execute(
                    "DELETE FROM sessions WHERE user_id = ?1 AND context_id = ?2",
                    rusqlite::params![user_id, context_id],
                )?;
            }
        }
        Ok(())
    }

    pub fn save_summary(&self, key: &SessionKey, summary: &RotationSummary) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO rotation_summaries
                (user_id, context_id, engine, summary_text, source_session_id,
                 context_tokens_at_rotation, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, context_id, engine) DO UPDATE SET
                summary_text = excluded.summary_text,
                source_session_id = excluded.source_session_id,
                context_tokens_at_rotation = excluded.context_tokens_at_rotation,
                created_at = excluded.created_at",
            rusqlite::params![
                key.user_id,
                key.context_id,
                key.engine,
                summary.summary_text,
                summary.source_session_id,
                summary.context_tokens_at_rotation as i64,
                summary.created_at,
            ],
        )?;
        Ok(())
    }

    /// Read and delete the pending rotation summary for this key, if any.
    pub fn consume_summary(&self, key: &SessionKey) -> Result<Option<RotationSummary>> {
        let db = self.db.lock().unwrap();
        let summary = db
            .query_row(
                "SELECT summary_text, source_session_id, context_tokens_at_rotation, created_at
                 FROM rotation_summaries
                 WHERE user_id = ?1 AND context_id = ?2 AND engine = ?3",
                rusqlite::params![key.user_id, key.context_id, key.engine],
                |row| {
                    Ok(RotationSummary {
                        summary_text: row.get(0)?,
                        source_session_id: row.get(1)?,
                        context_tokens_at_rotation: row.get::<_, i64>(2)? as u64,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;

        if summary.is_some() {
            db.execute(
                "DELETE FROM rotation_summaries WHERE user_id = ?1 AND context_id = ?2 AND engine = ?3",
                rusqlite::params![key.user_id, key.context_id, key.engine],
            )?;
        }

        Ok(summary)
    }

    /// Atomically prune claims older than `window_ms` then insert this one
    /// if absent. Returns `true` iff this call performed the insert.
    ///
    /// On any storage error this fails open (returns `true`) rather than
    /// risk silently dropping a user prompt as a false duplicate.
    pub fn claim_message_event(&self, message_id: &str, window_ms: i64, now_ms: i64) -> bool {
        match self.try_claim_message_event(message_id, window_ms, now_ms) {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(error = %e, message_id, "claim_message_event failed, failing open");
                true
            }
        }
    }

    fn try_claim_message_event(&self, message_id: &str, window_ms: i64, now_ms: i64) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let tx = db.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM processed_message_events WHERE created_at < ?1",
            rusqlite::params![now_ms - window_ms],
        )?;
        let rows_changed = tx.execute(
            "INSERT OR IGNORE INTO processed_message_events (message_id, created_at) VALUES (?1, ?2)",
            rusqlite::params![message_id, now_ms],
        )?;
        tx.commit()?;
        Ok(rows_changed > 0)
    }

    pub fn list_sessions(&self, engine: Option<&str>) -> Result<Vec<Session>> {
        let db = self.db.lock().unwrap();
        let rows = match engine {
            Some(engine) => {
                let mut stmt = db.prepare(
                    "SELECT user_id, context_id, engine, session_id, created_at, last_used_at,
                            message_count, cumulative_context_tokens, context_window
                     FROM sessions WHERE engine = ?1 ORDER BY last_used_at DESC",
                )?;
                let rows = stmt.query_map(rusqlite::params![engine], row_to_session)?;
                rows.filter_map(|r| r.ok()).collect()
            }
            None => {
                let mut stmt = db.prepare(
                    "SELECT user_id, context_id, engine, session_id, created_at, last_used_at,
                            message_count, cumulative_context_tokens, context_window
                     FROM sessions ORDER BY last_used_at DESC",
                )?;
                let rows = stmt.query_map([], row_to_session)?;
                rows.filter_map(|r| r.ok()).collect()
            }
        };
        Ok(rows)
    }

    pub fn cleanup_old_sessions(&self, max_age_ms: i64) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::milliseconds(max_age_ms);
        let db = self.db.lock().unwrap();
        let deleted = db.execute(
            "DELETE FROM sessions WHERE last_used_at < ?1",
            rusqlite::params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        key: SessionKey {
            user_id: row.get(0)?,
            context_id: row.get(1)?,
            engine: row.get(2)?,
        },
        session_id: row.get(3)?,
        created_at: row.get(4)?,
        last_used_at: row.get(5)?,
        message_count: row.get::<_, i64>(6)? as u32,
        cumulative_context_tokens: row.get::<_, i64>(7)? as u64,
        context_window: row.get::<_, Option<i64>>(8)?.map(|v| v as u32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        SessionStore::new(conn)
    }

    #[test]
    fn save_then_get_roundtrips() {
        let store = store();
        let key = SessionKey::new("u1", "c1", "primary");
        assert_eq!(store.get_session(&key).unwrap(), None);
        store.save_session(&key, "sess-abc").unwrap();
        assert_eq!(store.get_session(&key).unwrap(), Some("sess-abc".to_string()));
    }

    #[test]
    fn touch_requires_existing_row() {
        let store = store();
        let key = SessionKey::new("u1", "c1", "primary");
        assert!(matches!(
            store.touch_session(&key),
            Err(SessionError::NotFound { .. })
        ));
        store.save_session(&key, "sess-abc").unwrap();
        store.touch_session(&key).unwrap();
    }

    #[test]
    fn claim_message_event_dedupes_within_window() {
        let store = store();
        assert!(store.claim_message_event("m1", 60_000, 1_000_000));
        assert!(!store.claim_message_event("m1", 60_000, 1_000_500));
        // outside the window, it can be claimed again
        assert!(store.claim_message_event("m1", 60_000, 1_100_000));
    }

    #[test]
    fn summary_save_then_consume_is_read_once() {
        let store = store();
        let key = SessionKey::new("u1", "c1", "primary");
        let summary = RotationSummary {
            summary_text: "summary".into(),
            source_session_id: "sess-old".into(),
            context_tokens_at_rotation: 1000,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        store.save_summary(&key, &summary).unwrap();
        let consumed = store.consume_summary(&key).unwrap();
        assert_eq!(consumed.unwrap().summary_text, "summary");
        assert!(store.consume_summary(&key).unwrap().is_none());
    }

    #[test]
    fn delete_session_scoped_to_engine_or_all() {
        let store = store();
        store
            .save_session(&SessionKey::new("u1", "c1", "primary"), "a")
            .unwrap();
        store
            .save_session(&SessionKey::new("u1", "c1", "secondary"), "b")
            .unwrap();
        store.delete_session("u1", "c1", Some("primary")).unwrap();
        assert_eq!(
            store.get_session(&SessionKey::new("u1", "c1", "primary")).unwrap(),
            None
        );
        assert!(store
            .get_session(&SessionKey::new("u1", "c1", "secondary"))
            .unwrap()
            .is_some());
        store.delete_session("u1", "c1", None).unwrap();
        assert!(store
            .get_session(&SessionKey::new("u1", "c1", "secondary"))
            .unwrap()
            .is_none());
    }
}
