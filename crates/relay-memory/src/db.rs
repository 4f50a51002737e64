use rusqlite::Connection;

use crate::error::Result;

/// Initialise the per-mode primary schema (core/curated/revision/events,
/// session sync, prepare-turn log). Safe to call on every open.
pub fn init_mode_db(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS core_memory (
            mode_id     TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            description TEXT NOT NULL,
            detail      TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS curated_memory (
            mode_id     TEXT NOT NULL,
            memory_id   TEXT NOT NULL,
            name        TEXT NOT NULL,
            description TEXT NOT NULL,
            detail      TEXT NOT NULL,
            is_deleted  INTEGER NOT NULL DEFAULT 0,
            updated_at  TEXT NOT NULL,
            PRIMARY KEY (mode_id, memory_id)
        );
        CREATE INDEX IF NOT EXISTS idx_curated_mode
            ON curated_memory(mode_id, is_deleted);

        CREATE TABLE IF NOT EXISTS revision (
            mode_id     TEXT PRIMARY KEY,
            current_rev INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS memory_event (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            mode_id      TEXT NOT NULL,
            rev          INTEGER NOT NULL,
            event_type   TEXT NOT NULL,
            memory_id    TEXT,
            payload_json TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memory_event_mode_rev
            ON memory_event(mode_id, rev, id);

        CREATE TABLE IF NOT EXISTS session_sync (
            session_key    TEXT PRIMARY KEY,
            mode_id        TEXT NOT NULL,
            last_acked_rev INTEGER NOT NULL DEFAULT 0,
            updated_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS prepare_turn (
            prepare_id     TEXT PRIMARY KEY,
            session_key    TEXT NOT NULL,
            mode_id        TEXT NOT NULL,
            from_revision  INTEGER NOT NULL,
            to_revision    INTEGER NOT NULL,
            mode           TEXT NOT NULL,
            created_at     TEXT NOT NULL,
            acked_at       TEXT,
            ack_status     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_prepare_turn_session
            ON prepare_turn(session_key);",
    )?;

    migrate_legacy_agent_id_column(conn)?;

    Ok(())
}

/// A previous deployment named the namespace column `agent_id`; rename it to
/// `mode_id` in place. Only runs when the legacy column is present.
fn migrate_legacy_agent_id_column(conn: &Connection) -> Result<()> {
    let has_legacy_column: bool = conn
        .prepare("SELECT 1 FROM pragma_table_info('core_memory') WHERE name = 'agent_id'")?
        .exists([])?;

    if !has_legacy_column {
        return Ok(());
    }

    conn.execute_batch(
        "ALTER TABLE core_memory RENAME COLUMN agent_id TO mode_id;
         ALTER TABLE curated_memory RENAME COLUMN agent_id TO mode_id;
         ALTER TABLE revision RENAME COLUMN agent_id TO mode_id;
         ALTER TABLE memory_event RENAME COLUMN agent_id TO mode_id;",
    )?;
    Ok(())
}

/// Initialise the per-mode archival (vector) schema.
pub fn init_archival_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS archival_memory (
            memory_id      TEXT PRIMARY KEY,
            mode_id        TEXT NOT NULL,
            name           TEXT NOT NULL,
            description    TEXT NOT NULL,
            detail         TEXT NOT NULL,
            embedding      BLOB NOT NULL,
            embedding_dim  INTEGER NOT NULL,
            embedding_norm REAL NOT NULL,
            metadata_json  TEXT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_archival_mode_dim_updated
            ON archival_memory(mode_id, embedding_dim, updated_at DESC);",
    )?;
    Ok(())
}
