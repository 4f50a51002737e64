use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Initialise the session-store schema, migrating a pre-`engine`-column
/// layout in place if one is found.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout, and the
/// migration step is itself idempotent (it only runs when the `engine`
/// column is missing).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            user_id                  TEXT NOT NULL,
            context_id                TEXT NOT NULL,
            engine                    TEXT NOT NULL,
            session_id                TEXT,
            created_at                TEXT NOT NULL,
            last_used_at              TEXT NOT NULL,
            message_count             INTEGER NOT NULL DEFAULT 0,
            cumulative_context_tokens INTEGER NOT NULL DEFAULT 0,
            context_window            INTEGER,
            PRIMARY KEY (user_id, context_id, engine)
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user_context
            ON sessions(user_id, context_id);

        CREATE TABLE IF NOT EXISTS processed_message_events (
            message_id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_processed_events_created
            ON processed_message_events(created_at);

        CREATE TABLE IF NOT EXISTS rotation_summaries (
            user_id                    TEXT NOT NULL,
            context_id                  TEXT NOT NULL,
            engine                      TEXT NOT NULL,
            summary_text                TEXT NOT NULL,
            source_session_id           TEXT NOT NULL,
            context_tokens_at_rotation  INTEGER NOT NULL,
            created_at                  TEXT NOT NULL,
            PRIMARY KEY (user_id, context_id, engine)
        );",
    )?;

    migrate_legacy_schema(conn)?;

    Ok(())
}

/// Pre-engine-column deployments keyed `sessions` by `(user_id, context_id)`
/// alone. Detect that shape via `PRAGMA table_info` and rebuild the table in
/// place, defaulting every existing row to `engine = 'primary'`.
fn migrate_legacy_schema(conn: &Connection) -> Result<()> {
    let has_engine_column: bool = conn
        .prepare("SELECT 1 FROM pragma_table_info('sessions') WHERE name = 'engine'")?
        .exists([])?;

    if has_engine_column {
        return Ok(());
    }

    info!("migrating legacy sessions schema: adding engine column");

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "ALTER TABLE sessions RENAME TO sessions_legacy;

         CREATE TABLE sessions (
            user_id                  TEXT NOT NULL,
            context_id                TEXT NOT NULL,
            engine                    TEXT NOT NULL,
            session_id                TEXT,
            created_at                TEXT NOT NULL,
            last_used_at              TEXT NOT NULL,
            message_count             INTEGER NOT NULL DEFAULT 0,
            cumulative_context_tokens INTEGER NOT NULL DEFAULT 0,
            context_window            INTEGER,
            PRIMARY KEY (user_id, context_id, engine)
         );

         INSERT INTO sessions
             (user_id, context_id, engine, session_id, created_at, last_used_at,
              message_count, cumulative_context_tokens, context_window)
         SELECT user_id, context_id, 'primary', session_id, created_at, last_used_at,
                message_count, cumulative_context_tokens, context_window
         FROM sessions_legacy;

         DROP TABLE sessions_legacy;

         CREATE INDEX IF NOT EXISTS idx_sessions_user_context
             ON sessions(user_id, context_id);",
    )?;
    tx.commit()?;

    Ok(())
}
