use rusqlite::Connection;

use crate::error::Result;

/// Initialise the conversation and message tables.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            address          TEXT PRIMARY KEY,
            thread_id        TEXT NOT NULL UNIQUE,
            action_type      TEXT NOT NULL DEFAULT 'chat',
            message_count    INTEGER NOT NULL DEFAULT 0,
            last_agent       TEXT,
            risk_level       TEXT,
            risk_score       REAL,
            external_user_id TEXT,
            last_activity_at TEXT NOT NULL,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS conversation_messages (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            address    TEXT NOT NULL,
            thread_id  TEXT NOT NULL,
            role       TEXT NOT NULL,
            content    TEXT NOT NULL,
            agent_id   TEXT,
            metadata   TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_address
            ON conversation_messages(address, id DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON conversation_messages(thread_id, id);",
    )?;
    Ok(())
}
