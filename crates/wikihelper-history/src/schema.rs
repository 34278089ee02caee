//! Database schema and its migrations.
//!
//! The schema version lives in SQLite's `user_version` pragma. Each entry of
//! [`MIGRATIONS`] moves the database one version forward; a fresh database
//! runs all of them in order.

use rusqlite::Connection;
use tracing::info;

use crate::error::HistoryError;

const MIGRATIONS: &[&str] = &[
    // v1: conversations and their messages.
    "CREATE TABLE conversations (
         id                      TEXT PRIMARY KEY NOT NULL,
         title                   TEXT NOT NULL,
         last_message            TEXT,
         remote_conversation_id  TEXT,
         created_at              INTEGER NOT NULL,
         updated_at              INTEGER NOT NULL
     );
     CREATE TABLE chat_messages (
         id                 INTEGER PRIMARY KEY AUTOINCREMENT,
         text               TEXT NOT NULL,
         role               TEXT NOT NULL,
         timestamp          INTEGER NOT NULL,
         remote_message_id  TEXT,
         references_json    TEXT,
         conversation_id    TEXT REFERENCES conversations(id) ON DELETE CASCADE
     );
     CREATE INDEX idx_chat_messages_conversation
         ON chat_messages (conversation_id, timestamp);
     CREATE INDEX idx_conversations_updated
         ON conversations (updated_at DESC);",
];

/// Schema version this build writes.
pub fn current_version() -> u32 {
    MIGRATIONS.len() as u32
}

/// Bring the database up to [`current_version`].
pub fn migrate(conn: &mut Connection) -> Result<(), HistoryError> {
    let found: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let supported = current_version();
    if found > supported {
        return Err(HistoryError::SchemaTooNew { found, supported });
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        let version = index as u32 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!(version, "migrated history database");
    }

    Ok(())
}
