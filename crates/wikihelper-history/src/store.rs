use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};
use wikihelper_core::error::CoreError;
use wikihelper_core::models::conversation::Conversation;
use wikihelper_core::models::message::{ChatMessage, NewMessage};
use wikihelper_core::models::reference::Reference;

use crate::error::HistoryError;
use crate::schema;

const CONVERSATION_COLUMNS: &str =
    "id, title, last_message, remote_conversation_id, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, text, role, timestamp, remote_message_id, references_json, conversation_id";

/// Conversations and messages kept in a single SQLite database.
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened history database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, HistoryError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrate(&mut conn)?;
        Ok(Self { conn })
    }

    // ── Conversations ────────────────────────────────────────────────────────

    pub fn create_conversation(&self, title: &str) -> Result<Conversation, HistoryError> {
        let conversation = Conversation::new(title);
        self.conn.execute(
            &format!("INSERT INTO conversations ({CONVERSATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                conversation.id,
                conversation.title,
                conversation.last_message,
                conversation.remote_conversation_id,
                conversation.created_at.as_millisecond(),
                conversation.updated_at.as_millisecond(),
            ],
        )?;
        debug!(id = %conversation.id, title = %conversation.title, "created conversation");
        Ok(conversation)
    }

    /// All conversations, most recently updated first.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>, HistoryError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             ORDER BY updated_at DESC, created_at DESC, rowid DESC"
        ))?;
        let rows = stmt
            .query_map([], ConversationRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ConversationRow::into_conversation).collect()
    }

    /// The most recently updated conversation, if any.
    pub fn latest_conversation(&self) -> Result<Option<Conversation>, HistoryError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     ORDER BY updated_at DESC, created_at DESC, rowid DESC LIMIT 1"
                ),
                [],
                ConversationRow::read,
            )
            .optional()?;
        row.map(ConversationRow::into_conversation).transpose()
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, HistoryError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id],
                ConversationRow::read,
            )
            .optional()?;
        row.map(ConversationRow::into_conversation).transpose()
    }

    pub fn rename_conversation(&self, id: &str, title: &str) -> Result<(), HistoryError> {
        let changed = self.conn.execute(
            "UPDATE conversations SET title = ?2 WHERE id = ?1",
            params![id, title],
        )?;
        require_conversation(changed, id)
    }

    /// Remember the service-side id of a conversation.
    pub fn set_remote_conversation_id(
        &self,
        id: &str,
        remote_conversation_id: &str,
    ) -> Result<(), HistoryError> {
        let changed = self.conn.execute(
            "UPDATE conversations SET remote_conversation_id = ?2 WHERE id = ?1",
            params![id, remote_conversation_id],
        )?;
        require_conversation(changed, id)
    }

    /// Delete a conversation and all of its messages. Returns the number of
    /// messages removed.
    pub fn delete_conversation(&mut self, id: &str) -> Result<usize, HistoryError> {
        let tx = self.conn.transaction()?;
        let messages = tx.execute(
            "DELETE FROM chat_messages WHERE conversation_id = ?1",
            params![id],
        )?;
        let changed = tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        require_conversation(changed, id)?;
        tx.commit()?;

        info!(id, messages, "deleted conversation");
        Ok(messages)
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Messages of a conversation, oldest first.
    pub fn messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, HistoryError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages
             WHERE conversation_id = ?1
             ORDER BY timestamp ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![conversation_id], MessageRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Store a message and return its id.
    ///
    /// When the message belongs to a conversation, that conversation's last
    /// message and update time follow it.
    pub fn append_message(&mut self, message: &NewMessage) -> Result<i64, HistoryError> {
        let timestamp = jiff::Timestamp::now().as_millisecond();
        let references = message
            .references
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let tx = self.conn.transaction()?;
        if let Some(conversation_id) = &message.conversation_id {
            let changed = tx.execute(
                "UPDATE conversations SET last_message = ?2, updated_at = ?3 WHERE id = ?1",
                params![conversation_id, message.text, timestamp],
            )?;
            require_conversation(changed, conversation_id)?;
        }
        tx.execute(
            "INSERT INTO chat_messages
                 (text, role, timestamp, remote_message_id, references_json, conversation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.text,
                message.role.as_str(),
                timestamp,
                message.remote_message_id,
                references,
                message.conversation_id,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(
            id,
            role = %message.role,
            conversation_id = message.conversation_id.as_deref().unwrap_or(""),
            "stored message"
        );
        Ok(id)
    }

    pub fn delete_message(&self, id: i64) -> Result<(), HistoryError> {
        let changed = self
            .conn
            .execute("DELETE FROM chat_messages WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(HistoryError::MessageNotFound { id });
        }
        Ok(())
    }
}

fn require_conversation(changed: usize, id: &str) -> Result<(), HistoryError> {
    if changed == 0 {
        Err(HistoryError::ConversationNotFound { id: id.to_string() })
    } else {
        Ok(())
    }
}

fn timestamp(millis: i64) -> Result<jiff::Timestamp, HistoryError> {
    jiff::Timestamp::from_millisecond(millis).map_err(|e| HistoryError::Core(CoreError::from(e)))
}

// ── Rows ─────────────────────────────────────────────────────────────────────

struct ConversationRow {
    id: String,
    title: String,
    last_message: Option<String>,
    remote_conversation_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl ConversationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            last_message: row.get(2)?,
            remote_conversation_id: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, HistoryError> {
        Ok(Conversation {
            id: self.id,
            title: self.title,
            last_message: self.last_message,
            remote_conversation_id: self.remote_conversation_id,
            created_at: timestamp(self.created_at)?,
            updated_at: timestamp(self.updated_at)?,
        })
    }
}

struct MessageRow {
    id: i64,
    text: String,
    role: String,
    timestamp: i64,
    remote_message_id: Option<String>,
    references_json: Option<String>,
    conversation_id: Option<String>,
}

impl MessageRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            text: row.get(1)?,
            role: row.get(2)?,
            timestamp: row.get(3)?,
            remote_message_id: row.get(4)?,
            references_json: row.get(5)?,
            conversation_id: row.get(6)?,
        })
    }

    fn into_message(self) -> Result<ChatMessage, HistoryError> {
        let references = self
            .references_json
            .as_deref()
            .map(serde_json::from_str::<Vec<Reference>>)
            .transpose()?;
        Ok(ChatMessage {
            id: self.id,
            text: self.text,
            role: self.role.parse()?,
            timestamp: timestamp(self.timestamp)?,
            remote_message_id: self.remote_message_id,
            references,
            conversation_id: self.conversation_id,
        })
    }
}
