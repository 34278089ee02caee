use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title given to conversations the user did not name.
pub const DEFAULT_TITLE: &str = "New conversation";

/// A persisted thread of chat messages.
///
/// `id` is local to this machine. Dify assigns its own identifier on the
/// first answer; that one is kept in `remote_conversation_id` and sent back
/// on follow-up questions so the service keeps its context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub last_message: Option<String>,
    pub remote_conversation_id: Option<String>,
    pub created_at: jiff::Timestamp,
    pub updated_at: jiff::Timestamp,
}

impl Conversation {
    /// A fresh conversation with a random UUID v4 id.
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        let title = if title.trim().is_empty() {
            DEFAULT_TITLE.to_string()
        } else {
            title
        };
        let now = jiff::Timestamp::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            last_message: None,
            remote_conversation_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// One-line preview of the last message, cut to `max_chars` characters.
    pub fn preview(&self, max_chars: usize) -> String {
        let Some(last) = self.last_message.as_deref() else {
            return String::new();
        };
        let line = last.lines().next().unwrap_or_default();
        if line.chars().count() <= max_chars {
            line.to_string()
        } else {
            let cut: String = line.chars().take(max_chars).collect();
            format!("{cut}…")
        }
    }
}
