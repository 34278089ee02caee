use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::reference::Reference;
use crate::error::CoreError;

/// A single message in a persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub text: String,
    pub role: ChatRole,
    pub timestamp: jiff::Timestamp,
    /// Dify's message id, present on assistant messages that came from the API.
    pub remote_message_id: Option<String>,
    pub references: Option<Vec<Reference>>,
    pub conversation_id: Option<String>,
}

impl ChatMessage {
    pub fn is_user(&self) -> bool {
        self.role == ChatRole::User
    }
}

/// A message that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub text: String,
    pub role: ChatRole,
    pub conversation_id: Option<String>,
    pub remote_message_id: Option<String>,
    pub references: Option<Vec<Reference>>,
}

impl NewMessage {
    pub fn user(conversation_id: &str, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: ChatRole::User,
            conversation_id: Some(conversation_id.to_string()),
            remote_message_id: None,
            references: None,
        }
    }

    pub fn assistant(conversation_id: &str, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: ChatRole::Assistant,
            conversation_id: Some(conversation_id.to_string()),
            remote_message_id: None,
            references: None,
        }
    }

    pub fn with_remote_id(mut self, remote_message_id: Option<String>) -> Self {
        self.remote_message_id = remote_message_id;
        self
    }

    /// Attach references. An empty list is stored as no references.
    pub fn with_references(mut self, references: Vec<Reference>) -> Self {
        self.references = if references.is_empty() {
            None
        } else {
            Some(references)
        };
        self
    }
}

/// Who sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ChatRole::User),
            "assistant" => Ok(ChatRole::Assistant),
            other => Err(CoreError::InvalidRole(other.to_string())),
        }
    }
}
