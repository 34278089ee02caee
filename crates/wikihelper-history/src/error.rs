use thiserror::Error;
use wikihelper_core::error::CoreError;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("message not found: {id}")]
    MessageNotFound { id: i64 },

    #[error("database schema version {found} is newer than this build supports ({supported})")]
    SchemaTooNew { found: u32, supported: u32 },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}
