use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid message role: {0}")]
    InvalidRole(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[from] jiff::Error),
}
