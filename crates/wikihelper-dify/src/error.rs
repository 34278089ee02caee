use thiserror::Error;

#[derive(Debug, Error)]
pub enum DifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stream connection error: {0}")]
    Transport(String),

    #[error("Dify API error ({code}): {message}")]
    Api {
        status: Option<u16>,
        code: String,
        message: String,
    },

    #[error("stream parsing failed: {0}")]
    StreamParse(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid client configuration: {0}")]
    Config(String),
}
