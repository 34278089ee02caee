//! Request and response bodies of the Dify API, as they travel on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use wikihelper_core::models::null_as_default;
use wikihelper_core::models::reference::Reference;
use wikihelper_core::models::token_count::TokenUsage;

/// User id sent when the caller does not configure one.
pub const DEFAULT_USER: &str = "wiki_chat_app";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Blocking,
    #[default]
    Streaming,
}

/// Body of `POST chat-messages`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub inputs: BTreeMap<String, String>,
    pub query: String,
    pub user: String,
    pub response_mode: ResponseMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileInput>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            inputs: BTreeMap::new(),
            query: query.into(),
            user: user.into(),
            response_mode: ResponseMode::Streaming,
            conversation_id: None,
            files: Vec::new(),
        }
    }

    /// Continue a remote conversation. Blank ids are treated as absent;
    /// the API rejects an empty `conversation_id`.
    pub fn with_conversation(mut self, conversation_id: Option<&str>) -> Self {
        self.conversation_id = conversation_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        self
    }

    pub fn with_files(mut self, files: Vec<FileInput>) -> Self {
        self.files = files;
        self
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }
}

/// A file attached to a chat request by URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub transfer_method: String,
    pub url: String,
}

impl FileInput {
    pub fn remote_image(url: impl Into<String>) -> Self {
        Self {
            kind: "image".to_string(),
            transfer_method: "remote_url".to_string(),
            url: url.into(),
        }
    }
}

/// Body of `POST completion-messages`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub inputs: BTreeMap<String, String>,
    pub user: String,
    pub response_mode: ResponseMode,
}

/// Answer returned by both endpoints in blocking mode.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub retriever_resources: Vec<Reference>,
}

impl Metadata {
    /// Decode `usage` and each resource on its own, so one malformed entry
    /// drops only itself.
    pub fn from_value_lossy(value: &Value) -> Self {
        let usage = match value.get("usage") {
            None | Some(Value::Null) => None,
            Some(raw) => TokenUsage::deserialize(raw)
                .inspect_err(|e| warn!(error = %e, "ignoring malformed token usage"))
                .ok(),
        };

        let retriever_resources = match value.get("retriever_resources") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| {
                    Reference::deserialize(item)
                        .inspect_err(|e| warn!(error = %e, "ignoring malformed retriever resource"))
                        .ok()
                })
                .collect(),
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                warn!(value = %other, "ignoring non-list retriever_resources");
                Vec::new()
            }
        };

        Self {
            usage,
            retriever_resources,
        }
    }
}

/// Error body returned on non-2xx responses and carried by `error` events.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<u16>,
}
