//! HTTP client for the Dify chat API.
//!
//! Every request is a JSON `POST` relative to the configured base URL
//! (which normally ends in `/v1/`), authorized with the application's API
//! key as a bearer token:
//!
//! ```text
//! POST {base_url}chat-messages        blocking or streaming chat
//! POST {base_url}completion-messages  one-shot text completion
//! Authorization: Bearer app-xxxxxxxx
//! ```
//!
//! Failed requests come back with a non-2xx status and an `ErrorResponse`
//! body (`{"code": "...", "message": "...", "status": 400}`), which is
//! surfaced as [`DifyError::Api`].

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Response, StatusCode, Url};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;
use crate::error::DifyError;
use crate::stream::{self, EventStream};
use crate::wire::{
    ChatRequest, ChatResponse, CompletionRequest, DEFAULT_USER, ErrorResponse, FileInput,
    ResponseMode,
};

pub const DEFAULT_BASE_URL: &str = "http://123.60.144.244/v1/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const CHAT_MESSAGES: &str = "chat-messages";
const COMPLETION_MESSAGES: &str = "completion-messages";

/// Connection settings for [`DifyClient`].
#[derive(Debug, Clone)]
pub struct DifyConfig {
    pub base_url: String,
    pub api_key: String,
    pub user: String,
    /// Connect timeout, and total timeout for blocking calls. Streaming
    /// bodies are read until the service closes them.
    pub timeout: Duration,
}

impl DifyConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            user: DEFAULT_USER.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct DifyClient {
    http: reqwest::Client,
    base_url: Url,
    authorization: String,
    user: String,
    timeout: Duration,
}

impl DifyClient {
    pub fn new(config: DifyConfig) -> Result<Self, DifyError> {
        if config.api_key.trim().is_empty() {
            return Err(DifyError::Config("API key is empty".to_string()));
        }

        let base_url = parse_base_url(&config.base_url)?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url,
            authorization: authorization_header(&config.api_key),
            user: config.user,
            timeout: config.timeout,
        })
    }

    /// A streaming chat request attributed to this client's user.
    pub fn chat_request(&self, query: impl Into<String>) -> ChatRequest {
        ChatRequest::new(query, self.user.clone())
    }

    /// Ask a question and wait for the whole answer.
    pub async fn send_chat_message(
        &self,
        query: &str,
        conversation_id: Option<&str>,
        files: Vec<FileInput>,
    ) -> Result<ChatResponse, DifyError> {
        let request = self
            .chat_request(query)
            .with_conversation(conversation_id)
            .with_files(files)
            .with_mode(ResponseMode::Blocking);

        let response = self.post(CHAT_MESSAGES, &request, false).await?;
        let body: ChatResponse = response.json().await?;

        info!(
            conversation_id = body.conversation_id.as_deref().unwrap_or(""),
            answer_len = body.answer.len(),
            "chat message answered"
        );
        Ok(body)
    }

    /// Run a completion application with the given input variables.
    pub async fn send_completion_message(
        &self,
        inputs: BTreeMap<String, String>,
    ) -> Result<ChatResponse, DifyError> {
        let request = CompletionRequest {
            inputs,
            user: self.user.clone(),
            response_mode: ResponseMode::Blocking,
        };

        let response = self.post(COMPLETION_MESSAGES, &request, false).await?;
        let body: ChatResponse = response.json().await?;

        info!(answer_len = body.answer.len(), "completion answered");
        Ok(body)
    }

    /// Ask a question and receive the answer as it is generated.
    pub async fn stream_chat_message(
        &self,
        query: &str,
        conversation_id: Option<&str>,
        files: Vec<FileInput>,
    ) -> Result<EventStream, DifyError> {
        let request = self
            .chat_request(query)
            .with_conversation(conversation_id)
            .with_files(files);
        self.open_chat_stream(request).await
    }

    async fn open_chat_stream(&self, request: ChatRequest) -> Result<EventStream, DifyError> {
        let request = request.with_mode(ResponseMode::Streaming);
        debug!(
            conversation_id = request.conversation_id.as_deref().unwrap_or(""),
            "opening chat stream"
        );
        let response = self.post(CHAT_MESSAGES, &request, true).await?;
        Ok(stream::decode_events(response.bytes_stream()))
    }

    async fn post<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        streaming: bool,
    ) -> Result<Response, DifyError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| DifyError::Config(format!("invalid endpoint {path}: {e}")))?;

        debug!(
            method = "POST",
            url = %url,
            authorization = %mask_secret(&self.authorization),
            "sending request"
        );

        let mut request = self
            .http
            .post(url)
            .header(AUTHORIZATION, &self.authorization)
            .json(body);

        request = if streaming {
            request.header(ACCEPT, "text/event-stream")
        } else {
            request.timeout(self.timeout)
        };

        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), "response received");

        if status.is_success() {
            return Ok(response);
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(status = status.as_u16(), error = %e, "failed to read error body");
                String::new()
            }
        };
        let error = api_error(status, &text);
        warn!(status = status.as_u16(), error = %error, "request rejected");
        Err(error)
    }
}

impl ChatBackend for DifyClient {
    fn user(&self) -> &str {
        &self.user
    }

    async fn open_stream(&self, request: ChatRequest) -> Result<EventStream, DifyError> {
        self.open_chat_stream(request).await
    }
}

/// Parse the base URL, making sure it ends in `/` so endpoint paths are
/// appended rather than replacing the last segment.
fn parse_base_url(raw: &str) -> Result<Url, DifyError> {
    let raw = raw.trim();
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|e| DifyError::Config(format!("invalid base URL {raw}: {e}")))
}

/// `Bearer <key>`, unless the key already carries the scheme.
pub fn authorization_header(api_key: &str) -> String {
    let key = api_key.trim();
    let has_scheme = key
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("bearer "));
    if has_scheme {
        key.to_string()
    } else {
        format!("Bearer {key}")
    }
}

/// Loggable form of a credential: a short prefix followed by `****`.
pub fn mask_secret(value: &str) -> String {
    let keep = if value.chars().count() > 20 { 20 } else { 10 };
    let prefix: String = value.chars().take(keep).collect();
    format!("{prefix}****")
}

fn api_error(status: StatusCode, body: &str) -> DifyError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) if !parsed.code.is_empty() || !parsed.message.is_empty() => DifyError::Api {
            status: parsed.status.or(Some(status.as_u16())),
            code: parsed.code,
            message: parsed.message,
        },
        _ => DifyError::Api {
            status: Some(status.as_u16()),
            code: status
                .canonical_reason()
                .unwrap_or("http_error")
                .to_string(),
            message: body.chars().take(200).collect(),
        },
    }
}
