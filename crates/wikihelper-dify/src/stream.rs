//! Decoding of streamed chat answers.
//!
//! # Wire format
//!
//! With `response_mode = "streaming"` the API answers with a
//! Server-Sent-Events style body: one record per line, each record a
//! `data: ` prefix followed by a JSON object.
//!
//! ```text
//! data: {"event": "message", "answer": "Hel", "conversation_id": "c1", ...}
//!
//! data: {"event": "message", "answer": "lo", "conversation_id": "c1", ...}
//!
//! data: {"event": "message_end", "conversation_id": "c1", "metadata": {...}}
//! ```
//!
//! Blank lines separate records and double as keep-alives. Some gateways
//! close the stream with a literal `data: [DONE]` line instead of (or after)
//! `message_end`. Network chunks do not line up with records, so bytes are
//! buffered until a full line is available.
//!
//! # Events
//!
//! | event               | meaning                                      |
//! |---------------------|----------------------------------------------|
//! | `message`           | next chunk of the answer                     |
//! | `agent_message`     | next chunk, agent applications               |
//! | `message_delta`     | next chunk, older gateways                   |
//! | `message_replace`   | full replacement of the answer so far        |
//! | `message_end`       | answer complete; carries ids and metadata    |
//! | `agent_message_end` | same, agent applications                     |
//! | `error`             | the service failed mid-answer                |
//!
//! Anything else (`workflow_started`, `node_finished`, `ping`, ...) is
//! passed through as [`EventKind::Other`] and does not touch the answer.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};
use wikihelper_core::models::reference::Reference;
use wikihelper_core::models::token_count::TokenUsage;

use crate::error::DifyError;
use crate::wire::{ErrorResponse, Metadata};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Events of a decoded chat stream, ending after the terminal event.
pub type EventStream = BoxStream<'static, Result<StreamEvent, DifyError>>;

// ── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Message,
    AgentMessage,
    MessageDelta,
    MessageReplace,
    MessageEnd,
    AgentMessageEnd,
    Error,
    Other(String),
}

impl EventKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "message" => EventKind::Message,
            "agent_message" => EventKind::AgentMessage,
            "message_delta" => EventKind::MessageDelta,
            "message_replace" => EventKind::MessageReplace,
            "message_end" => EventKind::MessageEnd,
            "agent_message_end" => EventKind::AgentMessageEnd,
            "error" => EventKind::Error,
            other => EventKind::Other(other.to_string()),
        }
    }

    /// Whether this event appends a chunk to the answer.
    pub fn is_chunk(&self) -> bool {
        matches!(
            self,
            EventKind::Message | EventKind::AgentMessage | EventKind::MessageDelta
        )
    }

    /// Whether the answer is complete after this event.
    pub fn is_end(&self) -> bool {
        matches!(self, EventKind::MessageEnd | EventKind::AgentMessageEnd)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Message => "message",
            EventKind::AgentMessage => "agent_message",
            EventKind::MessageDelta => "message_delta",
            EventKind::MessageReplace => "message_replace",
            EventKind::MessageEnd => "message_end",
            EventKind::AgentMessageEnd => "agent_message_end",
            EventKind::Error => "error",
            EventKind::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// One decoded `data:` record.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub kind: EventKind,
    /// Text carried by the record, read from `answer`, `delta` or `content`
    /// (first present wins).
    pub answer: Option<String>,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub task_id: Option<String>,
    pub created_at: Option<i64>,
    pub metadata: Option<Metadata>,
    /// Set on `error` events.
    pub error: Option<ErrorResponse>,
}

impl StreamEvent {
    /// Decode the JSON payload of a `data:` line.
    pub fn from_json(payload: &str) -> Result<Self, DifyError> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| DifyError::StreamParse(format!("{e}: {payload}")))?;
        let object = value.as_object().ok_or_else(|| {
            DifyError::StreamParse(format!("expected a JSON object, got: {payload}"))
        })?;

        let kind = EventKind::parse(object.get("event").and_then(Value::as_str).unwrap_or(""));

        let answer = ["answer", "delta", "content"]
            .iter()
            .find_map(|field| object.get(*field))
            .and_then(value_to_text);

        let metadata = match object.get("metadata") {
            Some(Value::Null) | None => None,
            Some(raw) if raw.is_object() => Some(Metadata::from_value_lossy(raw)),
            Some(raw) => {
                warn!(value = %raw, "ignoring non-object stream metadata");
                None
            }
        };

        let error = (kind == EventKind::Error).then(|| ErrorResponse {
            code: non_empty_str(object.get("code")).unwrap_or_default(),
            message: non_empty_str(object.get("message"))
                .or_else(|| answer.clone())
                .unwrap_or_default(),
            status: object
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok()),
        });

        Ok(StreamEvent {
            kind,
            answer,
            conversation_id: non_empty_str(object.get("conversation_id")),
            message_id: non_empty_str(object.get("message_id"))
                .or_else(|| non_empty_str(object.get("id"))),
            task_id: non_empty_str(object.get("task_id")),
            created_at: object.get("created_at").and_then(Value::as_i64),
            metadata,
            error,
        })
    }

    fn into_api_error(self) -> DifyError {
        let error = self.error.unwrap_or_default();
        DifyError::Api {
            status: error.status,
            code: if error.code.is_empty() {
                "stream_error".to_string()
            } else {
                error.code
            },
            message: error.message,
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Text of a scalar JSON field. Numbers and booleans are rendered; `null`,
/// arrays and objects carry no text.
fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ── Lines ────────────────────────────────────────────────────────────────────

/// What a single body line means.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Blank line or empty `data:` record.
    Heartbeat,
    /// `data: [DONE]`.
    Done,
    Event(StreamEvent),
    /// `event:`, `id:`, `retry:`, `:` comments and anything unrecognized.
    Ignored,
}

/// Classify one line of the response body.
pub fn parse_line(line: &str) -> Result<Frame, DifyError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return Ok(Frame::Heartbeat);
    }

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        debug!(line, "skipping non-data line");
        return Ok(Frame::Ignored);
    };

    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Ok(Frame::Done);
    }
    if payload.is_empty() {
        return Ok(Frame::Heartbeat);
    }

    StreamEvent::from_json(payload).map(Frame::Event)
}

/// Splits a byte stream into lines.
///
/// Bytes are buffered until a `\n` arrives, so records and multi-byte
/// characters cut by chunk boundaries come out whole.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already searched for a newline.
    scanned: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut cursor = self.scanned;
        while let Some(offset) = self.buf[cursor..].iter().position(|b| *b == b'\n') {
            let end = cursor + offset;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
            cursor = start;
        }

        self.buf.drain(..start);
        self.scanned = self.buf.len();
        lines
    }

    /// The final line when the body did not end with a newline.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.buf.is_empty() {
            return None;
        }
        let line = decode_line(&self.buf);
        self.buf.clear();
        Some(line)
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

// ── Stream ───────────────────────────────────────────────────────────────────

struct DecodeState<S> {
    body: Pin<Box<S>>,
    lines: LineDecoder,
    pending: VecDeque<String>,
    body_ended: bool,
    finished: bool,
}

/// Turn a streamed response body into chat events.
///
/// The returned stream ends after `message_end` / `agent_message_end`, on
/// `data: [DONE]`, or when the body ends. An `error` event, a malformed
/// record or a transport failure is yielded as an `Err` and ends the stream.
pub fn decode_events<S, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        lines: LineDecoder::new(),
        pending: VecDeque::new(),
        body_ended: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(line) = state.pending.pop_front() {
                match parse_line(&line) {
                    Ok(Frame::Heartbeat) | Ok(Frame::Ignored) => continue,
                    Ok(Frame::Done) => {
                        debug!("stream completed with [DONE]");
                        return None;
                    }
                    Ok(Frame::Event(event)) => {
                        if event.kind == EventKind::Error {
                            state.finished = true;
                            let error = event.into_api_error();
                            warn!(error = %error, "error event in stream");
                            return Some((Err(error), state));
                        }
                        if event.kind.is_end() {
                            debug!(event = %event.kind, "stream ended");
                            state.finished = true;
                        }
                        return Some((Ok(event), state));
                    }
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }

            if state.body_ended {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let lines = state.lines.push(&chunk);
                    state.pending.extend(lines);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(DifyError::Transport(e.to_string())), state));
                }
                None => {
                    state.body_ended = true;
                    if let Some(rest) = state.lines.finish() {
                        state.pending.push_back(rest);
                    }
                }
            }
        }
    })
    .boxed()
}

// ── Answer assembly ──────────────────────────────────────────────────────────

/// A complete streamed answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Answer {
    pub text: String,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub references: Vec<Reference>,
    pub usage: Option<TokenUsage>,
}

/// Folds stream events into the running answer.
#[derive(Debug, Default)]
pub struct AnswerAssembler {
    answer: Answer,
    finished: bool,
}

impl AnswerAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event. Returns the text it added to the answer, if any.
    pub fn apply(&mut self, event: &StreamEvent) -> Option<String> {
        if let Some(id) = &event.conversation_id {
            self.answer.conversation_id = Some(id.clone());
        }
        if let Some(id) = &event.message_id {
            self.answer.message_id = Some(id.clone());
        }

        match &event.kind {
            kind if kind.is_chunk() => {
                let chunk = event.answer.as_deref().filter(|c| !c.is_empty())?;
                self.answer.text.push_str(chunk);
                Some(chunk.to_string())
            }
            EventKind::MessageReplace => {
                self.answer.text = event.answer.clone().unwrap_or_default();
                None
            }
            kind if kind.is_end() => {
                if let Some(metadata) = &event.metadata {
                    self.answer.references = metadata.retriever_resources.clone();
                    self.answer.usage = metadata.usage;
                }
                self.finished = true;
                None
            }
            _ => None,
        }
    }

    pub fn text(&self) -> &str {
        &self.answer.text
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.answer.conversation_id.as_deref()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.answer.message_id.as_deref()
    }

    pub fn references(&self) -> &[Reference] {
        &self.answer.references
    }

    pub fn usage(&self) -> Option<TokenUsage> {
        self.answer.usage
    }

    /// Whether a `message_end` has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_answer(self) -> Answer {
        self.answer
    }
}
