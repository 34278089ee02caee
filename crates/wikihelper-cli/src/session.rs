//! A chat session: the current conversation, its local history, and the
//! backend that answers questions.
//!
//! Every question is stored before it is sent, so a failed request still
//! leaves the question in the history. The answer is stored once the
//! stream completes; a partial answer from a failed stream is discarded.

use futures::StreamExt;
use thiserror::Error;
use tracing::{info, warn};
use wikihelper_core::models::conversation::{Conversation, DEFAULT_TITLE};
use wikihelper_core::models::message::{ChatMessage, NewMessage};
use wikihelper_core::models::reference::Reference;
use wikihelper_core::models::token_count::TokenUsage;
use wikihelper_dify::backend::ChatBackend;
use wikihelper_dify::error::DifyError;
use wikihelper_dify::stream::AnswerAssembler;
use wikihelper_dify::wire::ChatRequest;
use wikihelper_history::error::HistoryError;
use wikihelper_history::store::HistoryStore;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("question is empty")]
    EmptyQuery,

    #[error("the answer stream ended before any text arrived")]
    EmptyAnswer,

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Dify(#[from] DifyError),
}

/// A stored answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub conversation_id: String,
    pub message_id: i64,
    pub text: String,
    pub references: Vec<Reference>,
    pub usage: Option<TokenUsage>,
    /// Canned answer produced without a backend.
    pub demo: bool,
}

pub struct ChatSession<B> {
    store: HistoryStore,
    backend: Option<B>,
    current: Option<Conversation>,
}

impl<B: ChatBackend> ChatSession<B> {
    /// Without a backend, questions get canned demo answers.
    pub fn new(store: HistoryStore, backend: Option<B>) -> Self {
        Self {
            store,
            backend,
            current: None,
        }
    }

    pub fn is_demo(&self) -> bool {
        self.backend.is_none()
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.current.as_ref()
    }

    /// Resume the most recently updated conversation, if there is one.
    pub fn open_latest(&mut self) -> Result<Option<&Conversation>, SessionError> {
        self.current = self.store.latest_conversation()?;
        Ok(self.current.as_ref())
    }

    pub fn open_conversation(&mut self, id: &str) -> Result<&Conversation, SessionError> {
        let conversation = self
            .store
            .get_conversation(id)?
            .ok_or_else(|| HistoryError::ConversationNotFound { id: id.to_string() })?;
        Ok(self.current.insert(conversation))
    }

    pub fn new_conversation(&mut self, title: Option<&str>) -> Result<&Conversation, SessionError> {
        let conversation = self
            .store
            .create_conversation(title.unwrap_or(DEFAULT_TITLE))?;
        info!(id = %conversation.id, "started conversation");
        Ok(self.current.insert(conversation))
    }

    pub fn conversations(&self) -> Result<Vec<Conversation>, SessionError> {
        Ok(self.store.list_conversations()?)
    }

    /// Messages of the current conversation, oldest first.
    pub fn history(&self) -> Result<Vec<ChatMessage>, SessionError> {
        match &self.current {
            Some(conversation) => Ok(self.store.messages(&conversation.id)?),
            None => Ok(Vec::new()),
        }
    }

    /// Delete a conversation with its messages. Leaves the session without a
    /// current conversation if it was the one deleted.
    pub fn delete_conversation(&mut self, id: &str) -> Result<usize, SessionError> {
        let removed = self.store.delete_conversation(id)?;
        if self.current.as_ref().is_some_and(|c| c.id == id) {
            self.current = None;
        }
        Ok(removed)
    }

    /// Ask a question in the current conversation, starting one if needed.
    ///
    /// `on_chunk` sees each piece of the answer as it arrives.
    pub async fn send<F>(&mut self, query: &str, mut on_chunk: F) -> Result<Reply, SessionError>
    where
        F: FnMut(&str),
    {
        let query = query.trim();
        if query.is_empty() {
            return Err(SessionError::EmptyQuery);
        }

        let conversation = match self.current.clone() {
            Some(conversation) => conversation,
            None => self.new_conversation(None)?.clone(),
        };
        self.store
            .append_message(&NewMessage::user(&conversation.id, query))?;

        let Some(backend) = &self.backend else {
            let text = demo_reply(query);
            on_chunk(&text);
            let message_id = self
                .store
                .append_message(&NewMessage::assistant(&conversation.id, text.as_str()))?;
            self.reload_current(&conversation.id)?;
            return Ok(Reply {
                conversation_id: conversation.id,
                message_id,
                text,
                references: Vec::new(),
                usage: None,
                demo: true,
            });
        };

        let request = ChatRequest::new(query, backend.user())
            .with_conversation(conversation.remote_conversation_id.as_deref());
        let mut events = backend.open_stream(request).await?;

        let mut assembler = AnswerAssembler::new();
        while let Some(event) = events.next().await {
            let event = event?;
            if let Some(chunk) = assembler.apply(&event) {
                on_chunk(&chunk);
            }
        }

        if !assembler.is_finished() {
            if assembler.text().is_empty() {
                return Err(SessionError::EmptyAnswer);
            }
            warn!(
                conversation_id = %conversation.id,
                "stream closed without message_end; keeping the text received"
            );
        }

        let answer = assembler.into_answer();
        if let Some(remote_id) = answer.conversation_id.as_deref() {
            if conversation.remote_conversation_id.as_deref() != Some(remote_id) {
                self.store
                    .set_remote_conversation_id(&conversation.id, remote_id)?;
            }
        }

        let message = NewMessage::assistant(&conversation.id, answer.text.as_str())
            .with_remote_id(answer.message_id.clone())
            .with_references(answer.references.clone());
        let message_id = self.store.append_message(&message)?;
        self.reload_current(&conversation.id)?;

        info!(
            conversation_id = %conversation.id,
            message_id,
            answer_len = answer.text.len(),
            references = answer.references.len(),
            "answer stored"
        );

        Ok(Reply {
            conversation_id: conversation.id,
            message_id,
            text: answer.text,
            references: answer.references,
            usage: answer.usage,
            demo: false,
        })
    }

    fn reload_current(&mut self, id: &str) -> Result<(), SessionError> {
        self.current = self.store.get_conversation(id)?;
        Ok(())
    }
}

/// Canned answer used when no API key is configured.
pub fn demo_reply(query: &str) -> String {
    let lower = query.to_lowercase();
    if lower.contains("hello") || query.contains("你好") {
        "Hello! I am the knowledge assistant. I can help with questions about \
         company policies, processes and technical topics. This is demo mode: \
         configure a Dify API key to get real answers."
            .to_string()
    } else if lower.contains("test") || query.contains("测试") {
        "The test worked and the chat is up. To get AI answers, configure your \
         Dify API key with `wikihelper config set-key <key>`."
            .to_string()
    } else {
        format!(
            "I received your message: \"{query}\". To get real answers, configure \
             your Dify API key with `wikihelper config set-key <key>`."
        )
    }
}
