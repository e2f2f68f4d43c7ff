//! Conversation messages and the append-only message buffer.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prompt sent as the user turn of every continuation round.
pub const CONTINUATION_PROMPT: &str = "继续";

/// A single role-tagged conversation entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, text)
    }

    /// The `{role, content}` record sent on the wire.
    pub fn to_record(&self) -> Value {
        serde_json::json!({
            "role": self.role.as_str(),
            "content": self.content,
        })
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Ordered, append-only conversation buffer.
///
/// `Clone` produces a fully independent copy; the continuation loop relies on this
/// to never touch a buffer the caller still holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Messages {
    inner: Vec<Message>,
}

impl Messages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message at the end of the conversation.
    pub fn append(&mut self, content: impl Into<String>, role: MessageRole) {
        self.inner.push(Message::new(role, content));
    }

    pub fn push(&mut self, message: Message) {
        self.inner.push(message);
    }

    /// Plain `{role, content}` records in conversation order.
    pub fn to_records(&self) -> Vec<Value> {
        self.inner.iter().map(Message::to_record).collect()
    }

    /// Build a buffer from raw `{role, content}` records.
    ///
    /// Every record must be an object with a known `role` and a string `content`.
    pub fn from_records(records: Vec<Value>) -> Result<Self> {
        let mut inner = Vec::with_capacity(records.len());
        for (idx, record) in records.into_iter().enumerate() {
            let message = serde_json::from_value::<Message>(record).map_err(|e| {
                Error::validation_with_context(
                    "record is not a {role, content} message",
                    ErrorContext::new()
                        .with_field_path(format!("messages[{}]", idx))
                        .with_details(e.to_string())
                        .with_source("messages_input"),
                )
            })?;
            inner.push(message);
        }
        Ok(Self { inner })
    }

    /// Append the assistant fragment and the continuation prompt for one round.
    pub(crate) fn append_continuation(&mut self, fragment: &str) {
        self.append(fragment, MessageRole::Assistant);
        self.append(CONTINUATION_PROMPT, MessageRole::User);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.inner.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.inner.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.inner
    }
}

impl From<Vec<Message>> for Messages {
    fn from(inner: Vec<Message>) -> Self {
        Self { inner }
    }
}

impl FromIterator<Message> for Messages {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Messages {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

/// Messages as accepted by the public entry points: a typed buffer or raw records.
#[derive(Debug, Clone)]
pub enum MessagesInput {
    Buffer(Messages),
    Records(Vec<Value>),
}

impl MessagesInput {
    /// Normalize into the canonical buffer form.
    pub fn normalize(self) -> Result<Messages> {
        match self {
            MessagesInput::Buffer(messages) => Ok(messages),
            MessagesInput::Records(records) => Messages::from_records(records),
        }
    }
}

impl From<Messages> for MessagesInput {
    fn from(messages: Messages) -> Self {
        MessagesInput::Buffer(messages)
    }
}

impl From<&Messages> for MessagesInput {
    fn from(messages: &Messages) -> Self {
        MessagesInput::Buffer(messages.clone())
    }
}

impl From<Vec<Message>> for MessagesInput {
    fn from(messages: Vec<Message>) -> Self {
        MessagesInput::Buffer(messages.into())
    }
}

impl From<Vec<Value>> for MessagesInput {
    fn from(records: Vec<Value>) -> Self {
        MessagesInput::Records(records)
    }
}
