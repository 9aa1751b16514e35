//! Message and conversation history types.
//!
//! A turn flows as: user message → assistant message (text + tool calls)
//! → one tool-result batch answering every call → next assistant message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single entry in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub body: MessageBody,
}

/// Role-specific message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MessageBody {
    User { content: String },
    Assistant { content: Vec<Segment> },
    ToolResultBatch { results: Vec<ToolCallResult> },
}

/// One ordered piece of an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    ToolCall(ToolCallRequest),
}

/// A tool invocation requested by the model. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation id assigned by the model provider
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Structured parameters
    pub arguments: serde_json::Value,
}

/// The answer to one [`ToolCallRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Matches the originating request id
    pub id: String,

    /// Structured result or error description
    pub payload: serde_json::Value,

    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
            is_error: false,
        }
    }

    /// An error result whose payload is `{"error": message}`.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }

    /// Payload rendered as text for providers that only accept strings.
    pub fn payload_text(&self) -> String {
        match &self.payload {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl Message {
    fn with_body(body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            body,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_body(MessageBody::User {
            content: content.into(),
        })
    }

    /// Create an assistant message: the text segment (if non-empty)
    /// followed by every tool call in the order given.
    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        let text = text.into();
        let mut content = Vec::with_capacity(tool_calls.len() + 1);
        if !text.is_empty() {
            content.push(Segment::Text { text });
        }
        content.extend(tool_calls.into_iter().map(Segment::ToolCall));
        Self::with_body(MessageBody::Assistant { content })
    }

    /// Create a tool-result batch message.
    pub fn tool_results(results: Vec<ToolCallResult>) -> Self {
        Self::with_body(MessageBody::ToolResultBatch { results })
    }

    /// Concatenated text of this message (tool results excluded).
    pub fn text(&self) -> String {
        match &self.body {
            MessageBody::User { content } => content.clone(),
            MessageBody::Assistant { content } => content
                .iter()
                .filter_map(|s| match s {
                    Segment::Text { text } => Some(text.as_str()),
                    Segment::ToolCall(_) => None,
                })
                .collect(),
            MessageBody::ToolResultBatch { .. } => String::new(),
        }
    }

    /// Tool calls carried by an assistant message, in order.
    pub fn tool_calls(&self) -> Vec<&ToolCallRequest> {
        match &self.body {
            MessageBody::Assistant { content } => content
                .iter()
                .filter_map(|s| match s {
                    Segment::ToolCall(call) => Some(call),
                    Segment::Text { .. } => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn char_len(&self) -> usize {
        match &self.body {
            MessageBody::User { content } => content.len(),
            MessageBody::Assistant { content } => content
                .iter()
                .map(|s| match s {
                    Segment::Text { text } => text.len(),
                    Segment::ToolCall(call) => call.name.len() + call.arguments.to_string().len(),
                })
                .sum(),
            MessageBody::ToolResultBatch { results } => {
                results.iter().map(|r| r.payload.to_string().len()).sum()
            }
        }
    }
}

/// Ordered conversation history. Append-only during a turn, cleared wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message to the end of the history.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Get the total token count estimate (rough: 4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.char_len()).sum::<usize>() / 4
    }
}
