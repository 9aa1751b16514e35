//! Caller-facing turn events.
//!
//! `AgentStreamEvent` is what the gateway forwards to the chat client over
//! SSE, one event per message with the variant name as the SSE event type.
//!
//! For one user message the orchestrator emits, in order:
//! - `text`: streamed model text (chunk boundaries are arbitrary)
//! - `tool_use`: a tool call is about to be handled
//! - `action_result`: the result fed back to the model for that call
//! - `token_usage`: tokens and estimated cost of one model invocation
//! - `done` or `error`: exactly one, last

use dawpilot_core::error::ErrorKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text from the model, or a retry / round-limit notice.
    Text { content: String },

    /// The model asked for a tool.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// A tool call was answered (executor, local handler, gate or timeout).
    ActionResult {
        id: String,
        name: String,
        result: serde_json::Value,
        is_error: bool,
    },

    /// Usage of one model invocation.
    TokenUsage {
        input_tokens: u32,
        output_tokens: u32,
        /// Estimated USD
        cost: f64,
    },

    /// The turn finished normally.
    Done {
        rounds: u32,
        /// The round limit stopped the turn
        #[serde(default)]
        truncated: bool,
    },

    /// The turn was aborted.
    Error { kind: ErrorKind, message: String },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolUse { .. } => "tool_use",
            Self::ActionResult { .. } => "action_result",
            Self::TokenUsage { .. } => "token_usage",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
