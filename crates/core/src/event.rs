//! Domain events, broadcast to any interested subscriber.
//!
//! Events are published when something interesting happens in the system.
//! The gateway exposes them as a live stream; audit sinks may also listen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A tool call was pushed to the external executor
    ActionDispatched {
        id: String,
        tool: String,
        listeners: usize,
        timestamp: DateTime<Utc>,
    },

    /// A pending action completed (result, reported error or timeout)
    ActionResolved {
        id: String,
        tool: String,
        is_error: bool,
        timed_out: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The destructive gate refused a call
    ToolBlocked {
        id: String,
        tool: String,
        timestamp: DateTime<Utc>,
    },

    /// The model finished one invocation
    ResponseGenerated {
        model: String,
        input_tokens: u32,
        output_tokens: u32,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The host pushed new session data
    SessionUpdated {
        /// "state", "summary" or "audio_analysis"
        part: String,
        timestamp: DateTime<Utc>,
    },

    /// History, session context and pending actions were discarded
    ConversationCleared {
        cancelled_actions: usize,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The event type name as it appears on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ActionDispatched { .. } => "action_dispatched",
            Self::ActionResolved { .. } => "action_resolved",
            Self::ToolBlocked { .. } => "tool_blocked",
            Self::ResponseGenerated { .. } => "response_generated",
            Self::ErrorOccurred { .. } => "error_occurred",
            Self::SessionUpdated { .. } => "session_updated",
            Self::ConversationCleared { .. } => "conversation_cleared",
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
