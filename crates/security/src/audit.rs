//! Audit trail for actions sent toward the host application.
//!
//! Every gate decision, dispatch and resolution is recorded so a session can
//! be reconstructed afterwards.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of entries kept in memory.
pub const DEFAULT_CAPACITY: usize = 1000;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Tool call correlation id
    pub action_id: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Destructive call stopped by the gate
    ToolBlocked { tool: String },
    /// Destructive call let through with `confirmed: true`
    ToolConfirmed { tool: String },
    /// Call pushed to the executor channel
    ActionDispatched { tool: String, listeners: usize },
    /// Executor answered
    ActionResolved { tool: String },
    /// No answer within the timeout
    ActionTimedOut { tool: String },
    /// Result posted for an id nobody is waiting on
    UnmatchedResult,
    /// Pending actions dropped by a conversation clear
    ActionsCancelled { count: usize },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Where audit entries are written besides the in-memory ring.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Bounded in-memory audit log with optional sinks.
pub struct AuditLogger {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("capacity", &self.capacity)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: DEFAULT_CAPACITY,
            sinks,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Record an event. The oldest entry is evicted once capacity is reached.
    pub fn log(
        &self,
        event: AuditEvent,
        action_id: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            action_id: action_id.into(),
            outcome,
            details,
        };

        {
            let mut entries = self.lock();
            if entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    /// Entries recorded for one action id, oldest first.
    pub fn for_action(&self, action_id: &str) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| e.action_id == action_id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            action_id = %entry.action_id,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(tool: &str) -> AuditEvent {
        AuditEvent::ToolBlocked { tool: tool.into() }
    }

    #[test]
    fn log_and_retrieve_entries() {
        let logger = AuditLogger::new();
        logger.log(blocked("delete_track"), "toolu_1", AuditOutcome::Denied, None);
        logger.log(
            AuditEvent::ActionResolved { tool: "set_tempo".into() },
            "toolu_2",
            AuditOutcome::Success,
            Some("ok".into()),
        );

        assert_eq!(logger.count(), 2);
        let entries = logger.entries();
        assert_eq!(entries[0].action_id, "toolu_1");
        assert_eq!(entries[1].details.as_deref(), Some("ok"));
    }

    #[test]
    fn filter_by_outcome_and_action() {
        let logger = AuditLogger::new();
        logger.log(
            AuditEvent::ActionDispatched { tool: "delete_clip".into(), listeners: 1 },
            "toolu_1",
            AuditOutcome::Success,
            None,
        );
        logger.log(blocked("delete_clip"), "toolu_2", AuditOutcome::Denied, None);
        logger.log(
            AuditEvent::ActionTimedOut { tool: "delete_clip".into() },
            "toolu_1",
            AuditOutcome::Failure,
            None,
        );

        assert_eq!(logger.entries_by_outcome(&AuditOutcome::Denied).len(), 1);
        let trail = logger.for_action("toolu_1");
        assert_eq!(trail.len(), 2);
        assert!(matches!(trail[1].event, AuditEvent::ActionTimedOut { .. }));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let logger = AuditLogger::new().with_capacity(2);
        for id in ["a", "b", "c"] {
            logger.log(AuditEvent::UnmatchedResult, id, AuditOutcome::Failure, None);
        }
        let ids: Vec<String> = logger.entries().into_iter().map(|e| e.action_id).collect();
        assert_eq!(ids, vec!["b", "c"]);
        logger.clear();
        assert_eq!(logger.count(), 0);
    }

    #[test]
    fn event_serializes_tagged() {
        let json = serde_json::to_value(AuditEvent::ActionsCancelled { count: 3 }).unwrap();
        assert_eq!(json["type"], "actions_cancelled");
        assert_eq!(json["count"], 3);
    }

    #[test]
    fn custom_sink_receives_events() {
        use std::sync::{Arc, Mutex};

        struct TestSink {
            received: Arc<Mutex<Vec<String>>>,
        }

        impl AuditSink for TestSink {
            fn record(&self, entry: &AuditEntry) {
                self.received.lock().unwrap().push(entry.action_id.clone());
            }
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let logger = AuditLogger::with_sinks(vec![Box::new(TestSink {
            received: received.clone(),
        })]);
        logger.log(blocked("remove_device"), "toolu_7", AuditOutcome::Denied, None);

        assert_eq!(*received.lock().unwrap(), vec!["toolu_7".to_string()]);
    }

    #[test]
    fn debug_format() {
        let debug_str = format!("{:?}", AuditLogger::default());
        assert!(debug_str.contains("entry_count"));
    }
}
