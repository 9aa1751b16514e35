//! Action relay broker: correlates tool calls pushed to the host with the
//! results it posts back.
//!
//! Each dispatch registers a [`PendingAction`] keyed by the tool call id,
//! broadcasts an [`ActionRequest`] to every attached executor, and waits for
//! whichever comes first: a matching [`resolve`](ActionBroker::resolve) or the
//! timeout. Removal from the pending table is the single point of decision,
//! so a result racing the timer is either delivered or ignored, never both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use dawpilot_core::event::{DomainEvent, EventBus};
use dawpilot_core::message::{ToolCallRequest, ToolCallResult};
use dawpilot_security::{AuditEvent, AuditLogger, AuditOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// How long a dispatched action may stay unanswered.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Error text for an action nobody answered in time.
pub const TIMEOUT_MESSAGE: &str = "Action timed out waiting for the host to respond";

const CANCELLED_MESSAGE: &str = "Action cancelled: the conversation was cleared";

/// Event pushed to executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: String,
    pub tool: String,
    pub params: Value,
}

/// Body an executor posts back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionReport {
    pub id: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl ActionReport {
    /// Payload and error flag as fed back to the model.
    ///
    /// A reported error wins over a result; an empty report counts as success.
    pub fn into_outcome(self) -> (Value, bool) {
        match (self.error, self.result) {
            (Some(error), _) if !error.is_null() => (json!({ "error": error }), true),
            (_, Some(result)) if !result.is_null() => (result, false),
            _ => (json!({ "status": "ok" }), false),
        }
    }
}

/// One entry of the correlation table.
#[derive(Debug)]
struct PendingAction {
    tool: String,
    /// Distinguishes two registrations of the same id
    seq: u64,
    generation: u64,
    created_at: Instant,
    completion: oneshot::Sender<ToolCallResult>,
}

pub struct ActionBroker {
    executors: broadcast::Sender<Arc<ActionRequest>>,
    pending: Mutex<HashMap<String, PendingAction>>,
    generation: AtomicU64,
    next_seq: AtomicU64,
    timeout: Duration,
    event_bus: Arc<EventBus>,
    audit: Option<Arc<AuditLogger>>,
}

impl std::fmt::Debug for ActionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionBroker")
            .field("pending", &self.pending_count())
            .field("listeners", &self.listener_count())
            .field("generation", &self.generation())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ActionBroker {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        let (executors, _) = broadcast::channel(64);
        Self {
            executors,
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            timeout: DEFAULT_ACTION_TIMEOUT,
            event_bus,
            audit: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attach an executor. It receives every dispatch made from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ActionRequest>> {
        self.executors.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.executors.receiver_count()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Push `call` to the executors and wait for its result.
    ///
    /// Always yields exactly one result: the executor's answer, a timeout
    /// error, or a cancellation error if the conversation is cleared first.
    pub async fn dispatch(&self, call: &ToolCallRequest) -> ToolCallResult {
        let (tx, mut rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation();

        let superseded = self.lock().insert(
            call.id.clone(),
            PendingAction {
                tool: call.name.clone(),
                seq,
                generation,
                created_at: Instant::now(),
                completion: tx,
            },
        );
        if let Some(old) = superseded {
            warn!(id = %call.id, tool = %old.tool, "Duplicate action id; failing the earlier dispatch");
            let _ = old
                .completion
                .send(ToolCallResult::error(&call.id, "Action superseded by a newer dispatch with the same id"));
        }

        // Removes our entry if this future is dropped before completion.
        let _guard = PendingGuard {
            broker: self,
            id: &call.id,
            seq,
        };

        let request = Arc::new(ActionRequest {
            id: call.id.clone(),
            tool: call.name.clone(),
            params: call.arguments.clone(),
        });
        let listeners = self.executors.send(request).unwrap_or(0);
        if listeners == 0 {
            warn!(id = %call.id, tool = %call.name, "No executor attached; action will time out");
        } else {
            debug!(id = %call.id, tool = %call.name, listeners, "Action dispatched");
        }
        self.event_bus.publish(DomainEvent::ActionDispatched {
            id: call.id.clone(),
            tool: call.name.clone(),
            listeners,
            timestamp: Utc::now(),
        });
        self.record(
            AuditEvent::ActionDispatched {
                tool: call.name.clone(),
                listeners,
            },
            &call.id,
            AuditOutcome::Success,
            None,
        );

        let started = Instant::now();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        // Deadline first: once it has passed, the pending table alone decides.
        let (result, timed_out) = tokio::select! {
            biased;
            () = &mut deadline => match self.take(&call.id, seq) {
                Some(_) => {
                    warn!(id = %call.id, tool = %call.name, timeout_secs = self.timeout.as_secs_f64(), "Action timed out");
                    self.record(
                        AuditEvent::ActionTimedOut {
                            tool: call.name.clone(),
                        },
                        &call.id,
                        AuditOutcome::Failure,
                        None,
                    );
                    (ToolCallResult::error(&call.id, TIMEOUT_MESSAGE), true)
                }
                // A resolve claimed the entry just before the deadline.
                None => match rx.try_recv() {
                    Ok(result) => (result, false),
                    Err(_) => (ToolCallResult::error(&call.id, CANCELLED_MESSAGE), false),
                },
            },
            received = &mut rx => match received {
                Ok(result) => (result, false),
                Err(_) => (ToolCallResult::error(&call.id, CANCELLED_MESSAGE), false),
            },
        };

        self.event_bus.publish(DomainEvent::ActionResolved {
            id: call.id.clone(),
            tool: call.name.clone(),
            is_error: result.is_error,
            timed_out,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        result
    }

    /// Deliver an executor result. Returns `false` when no action with that
    /// id is pending (already resolved, timed out, cleared, or never sent).
    pub fn resolve(&self, id: &str, payload: Value, is_error: bool) -> bool {
        let current = self.generation();
        let entry = self.lock().remove(id);

        let Some(entry) = entry else {
            warn!(id, "Result for unknown action id ignored");
            self.record(AuditEvent::UnmatchedResult, id, AuditOutcome::Failure, None);
            return false;
        };
        if entry.generation != current {
            warn!(id, generation = entry.generation, current, "Result for a stale action ignored");
            self.record(AuditEvent::UnmatchedResult, id, AuditOutcome::Failure, Some("stale generation".into()));
            return false;
        }

        let elapsed_ms = entry.created_at.elapsed().as_millis() as u64;
        let result = ToolCallResult {
            id: id.to_string(),
            payload,
            is_error,
        };
        match entry.completion.send(result) {
            Ok(()) => {
                debug!(id, tool = %entry.tool, is_error, elapsed_ms, "Action resolved");
                self.record(
                    AuditEvent::ActionResolved { tool: entry.tool },
                    id,
                    if is_error { AuditOutcome::Failure } else { AuditOutcome::Success },
                    None,
                );
                true
            }
            Err(_) => {
                warn!(id, "Action resolved after its dispatcher went away");
                false
            }
        }
    }

    /// Convenience for an executor report body.
    pub fn resolve_report(&self, report: ActionReport) -> bool {
        let id = report.id.clone();
        let (payload, is_error) = report.into_outcome();
        self.resolve(&id, payload, is_error)
    }

    /// Cancel every pending action and start a new generation.
    ///
    /// Waiting dispatchers receive a cancellation error; results that arrive
    /// later for these ids are ignored. Returns the number cancelled.
    pub fn clear(&self) -> usize {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let drained: Vec<(String, PendingAction)> = self.lock().drain().collect();
        let count = drained.len();
        // Dropping the senders wakes the dispatchers.
        drop(drained);

        if count > 0 {
            info!(cancelled = count, generation, "Pending actions cancelled");
            self.record(AuditEvent::ActionsCancelled { count }, "*", AuditOutcome::Success, None);
        }
        count
    }

    fn take(&self, id: &str, seq: u64) -> Option<PendingAction> {
        let mut pending = self.lock();
        match pending.get(id) {
            Some(entry) if entry.seq == seq => pending.remove(id),
            _ => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingAction>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: AuditEvent, id: &str, outcome: AuditOutcome, details: Option<String>) {
        if let Some(audit) = &self.audit {
            audit.log(event, id, outcome, details);
        }
    }
}

struct PendingGuard<'a> {
    broker: &'a ActionBroker,
    id: &'a str,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.broker.take(self.id, self.seq);
    }
}
