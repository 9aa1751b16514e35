//! End-to-end tests for the assistant loop.
//!
//! These drive a full turn from user message to terminal event: scripted
//! model responses, the destructive gate, local tools, and a simulated
//! host executor attached to the action broker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dawpilot_agent::broker::TIMEOUT_MESSAGE;
use dawpilot_agent::{ActionBroker, ActionRequest, AgentStreamEvent, Orchestrator, TurnSettings};
use dawpilot_core::error::{ErrorKind, ProviderError};
use dawpilot_core::event::{DomainEvent, EventBus};
use dawpilot_core::message::{MessageBody, ToolCallRequest};
use dawpilot_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, StopReason, StreamChunk, Usage,
};
use dawpilot_core::session::ContextDepth;
use dawpilot_security::{AuditEvent, AuditLogger, BLOCKED_MESSAGE};
use serde_json::{Value, json};
use tokio::sync::mpsc;

// ── Mock Provider ────────────────────────────────────────────────────────

enum Step {
    Reply(String, Vec<ToolCallRequest>),
    Fail(u16),
}

fn text(reply: &str) -> Step {
    Step::Reply(reply.into(), vec![])
}

fn calls(list: &[(&str, &str, Value)]) -> Step {
    Step::Reply(
        String::new(),
        list.iter()
            .map(|(id, name, arguments)| ToolCallRequest {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.clone(),
            })
            .collect(),
    )
}

/// A mock provider that plays back scripted steps in sequence.
struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    call_count: AtomicUsize,
}

impl ScriptedProvider {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            call_count: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider exhausted at call #{n}"));

        match step {
            Step::Fail(status) => Err(ProviderError::from_status(status, "scripted failure")),
            Step::Reply(reply, tool_calls) => {
                let (tx, rx) = mpsc::channel(8);
                let stop = if tool_calls.is_empty() {
                    StopReason::EndTurn
                } else {
                    StopReason::ToolUse
                };
                if !reply.is_empty() {
                    tx.send(Ok(StreamChunk::text(reply))).await.unwrap();
                }
                tx.send(Ok(StreamChunk::finish(stop, tool_calls, Some(Usage::new(10, 5)))))
                    .await
                    .unwrap();
                Ok(rx)
            }
        }
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

fn settings() -> TurnSettings {
    TurnSettings {
        model: "claude-sonnet-4-6".into(),
        temperature: 0.7,
        max_tokens: Some(1024),
        context_depth: ContextDepth::Standard,
    }
}

fn orchestrator(provider: Arc<ScriptedProvider>, audit: Arc<AuditLogger>) -> Arc<Orchestrator> {
    let bus = Arc::new(EventBus::default());
    let broker = ActionBroker::new(bus.clone())
        .with_timeout(Duration::from_secs(5))
        .with_audit(audit.clone());
    Arc::new(
        Orchestrator::new(provider, settings(), bus)
            .with_broker(Arc::new(broker))
            .with_audit(audit),
    )
}

/// Attach a simulated host. Every request is recorded; `answer` decides the
/// reply, `None` leaves the action pending.
fn attach_executor(
    broker: Arc<ActionBroker>,
    answer: impl Fn(&ActionRequest) -> Option<Value> + Send + 'static,
) -> Arc<Mutex<Vec<ActionRequest>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let mut rx = broker.subscribe();
    tokio::spawn(async move {
        while let Ok(request) = rx.recv().await {
            log.lock().unwrap().push(request.as_ref().clone());
            if let Some(result) = answer(&request) {
                broker.resolve(&request.id, result, false);
            }
        }
    });
    seen
}

async fn collect(mut rx: mpsc::Receiver<AgentStreamEvent>) -> Vec<AgentStreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

fn action_results(events: &[AgentStreamEvent]) -> Vec<(String, Value, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentStreamEvent::ActionResult { id, result, is_error, .. } => {
                Some((id.clone(), result.clone(), *is_error))
            }
            _ => None,
        })
        .collect()
}

// ── E2E: Destructive gate ────────────────────────────────────────────────

#[tokio::test]
async fn e2e_delete_blocked_until_confirmed() {
    let provider = ScriptedProvider::new(vec![
        calls(&[("toolu_1", "delete_track", json!({ "track_index": 2 }))]),
        text("This will delete track 3 \"Pad\". Shall I go ahead?"),
        calls(&[("toolu_2", "delete_track", json!({ "track_index": 2, "confirmed": true }))]),
        text("Deleted."),
    ]);
    let audit = Arc::new(AuditLogger::new());
    let orch = orchestrator(provider.clone(), audit.clone());
    let seen = attach_executor(orch.broker().clone(), |_| Some(json!({ "deleted": true })));

    let first = collect(orch.send_stream("delete the pad track").unwrap()).await;
    let results = action_results(&first);
    assert_eq!(results.len(), 1);
    assert!(results[0].2);
    assert_eq!(results[0].1["error"], BLOCKED_MESSAGE);
    assert!(seen.lock().unwrap().is_empty(), "blocked call must not reach the host");

    let second = collect(orch.send_stream("yes, do it").unwrap()).await;
    let results = action_results(&second);
    assert_eq!(results, vec![("toolu_2".to_string(), json!({ "deleted": true }), false)]);
    assert!(matches!(second.last(), Some(AgentStreamEvent::Done { .. })));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].id, "toolu_2");
    assert_eq!(seen[0].params["confirmed"], true);
    assert_eq!(provider.calls(), 4);

    let blocked: Vec<_> = audit
        .entries()
        .into_iter()
        .filter(|e| matches!(e.event, AuditEvent::ToolBlocked { .. }))
        .collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].action_id, "toolu_1");
}

// ── E2E: Executor timeouts ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_no_executor_times_out_and_turn_continues() {
    let provider = ScriptedProvider::new(vec![
        calls(&[("toolu_1", "set_tempo", json!({ "bpm": 90 }))]),
        text("I couldn't reach your DAW."),
    ]);
    let orch = orchestrator(provider.clone(), Arc::new(AuditLogger::new()));
    assert_eq!(orch.broker().listener_count(), 0);

    let events = collect(orch.send_stream("slow it down to 90").unwrap()).await;
    let results = action_results(&events);
    assert_eq!(results.len(), 1);
    assert!(results[0].2);
    assert_eq!(results[0].1["error"], TIMEOUT_MESSAGE);
    assert_eq!(events.last().unwrap(), &AgentStreamEvent::Done { rounds: 2, truncated: false });
    assert_eq!(orch.broker().pending_count(), 0);
    assert_eq!(provider.calls(), 2);
}

// ── E2E: Result batching ─────────────────────────────────────────────────

#[tokio::test]
async fn e2e_results_match_calls_one_to_one_in_order() {
    let provider = ScriptedProvider::new(vec![
        calls(&[
            ("toolu_a", "set_tempo", json!({ "bpm": 124 })),
            ("toolu_b", "get_session_state", json!({ "depth": "minimal" })),
            ("toolu_c", "start_playback", json!({})),
        ]),
        text("Playing at 124."),
    ]);
    let orch = orchestrator(provider, Arc::new(AuditLogger::new()));
    orch.session().set_state(json!({ "tempo": 120, "tracks": [{ "index": 0, "name": "Drums", "type": "midi" }] }));
    let seen = attach_executor(orch.broker().clone(), |req| Some(json!({ "ok": req.tool })));

    let events = collect(orch.send_stream("set 124 and play").unwrap()).await;

    let ids: Vec<String> = action_results(&events).into_iter().map(|(id, _, _)| id).collect();
    assert_eq!(ids, vec!["toolu_a", "toolu_b", "toolu_c"]);

    // The local tool never reaches the host.
    let tools: Vec<String> = seen.lock().unwrap().iter().map(|r| r.tool.clone()).collect();
    assert_eq!(tools, vec!["set_tempo", "start_playback"]);

    let history = orch.history();
    let batch = history
        .iter()
        .find_map(|m| match &m.body {
            MessageBody::ToolResultBatch { results } => Some(results.clone()),
            _ => None,
        })
        .unwrap();
    let batch_ids: Vec<&str> = batch.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(batch_ids, vec!["toolu_a", "toolu_b", "toolu_c"]);
    assert_eq!(batch[1].payload["tracks"][0]["name"], "Drums");
}

// ── E2E: Clear ───────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_clear_invalidates_pending_action() {
    let provider = ScriptedProvider::new(vec![
        calls(&[("toolu_1", "create_midi_track", json!({}))]),
        text("Fresh start."),
    ]);
    let orch = orchestrator(provider, Arc::new(AuditLogger::new()));
    let mut domain = orch.event_bus().subscribe();
    let seen = attach_executor(orch.broker().clone(), |_| None);

    let rx = orch.send_stream("add a midi track").unwrap();
    while seen.lock().unwrap().is_empty() {
        tokio::task::yield_now().await;
    }
    assert!(orch.broker().is_pending("toolu_1"));

    assert_eq!(orch.clear(), 1);
    let events = collect(rx).await;
    assert!(matches!(events.last(), Some(AgentStreamEvent::Error { .. })));
    assert!(!orch.is_busy());

    // A late answer for the cancelled action is ignored.
    assert!(!orch.broker().resolve("toolu_1", json!({ "ok": true }), false));
    assert!(orch.history().is_empty());

    let events = collect(orch.send_stream("hello again").unwrap()).await;
    assert!(matches!(events.last(), Some(AgentStreamEvent::Done { .. })));
    assert_eq!(orch.history().len(), 2);

    let mut cleared = false;
    while let Ok(event) = domain.try_recv() {
        if let DomainEvent::ConversationCleared { cancelled_actions, .. } = event.as_ref() {
            assert_eq!(*cancelled_actions, 1);
            cleared = true;
        }
    }
    assert!(cleared);
}

// ── E2E: Resilient invocation ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_rate_limit_is_retried_transparently() {
    let provider = ScriptedProvider::new(vec![Step::Fail(429), text("Here you go.")]);
    let orch = orchestrator(provider.clone(), Arc::new(AuditLogger::new()));

    let events = collect(orch.send_stream("hi").unwrap()).await;
    assert_eq!(provider.calls(), 2);

    let texts: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            AgentStreamEvent::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert!(texts[0].contains("Retrying"), "expected a retry notice, got {texts:?}");
    assert_eq!(texts.last(), Some(&"Here you go."));
    assert_eq!(events.last().unwrap(), &AgentStreamEvent::Done { rounds: 1, truncated: false });
    assert_eq!(orch.history().last().unwrap().text(), "Here you go.");
}

#[tokio::test]
async fn e2e_auth_failure_is_not_retried() {
    let provider = ScriptedProvider::new(vec![Step::Fail(401)]);
    let orch = orchestrator(provider.clone(), Arc::new(AuditLogger::new()));

    let events = collect(orch.send_stream("hi").unwrap()).await;
    assert_eq!(provider.calls(), 1);
    match events.last().unwrap() {
        AgentStreamEvent::Error { kind, .. } => assert_eq!(*kind, ErrorKind::AuthError),
        other => panic!("expected error, got {other:?}"),
    }
    assert!(!orch.is_busy());
}
