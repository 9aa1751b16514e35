//! The conversation orchestration loop.
//!
//! One [`Orchestrator`] owns the active conversation. A user message starts a
//! turn: the model is invoked, every tool call it returns goes through the
//! destructive gate, then a local handler, then the action broker, strictly
//! in the order the model emitted them. Results are appended as one batch
//! and the model is invoked again, until it stops asking for tools or the
//! round limit is hit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use dawpilot_config::AppConfig;
use dawpilot_core::error::{Error, ErrorKind};
use dawpilot_core::event::{DomainEvent, EventBus};
use dawpilot_core::message::{ConversationHistory, Message, ToolCallRequest, ToolCallResult};
use dawpilot_core::provider::{Provider, ProviderRequest};
use dawpilot_core::session::{ContextDepth, SessionStore};
use dawpilot_core::tool::{LocalTool, ToolRegistry};
use dawpilot_providers::resilient::{ModelInvoker, RetryPolicy, TextSink};
use dawpilot_security::{AuditEvent, AuditLogger, AuditOutcome, DestructiveGate};
use dawpilot_telemetry::{CostSummary, TelemetryEngine};
use dawpilot_tools::{LibraryIndex, SessionStateTool, default_registry, local_tools};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::broker::ActionBroker;
use crate::prompt::build_system_prompt;
use crate::stream_event::AgentStreamEvent;

/// Appended to the output when a turn hits the round limit.
pub const ROUND_LIMIT_NOTICE: &str =
    "\n\n[Stopped: too many consecutive tool calls. Please continue the conversation.]";

/// Rejection text for a message sent while a turn is running.
pub const BUSY_MESSAGE: &str = "Please wait for the current response to finish.";

const DEFAULT_MAX_ROUNDS: u32 = 10;
const EVENT_BUFFER: usize = 256;

/// Model parameters that may change between turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSettings {
    pub model: String,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Depth used for the session state embedded in the system prompt and
    /// for `get_session_state` calls that don't specify one
    #[serde(default)]
    pub context_depth: ContextDepth,
}

impl TurnSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            context_depth: config.context_depth,
        }
    }
}

/// Summary of a completed turn.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// All model text of the turn, notices excluded
    pub text: String,
    /// Model invocations made
    pub rounds: u32,
    /// The round limit stopped the turn
    pub truncated: bool,
    pub tool_calls: usize,
}

/// Held while a turn runs. Dropping it, on any exit path, frees the
/// conversation for the next turn.
pub struct TurnGuard {
    active: Arc<AtomicU64>,
    token: u64,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let _ = self
            .active
            .compare_exchange(self.token, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

struct Conversation {
    history: ConversationHistory,
    /// Bumped on every clear; appends from an older turn are refused
    generation: u64,
}

struct RunningTurn {
    token: u64,
    abort: AbortHandle,
    events: mpsc::Sender<AgentStreamEvent>,
}

/// Forwards streamed model text into the turn's event channel.
struct EventSink<'a> {
    events: &'a mpsc::Sender<AgentStreamEvent>,
}

#[async_trait]
impl<'a> TextSink for EventSink<'a> {
    async fn text(&self, chunk: &str) {
        let _ = self
            .events
            .send(AgentStreamEvent::Text {
                content: chunk.to_string(),
            })
            .await;
    }
}

pub struct Orchestrator {
    invoker: RwLock<Arc<ModelInvoker>>,
    settings: RwLock<TurnSettings>,
    tools: Arc<ToolRegistry>,
    gate: DestructiveGate,
    session: Arc<SessionStore>,
    session_tool: Arc<SessionStateTool>,
    library: Arc<LibraryIndex>,
    local: Vec<Arc<dyn LocalTool>>,
    broker: Arc<ActionBroker>,
    telemetry: Arc<TelemetryEngine>,
    event_bus: Arc<EventBus>,
    audit: Option<Arc<AuditLogger>>,
    max_rounds: u32,
    active_turn: Arc<AtomicU64>,
    next_turn: AtomicU64,
    conversation: Mutex<Conversation>,
    running: Mutex<Option<RunningTurn>>,
}

impl Orchestrator {
    /// Create an orchestrator with the full DAW tool catalog, an empty
    /// session and the built-in library.
    pub fn new(provider: Arc<dyn Provider>, settings: TurnSettings, event_bus: Arc<EventBus>) -> Self {
        let tools = default_registry();
        let session = Arc::new(SessionStore::new());
        let session_tool = Arc::new(SessionStateTool::new(session.clone(), settings.context_depth));
        let library = Arc::new(LibraryIndex::with_builtin());

        Self {
            invoker: RwLock::new(Arc::new(ModelInvoker::new(provider))),
            gate: DestructiveGate::from_registry(&tools),
            tools: Arc::new(tools),
            local: local_tools(session_tool.clone(), library.clone()),
            session,
            session_tool,
            library,
            broker: Arc::new(ActionBroker::new(event_bus.clone())),
            telemetry: Arc::new(TelemetryEngine::new()),
            event_bus,
            audit: None,
            settings: RwLock::new(settings),
            max_rounds: DEFAULT_MAX_ROUNDS,
            active_turn: Arc::new(AtomicU64::new(0)),
            next_turn: AtomicU64::new(1),
            conversation: Mutex::new(Conversation {
                history: ConversationHistory::new(),
                generation: 0,
            }),
            running: Mutex::new(None),
        }
    }

    /// Apply the `[agent]` section and model defaults from configuration.
    pub fn from_config(config: &AppConfig, provider: Arc<dyn Provider>, event_bus: Arc<EventBus>) -> Self {
        let policy = RetryPolicy::new(
            config.agent.max_retries,
            std::time::Duration::from_millis(config.agent.retry_base_ms),
        );
        let broker = ActionBroker::new(event_bus.clone())
            .with_timeout(std::time::Duration::from_secs(config.agent.action_timeout_secs));

        Self::new(provider, TurnSettings::from_config(config), event_bus)
            .with_max_rounds(config.agent.max_rounds)
            .with_retry_policy(policy)
            .with_broker(Arc::new(broker))
    }

    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max.max(1);
        self
    }

    pub fn with_retry_policy(self, policy: RetryPolicy) -> Self {
        let provider = self.invoker().provider().clone();
        *self.invoker.write().unwrap_or_else(|e| e.into_inner()) =
            Arc::new(ModelInvoker::new(provider).with_policy(policy));
        self
    }

    pub fn with_broker(mut self, broker: Arc<ActionBroker>) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_session(mut self, session: Arc<SessionStore>) -> Self {
        self.session_tool = Arc::new(SessionStateTool::new(
            session.clone(),
            self.session_tool.default_depth(),
        ));
        self.session = session;
        self.rebuild_local();
        self
    }

    pub fn with_library(mut self, library: Arc<LibraryIndex>) -> Self {
        self.library = library;
        self.rebuild_local();
        self
    }

    /// Replace the tool catalog. The gate follows the new destructive flags.
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.gate = DestructiveGate::from_registry(&registry);
        self.tools = Arc::new(registry);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryEngine>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn rebuild_local(&mut self) {
        self.local = local_tools(self.session_tool.clone(), self.library.clone());
    }

    pub fn broker(&self) -> &Arc<ActionBroker> {
        &self.broker
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn library(&self) -> &Arc<LibraryIndex> {
        &self.library
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn telemetry(&self) -> &Arc<TelemetryEngine> {
        &self.telemetry
    }

    pub fn provider_name(&self) -> String {
        self.invoker().provider().name().to_string()
    }

    /// Swap the model provider. Takes effect from the next invocation.
    pub fn set_provider(&self, provider: Arc<dyn Provider>) {
        let mut invoker = self.invoker.write().unwrap_or_else(|e| e.into_inner());
        let policy = invoker.policy().clone();
        info!(provider = provider.name(), "Model provider switched");
        *invoker = Arc::new(ModelInvoker::new(provider).with_policy(policy));
    }

    pub fn settings(&self) -> TurnSettings {
        self.settings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update_settings(&self, settings: TurnSettings) {
        self.session_tool.set_default_depth(settings.context_depth);
        debug!(model = %settings.model, depth = %settings.context_depth, "Turn settings updated");
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
    }

    pub fn is_busy(&self) -> bool {
        self.active_turn.load(Ordering::SeqCst) != 0
    }

    /// A copy of the conversation so far.
    pub fn history(&self) -> Vec<Message> {
        self.conversation().history.messages().to_vec()
    }

    /// Cumulative usage since the last clear.
    pub fn cost_summary(&self) -> CostSummary {
        self.telemetry.summary()
    }

    /// Claim the conversation for one turn.
    pub fn try_begin(&self) -> Result<TurnGuard, Error> {
        let token = self.next_turn.fetch_add(1, Ordering::SeqCst);
        self.active_turn
            .compare_exchange(0, token, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::Busy)?;
        Ok(TurnGuard {
            active: self.active_turn.clone(),
            token,
        })
    }

    /// Start a turn in the background and return its event stream.
    ///
    /// Fails with [`Error::Busy`] when a turn is already running. The stream
    /// always ends with exactly one `done` or `error` event.
    pub fn send_stream(
        self: &Arc<Self>,
        message: impl Into<String>,
    ) -> Result<mpsc::Receiver<AgentStreamEvent>, Error> {
        let guard = self.try_begin()?;
        let token = guard.token;
        let message = message.into();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        // Registered under the lock so the task cannot finish before its
        // slot exists.
        let mut slot = self.running_slot();
        let this = Arc::clone(self);
        let events = tx.clone();
        let handle = tokio::spawn(async move {
            let _ = this.drive(guard, &message, &events, true).await;
        });
        *slot = Some(RunningTurn {
            token,
            abort: handle.abort_handle(),
            events: tx,
        });
        Ok(rx)
    }

    /// Run one turn to completion on the current task.
    pub async fn run_turn(
        &self,
        message: impl Into<String>,
        events: &mpsc::Sender<AgentStreamEvent>,
    ) -> Result<TurnOutcome, Error> {
        let guard = self.try_begin()?;
        self.drive(guard, &message.into(), events, false).await
    }

    /// Discard history, session context, usage totals and pending actions.
    /// A running turn is cancelled and its stream ends with an error event.
    pub fn clear(&self) -> usize {
        // A turn still in the slot has not sent its terminal event yet.
        if let Some(turn) = self.running_slot().take() {
            turn.abort.abort();
            let _ = turn.events.try_send(AgentStreamEvent::Error {
                kind: ErrorKind::UnknownError,
                message: "Conversation cleared".into(),
            });
            let _ = self.active_turn.compare_exchange(
                turn.token,
                0,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }

        let generation = {
            let mut conversation = self.conversation();
            conversation.history.clear();
            conversation.generation += 1;
            conversation.generation
        };
        let cancelled = self.broker.clear();
        self.session.clear();
        self.telemetry.reset();

        info!(generation, cancelled, "Conversation cleared");
        self.event_bus.publish(DomainEvent::ConversationCleared {
            cancelled_actions: cancelled,
            timestamp: Utc::now(),
        });
        cancelled
    }

    async fn drive(
        &self,
        guard: TurnGuard,
        message: &str,
        events: &mpsc::Sender<AgentStreamEvent>,
        streamed: bool,
    ) -> Result<TurnOutcome, Error> {
        let token = guard.token;
        let outcome = self.execute(message, events).await;

        let terminal = match &outcome {
            Ok(outcome) => AgentStreamEvent::Done {
                rounds: outcome.rounds,
                truncated: outcome.truncated,
            },
            Err(err) => {
                let kind = match err {
                    Error::Provider(e) => e.kind(),
                    _ => ErrorKind::UnknownError,
                };
                warn!(kind = %kind, error = %err, "Turn failed");
                self.event_bus.publish(DomainEvent::ErrorOccurred {
                    context: "turn".into(),
                    error_message: err.to_string(),
                    timestamp: Utc::now(),
                });
                AgentStreamEvent::Error {
                    kind,
                    message: match err {
                        Error::Provider(_) => format!("{} {err}", kind.user_message()),
                        _ => err.to_string(),
                    },
                }
            }
        };
        // A clear that took the slot first has already ended the stream.
        if !streamed || self.claim_terminal(token) {
            let _ = events.send(terminal).await;
        }
        drop(guard);
        outcome
    }

    async fn execute(
        &self,
        message: &str,
        events: &mpsc::Sender<AgentStreamEvent>,
    ) -> Result<TurnOutcome, Error> {
        let generation = {
            let mut conversation = self.conversation();
            conversation.history.push(Message::user(message));
            conversation.generation
        };
        info!(generation, chars = message.len(), "Turn started");

        let mut outcome = TurnOutcome::default();
        loop {
            if outcome.rounds >= self.max_rounds {
                warn!(rounds = outcome.rounds, "Round limit reached; stopping turn");
                let _ = events
                    .send(AgentStreamEvent::Text {
                        content: ROUND_LIMIT_NOTICE.into(),
                    })
                    .await;
                outcome.truncated = true;
                return Ok(outcome);
            }
            outcome.rounds += 1;

            let request = self.build_request();
            let invoker = self.invoker();
            debug!(round = outcome.rounds, messages = request.messages.len(), "Invoking model");
            let turn = invoker.invoke(&request, &EventSink { events }).await?;

            let cost = self.telemetry.record(
                &request.model,
                turn.usage.prompt_tokens,
                turn.usage.completion_tokens,
            );
            self.event_bus.publish(DomainEvent::ResponseGenerated {
                model: request.model.clone(),
                input_tokens: cost.input_tokens,
                output_tokens: cost.output_tokens,
                timestamp: Utc::now(),
            });
            let _ = events
                .send(AgentStreamEvent::TokenUsage {
                    input_tokens: cost.input_tokens,
                    output_tokens: cost.output_tokens,
                    cost: cost.cost_usd,
                })
                .await;

            outcome.text.push_str(&turn.text);
            let wants_tools = turn.wants_tools();
            let mut calls = turn.tool_calls;
            if !wants_tools && !calls.is_empty() {
                // Unanswered calls must not reach the history.
                warn!(stop = ?turn.stop_reason, discarded = calls.len(), "Reply ended without requesting tools; dropping its tool calls");
                calls.clear();
            }
            self.append(generation, Message::assistant(turn.text, calls.clone()))?;

            if !wants_tools {
                info!(rounds = outcome.rounds, tool_calls = outcome.tool_calls, "Turn complete");
                return Ok(outcome);
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                let _ = events
                    .send(AgentStreamEvent::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    })
                    .await;

                let result = self.handle_call(call).await;

                let _ = events
                    .send(AgentStreamEvent::ActionResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        result: result.payload.clone(),
                        is_error: result.is_error,
                    })
                    .await;
                results.push(result);
            }
            outcome.tool_calls += results.len();
            self.append(generation, Message::tool_results(results))?;
        }
    }

    /// Gate, then local handler, then the executor.
    async fn handle_call(&self, call: &ToolCallRequest) -> ToolCallResult {
        if self.gate.check(&call.name, &call.arguments).is_blocked() {
            info!(id = %call.id, tool = %call.name, "Destructive tool call blocked pending confirmation");
            self.event_bus.publish(DomainEvent::ToolBlocked {
                id: call.id.clone(),
                tool: call.name.clone(),
                timestamp: Utc::now(),
            });
            self.record(AuditEvent::ToolBlocked { tool: call.name.clone() }, &call.id, AuditOutcome::Denied);
            return DestructiveGate::block_result(&call.id);
        }
        if self.gate.is_destructive(&call.name) {
            self.record(AuditEvent::ToolConfirmed { tool: call.name.clone() }, &call.id, AuditOutcome::Success);
        }

        if let Some(handler) = self.local.iter().find(|t| t.name() == call.name) {
            match handler.resolve(call).await {
                Some(result) => {
                    debug!(id = %call.id, tool = %call.name, "Resolved locally");
                    return result;
                }
                None => debug!(id = %call.id, tool = %call.name, "Local handler declined; relaying to host"),
            }
        }

        if !self.tools.contains(&call.name) {
            warn!(id = %call.id, tool = %call.name, "Model called an unregistered tool; relaying anyway");
        }
        self.broker.dispatch(call).await
    }

    fn build_request(&self) -> ProviderRequest {
        let settings = self.settings();
        let context = self.session.snapshot();
        let destructive = self.tools.destructive_names();

        ProviderRequest {
            model: settings.model,
            system: build_system_prompt(&context, &destructive, settings.context_depth),
            messages: self.history(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            tools: self.tools.definitions(),
        }
    }

    fn append(&self, generation: u64, message: Message) -> Result<(), Error> {
        let mut conversation = self.conversation();
        if conversation.generation != generation {
            return Err(Error::Cancelled("conversation was cleared".into()));
        }
        conversation.history.push(message);
        Ok(())
    }

    /// Take the running slot for the turn about to send its terminal event.
    /// Returns `false` when `clear` got there first.
    fn claim_terminal(&self, token: u64) -> bool {
        let mut slot = self.running_slot();
        if slot.as_ref().is_some_and(|t| t.token == token) {
            *slot = None;
            return true;
        }
        false
    }

    fn invoker(&self) -> Arc<ModelInvoker> {
        self.invoker.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn conversation(&self) -> MutexGuard<'_, Conversation> {
        self.conversation.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn running_slot(&self) -> MutexGuard<'_, Option<RunningTurn>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: AuditEvent, id: &str, outcome: AuditOutcome) {
        if let Some(audit) = &self.audit {
            audit.log(event, id, outcome, None);
        }
    }
}
