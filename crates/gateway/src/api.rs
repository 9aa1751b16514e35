//! HTTP API for the chat client and the host executor.
//!
//! Endpoints (nested under `/api`):
//!
//! - `POST /chat`: start a turn, SSE stream of turn events
//! - `GET  /action-stream`: executor push channel (SSE)
//! - `POST /action-result`: executor posts the outcome of an action
//! - `POST /session-state`, `/session-summary`, `/audio-analysis`: session ingestion
//! - `POST /library-index`, `GET /library/search`: browsable content
//! - `GET  /cost-estimate`: cumulative usage of the conversation
//! - `POST /clear`: start over
//! - `GET|POST /settings`: model, provider and context depth
//! - `GET  /events`: domain event stream (SSE)
//! - `GET  /health`: liveness

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};

use dawpilot_agent::{ActionReport, AgentStreamEvent, BUSY_MESSAGE};
use dawpilot_config::{KNOWN_PROVIDERS, default_model_for};
use dawpilot_core::error::Error;
use dawpilot_core::event::DomainEvent;
use dawpilot_core::session::ContextDepth;
use dawpilot_providers::build_or_placeholder;
use dawpilot_telemetry::CostSummary;
use dawpilot_tools::LibraryItem;
use dawpilot_tools::library::{CATEGORIES, DEFAULT_LIMIT, MAX_LIMIT};

use crate::SharedState;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the API router. Nest this under "/api" in the main router.
pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/action-stream", get(action_stream_handler))
        .route("/action-result", post(action_result_handler))
        .route("/session-state", post(session_state_handler))
        .route("/session-summary", post(session_summary_handler))
        .route("/audio-analysis", post(audio_analysis_handler))
        .route("/library-index", post(library_index_handler))
        .route("/library/search", get(library_search_handler))
        .route("/cost-estimate", get(cost_estimate_handler))
        .route("/clear", post(clear_handler))
        .route("/settings", get(get_settings_handler).post(update_settings_handler))
        .route("/events", get(event_stream_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Deserialize)]
struct SummaryRequest {
    summary: String,
}

#[derive(Deserialize)]
struct LibraryIndexRequest {
    items: Vec<LibraryItem>,
}

#[derive(Deserialize)]
struct LibrarySearchQuery {
    q: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SettingsResponse {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub context_depth: ContextDepth,
    pub api_key_set: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsUpdate {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    context_depth: Option<ContextDepth>,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: String,
    pub model: String,
    pub executors: usize,
    pub pending_actions: usize,
    pub busy: bool,
    pub uptime_secs: i64,
}

// ── Chat ──────────────────────────────────────────────────────────────────

fn turn_event(event: &AgentStreamEvent) -> SseEvent {
    SseEvent::default()
        .event(event.event_type())
        .data(serde_json::to_string(event).unwrap_or_default())
}

/// `POST /api/chat`: start a turn and stream its events.
///
/// The stream ends right after the terminal `done` or `error` event.
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    let rx = state
        .orchestrator
        .send_stream(payload.message)
        .map_err(|e| match e {
            Error::Busy => api_error(StatusCode::TOO_MANY_REQUESTS, BUSY_MESSAGE),
            other => api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    let stream = futures::stream::unfold((rx, false), |(mut rx, finished)| async move {
        if finished {
            return None;
        }
        let event = rx.recv().await?;
        let finished = event.is_terminal();
        Some((Ok(turn_event(&event)), (rx, finished)))
    });

    Ok(Sse::new(stream))
}

// ── Executor channel ──────────────────────────────────────────────────────

/// `GET /api/action-stream`: push channel for the host executor.
///
/// Sends `connected` once, then one `action_request` per dispatch.
async fn action_stream_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let broker = state.orchestrator.broker();
    let rx = broker.subscribe();
    info!(listeners = broker.listener_count(), "Executor attached");

    let connected = tokio_stream::once(Ok(SseEvent::default()
        .event("connected")
        .data(json!({ "status": "connected" }).to_string())));

    let requests = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(request) => Some(Ok(SseEvent::default()
            .event("action_request")
            .data(serde_json::to_string(request.as_ref()).unwrap_or_default()))),
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            warn!(missed, "Executor fell behind; dropped action requests will time out");
            None
        }
    });

    Sse::new(connected.chain(requests)).keep_alive(KeepAlive::default())
}

/// `POST /api/action-result`: resolve a pending action.
async fn action_result_handler(
    State(state): State<SharedState>,
    Json(report): Json<ActionReport>,
) -> Result<Json<Value>, ApiError> {
    let id = report.id.clone();
    if state.orchestrator.broker().resolve_report(report) {
        Ok(Json(json!({ "status": "ok", "id": id })))
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No pending action with id '{id}'"),
        ))
    }
}

// ── Session ingestion ─────────────────────────────────────────────────────

fn session_updated(state: &SharedState, part: &str) {
    state.orchestrator.event_bus().publish(DomainEvent::SessionUpdated {
        part: part.into(),
        timestamp: Utc::now(),
    });
}

/// `POST /api/session-state`: replace the cached session snapshot.
async fn session_state_handler(
    State(state): State<SharedState>,
    Json(snapshot): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    if !snapshot.is_object() {
        warn!("Rejected session state that is not a JSON object");
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "session state must be a JSON object",
        ));
    }

    let tracks = snapshot
        .get("tracks")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    debug!(tracks, "Session state updated");
    state.orchestrator.session().set_state(snapshot);
    session_updated(&state, "state");
    Ok(Json(json!({ "status": "ok", "tracks": tracks })))
}

/// `POST /api/session-summary`: replace the free-text summary.
async fn session_summary_handler(
    State(state): State<SharedState>,
    Json(payload): Json<SummaryRequest>,
) -> Json<Value> {
    debug!(chars = payload.summary.len(), "Session summary updated");
    state.orchestrator.session().set_summary(payload.summary);
    session_updated(&state, "summary");
    Json(json!({ "status": "ok" }))
}

/// `POST /api/audio-analysis`: store the latest analysis.
async fn audio_analysis_handler(
    State(state): State<SharedState>,
    Json(analysis): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    if !analysis.is_object() {
        warn!("Rejected audio analysis that is not a JSON object");
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "audio analysis must be a JSON object",
        ));
    }
    state.orchestrator.session().set_audio_analysis(analysis);
    session_updated(&state, "audio_analysis");
    Ok(Json(json!({ "status": "ok" })))
}

// ── Library ───────────────────────────────────────────────────────────────

/// `POST /api/library-index`: merge host-supplied browser items.
async fn library_index_handler(
    State(state): State<SharedState>,
    Json(payload): Json<LibraryIndexRequest>,
) -> Json<Value> {
    let received = payload.items.len();
    let library = state.orchestrator.library();
    let added = library.ingest(payload.items);
    info!(received, added, total = library.len(), "Library index updated");
    Json(json!({ "status": "ok", "received": received, "added": added, "total": library.len() }))
}

/// `GET /api/library/search?q=&category=&limit=`
async fn library_search_handler(
    State(state): State<SharedState>,
    Query(query): Query<LibrarySearchQuery>,
) -> Result<Json<Value>, ApiError> {
    let category = query.category.as_deref().unwrap_or("all");
    if !CATEGORIES.contains(&category) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Unknown category '{category}'. Use one of: {}", CATEGORIES.join(", ")),
        ));
    }
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let results = state.orchestrator.library().search(&query.q, Some(category), limit);

    Ok(Json(json!({
        "status": "ok",
        "query": query.q,
        "category": category,
        "results_count": results.len(),
        "results": results,
    })))
}

// ── Conversation ──────────────────────────────────────────────────────────

/// `GET /api/cost-estimate`
async fn cost_estimate_handler(State(state): State<SharedState>) -> Json<CostSummary> {
    Json(state.orchestrator.cost_summary())
}

/// `POST /api/clear`: drop history, session context and pending actions.
async fn clear_handler(State(state): State<SharedState>) -> Json<Value> {
    let cancelled = state.orchestrator.clear();
    Json(json!({ "status": "ok", "cancelled_actions": cancelled }))
}

// ── Settings ──────────────────────────────────────────────────────────────

async fn current_settings(state: &SharedState) -> SettingsResponse {
    let config = state.config.read().await;
    let settings = state.orchestrator.settings();
    SettingsResponse {
        provider: config.default_provider.clone(),
        model: settings.model,
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
        context_depth: settings.context_depth,
        api_key_set: config.has_api_key(),
    }
}

/// `GET /api/settings`
async fn get_settings_handler(State(state): State<SharedState>) -> Json<SettingsResponse> {
    Json(current_settings(&state).await)
}

/// `POST /api/settings`: change settings in memory. Nothing is written to
/// the config file.
///
/// Switching provider without naming a model selects that provider's
/// default model. A new provider or API key rebuilds the provider client.
async fn update_settings_handler(
    State(state): State<SharedState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<SettingsResponse>, ApiError> {
    if let Some(provider) = &update.provider
        && !KNOWN_PROVIDERS.contains(&provider.as_str())
    {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Unknown provider '{provider}'. Use one of: {}", KNOWN_PROVIDERS.join(", ")),
        ));
    }
    if let Some(t) = update.temperature
        && !(0.0..=2.0).contains(&t)
    {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "temperature must be between 0.0 and 2.0",
        ));
    }

    {
        let mut config = state.config.write().await;
        let provider_changed = update
            .provider
            .as_ref()
            .is_some_and(|p| *p != config.default_provider);
        if let Some(provider) = update.provider {
            config.default_provider = provider;
        }

        let key_changed = update.api_key.as_ref().is_some_and(|k| !k.is_empty());
        if let Some(key) = update.api_key.filter(|k| !k.is_empty()) {
            let name = config.default_provider.clone();
            config.providers.entry(name).or_default().api_key = Some(key);
        }

        match update.model {
            Some(model) => config.default_model = model,
            None if provider_changed => {
                config.default_model = default_model_for(&config.default_provider).into();
            }
            None => {}
        }
        if let Some(t) = update.temperature {
            config.default_temperature = t;
        }
        if let Some(max) = update.max_tokens {
            config.default_max_tokens = max;
        }
        if let Some(depth) = update.context_depth {
            config.context_depth = depth;
        }

        let mut settings = state.orchestrator.settings();
        settings.model = config.default_model.clone();
        settings.temperature = config.default_temperature;
        settings.max_tokens = Some(config.default_max_tokens);
        settings.context_depth = config.context_depth;
        state.orchestrator.update_settings(settings);

        if provider_changed || key_changed {
            let name = config.default_provider.clone();
            state
                .orchestrator
                .set_provider(build_or_placeholder(&config, &name));
        }
        info!(
            provider = %config.default_provider,
            model = %config.default_model,
            depth = %config.context_depth,
            "Settings updated"
        );
    }

    Ok(Json(current_settings(&state).await))
}

// ── Events & health ───────────────────────────────────────────────────────

/// `GET /api/events`: SSE stream of domain events.
async fn event_stream_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.orchestrator.event_bus().subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.event_type()).data(data))
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `GET /api/health`
async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let orchestrator = &state.orchestrator;
    let broker = orchestrator.broker();
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        provider: orchestrator.provider_name(),
        model: orchestrator.settings().model,
        executors: broker.listener_count(),
        pending_actions: broker.pending_count(),
        busy: orchestrator.is_busy(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}
