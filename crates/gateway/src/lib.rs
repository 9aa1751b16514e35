//! HTTP gateway for dawpilot.
//!
//! Serves the chat client (turn streaming, settings, cost) and the host
//! executor (action push channel, result callback, session and library
//! ingestion) from one axum router.

pub mod api;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use dawpilot_agent::{ActionBroker, Orchestrator};
use dawpilot_config::{AppConfig, GatewayConfig};
use dawpilot_core::event::EventBus;
use dawpilot_security::AuditLogger;

/// Session snapshots of large sets can run to several megabytes.
const BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    /// Live configuration; `POST /api/settings` edits it in memory only.
    pub config: RwLock<AppConfig>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(orchestrator: Arc<Orchestrator>, config: AppConfig) -> SharedState {
        Arc::new(Self {
            orchestrator,
            config: RwLock::new(config),
            started_at: chrono::Utc::now(),
        })
    }

    /// Wire the provider, broker, audit log and orchestrator from configuration.
    ///
    /// A provider without credentials is replaced by a placeholder so the
    /// server still starts; an API key can be supplied later via settings.
    pub fn from_config(config: AppConfig) -> SharedState {
        let event_bus = Arc::new(EventBus::default());
        let audit = Arc::new(AuditLogger::new());
        let provider = dawpilot_providers::build_or_placeholder(&config, &config.default_provider);

        let broker = ActionBroker::new(event_bus.clone())
            .with_timeout(std::time::Duration::from_secs(config.agent.action_timeout_secs))
            .with_audit(audit.clone());
        let orchestrator = Orchestrator::from_config(&config, provider, event_bus)
            .with_broker(Arc::new(broker))
            .with_audit(audit);

        Self::new(Arc::new(orchestrator), config)
    }
}

/// Build the full router.
///
/// Layers applied:
/// - CORS restricted to `gateway.cors_origins` (any origin when empty)
/// - Request body size limit
/// - HTTP trace logging
pub fn build_router(state: SharedState, gateway: &GatewayConfig) -> Router {
    Router::new()
        .nest("/api", api::api_router(state))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors_layer(&gateway.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    if origins.is_empty() {
        return cors.allow_origin(AllowOrigin::any());
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}

/// Start the gateway HTTP server and run until Ctrl-C.
pub async fn start(config: AppConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let gateway = config.gateway.clone();
    let state = GatewayState::from_config(config);

    info!(
        provider = %state.orchestrator.provider_name(),
        model = %state.orchestrator.settings().model,
        tools = state.orchestrator.tools().len(),
        "Orchestrator ready"
    );

    let app = build_router(state, &gateway);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;

    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
