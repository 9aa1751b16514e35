//! `dawpilot serve`: start the HTTP gateway.

use std::path::Path;

use super::load_config;

pub async fn run(config_path: Option<&Path>, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    println!("dawpilot gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:  {} ({})", config.default_provider, config.default_model);
    if !config.has_api_key() {
        println!("   API key:   not set (POST /api/settings or set ANTHROPIC_API_KEY / OPENAI_API_KEY)");
    }

    dawpilot_gateway::start(config).await
}
