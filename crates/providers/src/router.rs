//! Provider router: selects the correct LLM provider based on config.
//!
//! Handles provider creation and lookup by name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dawpilot_config::AppConfig;
use dawpilot_core::error::ProviderError;
use dawpilot_core::provider::{ChunkReceiver, Provider, ProviderRequest};

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build one provider by name from configuration.
pub fn build_provider(config: &AppConfig, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config
        .api_key_for(name)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ProviderError::NotConfigured(format!("no API key configured for '{name}'")))?;
    let settings = config.provider(name);

    match name {
        "anthropic" => {
            let mut provider = AnthropicProvider::new(api_key);
            if let Some(url) = settings.api_url {
                provider = provider.with_base_url(url);
            }
            Ok(Arc::new(provider))
        }
        "openai" => {
            let base_url = settings.api_url.unwrap_or_else(|| default_base_url(name).into());
            Ok(Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)))
        }
        other => Err(ProviderError::NotConfigured(format!("unknown provider '{other}'"))),
    }
}

/// Build every provider that has credentials. Providers without a key are
/// skipped with a log line.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    for name in dawpilot_config::KNOWN_PROVIDERS {
        match build_provider(config, name) {
            Ok(provider) => router.register(*name, provider),
            Err(e) => tracing::debug!(provider = name, error = %e, "Provider not available"),
        }
    }

    router
}

/// Stands in for a provider that has no credentials yet. Every request fails
/// with [`ProviderError::NotConfigured`] until a key is supplied.
pub struct UnconfiguredProvider {
    name: String,
    reason: String,
}

impl UnconfiguredProvider {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Provider for UnconfiguredProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        Err(ProviderError::NotConfigured(self.reason.clone()))
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(false)
    }
}

/// Build the named provider, or a placeholder that reports why it could not
/// be built.
pub fn build_or_placeholder(config: &AppConfig, name: &str) -> Arc<dyn Provider> {
    match build_provider(config, name) {
        Ok(provider) => provider,
        Err(e) => {
            tracing::warn!(provider = name, error = %e, "Provider unavailable; requests will fail until configured");
            Arc::new(UnconfiguredProvider::new(name, e.to_string()))
        }
    }
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> &'static str {
    match provider_name {
        "openai" => "https://api.openai.com/v1",
        _ => "https://api.anthropic.com",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dawpilot_config::ProviderConfig;

    fn config_with_key(provider: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.providers.insert(
            provider.into(),
            ProviderConfig {
                api_key: Some("sk-test".into()),
                ..Default::default()
            },
        );
        config
    }

    #[test]
    fn router_register_and_lookup() {
        let mut router = ProviderRouter::new("openai");
        router.register("openai", Arc::new(OpenAiCompatProvider::openai("sk-test")));

        assert!(router.get("openai").is_some());
        assert!(router.get("nonexistent").is_none());
        assert!(router.default().is_some());
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("anthropic").contains("api.anthropic.com"));
    }

    #[test]
    fn missing_key_is_not_configured() {
        let config = AppConfig::default();
        let err = build_provider(&config, "anthropic").err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn builds_configured_provider() {
        let config = config_with_key("anthropic");
        let provider = build_provider(&config, "anthropic").unwrap();
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn shared_key_covers_both_providers() {
        let config = AppConfig {
            api_key: Some("sk-shared".into()),
            ..AppConfig::default()
        };
        let router = build_from_config(&config);
        assert_eq!(router.list(), vec!["anthropic", "openai"]);
        assert_eq!(router.default().unwrap().name(), "anthropic");
    }

    #[tokio::test]
    async fn placeholder_reports_missing_key() {
        let provider = build_or_placeholder(&AppConfig::default(), "openai");
        assert_eq!(provider.name(), "openai");
        let request = ProviderRequest {
            model: "gpt-4o".into(),
            system: String::new(),
            messages: vec![],
            temperature: 0.7,
            max_tokens: None,
            tools: vec![],
        };
        let err = provider.stream(request).await.err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn unknown_provider_rejected() {
        let config = config_with_key("mistral");
        assert!(build_provider(&config, "mistral").is_err());
    }
}
