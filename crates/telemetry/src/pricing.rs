//! Built-in pricing table for the supported models.
//!
//! Prices are in USD per 1 million tokens. Each model has an input and
//! output price. Extra entries can be added at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let defaults = [
            // Anthropic
            ("claude-opus-4-6", 15.0, 75.0),
            ("claude-sonnet-4-6", 3.0, 15.0),
            ("claude-haiku-4-5", 0.8, 4.0),
            // OpenAI
            ("gpt-4o", 2.5, 10.0),
            ("gpt-4o-mini", 0.15, 0.6),
            ("gpt-4.1", 2.0, 8.0),
            ("gpt-4.1-mini", 0.4, 1.6),
            ("gpt-4.1-nano", 0.1, 0.4),
        ];

        let prices = defaults
            .into_iter()
            .map(|(model, input, output)| (model.to_string(), ModelPricing::new(input, output)))
            .collect();

        Self {
            prices: RwLock::new(prices),
        }
    }

    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve pricing for a model id.
    ///
    /// Tries an exact match, then the id without any `provider/` prefix, then
    /// the longest known id contained in the requested one
    /// (`claude-sonnet-4-6-20260101` resolves to `claude-sonnet-4-6`).
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());

        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        let lower = model.to_lowercase();
        let bare = lower.rsplit('/').next().unwrap_or(&lower);
        if let Some(p) = prices.get(bare) {
            return Some(*p);
        }

        prices
            .iter()
            .filter(|(key, _)| bare.contains(key.to_lowercase().as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, p)| *p)
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.insert(model.into(), pricing);
    }

    /// Compute cost for a model call, returning 0.0 if the model is unknown.
    pub fn compute_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.get(model)
            .map(|p| p.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    /// List all known model names.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    #[test]
    fn default_table_has_models() {
        let table = PricingTable::with_defaults();
        assert_eq!(table.len(), 8);
        assert!(table.models().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn known_model_cost() {
        let table = PricingTable::with_defaults();
        // (1000 * 3.0 + 500 * 15.0) / 1M
        let cost = table.compute_cost("claude-sonnet-4-6", 1000, 500);
        assert!(close(cost, 0.0105));
    }

    #[test]
    fn longest_match_wins() {
        let table = PricingTable::with_defaults();
        assert!(close(table.compute_cost("gpt-4o-mini-2024-07-18", 1_000_000, 0), 0.15));
        assert!(close(table.compute_cost("gpt-4.1-nano", 0, 1_000_000), 0.4));
        assert!(close(table.compute_cost("gpt-4o-2024-11-20", 1_000_000, 0), 2.5));
        assert!(close(table.compute_cost("claude-opus-4-6-20260201", 1_000_000, 0), 15.0));
    }

    #[test]
    fn provider_prefix_is_ignored() {
        let table = PricingTable::with_defaults();
        assert!(close(table.compute_cost("openai/gpt-4.1-mini", 1_000_000, 0), 0.4));
    }

    #[test]
    fn unknown_model_returns_zero() {
        let table = PricingTable::with_defaults();
        assert!(table.get("mistral-large").is_none());
        assert!(close(table.compute_cost("mistral-large", 1000, 500), 0.0));
    }

    #[test]
    fn custom_pricing_overrides() {
        let table = PricingTable::empty();
        assert!(table.is_empty());
        table.set("custom-model", ModelPricing::new(1.0, 2.0));
        assert!(close(table.compute_cost("custom-model", 1_000_000, 1_000_000), 3.0));

        table.set("custom-model", ModelPricing::new(5.0, 20.0));
        assert!(close(table.compute_cost("custom-model", 1_000_000, 0), 5.0));
    }
}
