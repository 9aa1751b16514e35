//! Thread-safe usage accounting for the active conversation.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::model::{CostSummary, InvocationCost, ModelCost};
use crate::pricing::PricingTable;

/// Prices each model invocation and keeps running totals until reset.
pub struct TelemetryEngine {
    pricing: PricingTable,
    totals: RwLock<RunningTotals>,
}

#[derive(Debug)]
struct RunningTotals {
    since: DateTime<Utc>,
    by_model: HashMap<String, ModelCost>,
}

impl RunningTotals {
    fn fresh() -> Self {
        Self {
            since: Utc::now(),
            by_model: HashMap::new(),
        }
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryEngine {
    /// Create a new telemetry engine with default pricing.
    pub fn new() -> Self {
        Self::with_pricing(PricingTable::with_defaults())
    }

    pub fn with_pricing(pricing: PricingTable) -> Self {
        Self {
            pricing,
            totals: RwLock::new(RunningTotals::fresh()),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Price one invocation and add it to the running totals.
    pub fn record(&self, model: &str, input_tokens: u32, output_tokens: u32) -> InvocationCost {
        let cost_usd = self.pricing.compute_cost(model, input_tokens, output_tokens);
        if self.pricing.get(model).is_none() {
            tracing::debug!(model, "No pricing for model; cost recorded as zero");
        }

        let mut totals = self.totals.write().unwrap_or_else(|e| e.into_inner());
        let entry = totals
            .by_model
            .entry(model.to_string())
            .or_insert_with(|| ModelCost {
                model: model.to_string(),
                ..ModelCost::default()
            });
        entry.cost_usd += cost_usd;
        entry.input_tokens += u64::from(input_tokens);
        entry.output_tokens += u64::from(output_tokens);
        entry.calls += 1;

        InvocationCost {
            input_tokens,
            output_tokens,
            cost_usd,
        }
    }

    pub fn summary(&self) -> CostSummary {
        let totals = self.totals.read().unwrap_or_else(|e| e.into_inner());
        let mut by_model: Vec<ModelCost> = totals.by_model.values().cloned().collect();
        by_model.sort_by(|a, b| {
            b.cost_usd
                .total_cmp(&a.cost_usd)
                .then_with(|| a.model.cmp(&b.model))
        });

        let total_input_tokens = by_model.iter().map(|m| m.input_tokens).sum();
        let total_output_tokens = by_model.iter().map(|m| m.output_tokens).sum();
        CostSummary {
            total_cost_usd: by_model.iter().map(|m| m.cost_usd).sum(),
            total_input_tokens,
            total_output_tokens,
            total_tokens: total_input_tokens + total_output_tokens,
            llm_calls: by_model.iter().map(|m| m.calls).sum(),
            by_model,
            since: totals.since,
        }
    }

    /// Start a new accounting window.
    pub fn reset(&self) {
        *self.totals.write().unwrap_or_else(|e| e.into_inner()) = RunningTotals::fresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_prices_and_accumulates() {
        let engine = TelemetryEngine::new();
        let first = engine.record("claude-sonnet-4-6", 1000, 500);
        assert!((first.cost_usd - 0.0105).abs() < 1e-10);
        engine.record("claude-sonnet-4-6", 2000, 0);
        engine.record("gpt-4o", 1_000_000, 0);

        let summary = engine.summary();
        assert_eq!(summary.llm_calls, 3);
        assert_eq!(summary.total_input_tokens, 1_003_000);
        assert_eq!(summary.total_output_tokens, 500);
        assert_eq!(summary.total_tokens, 1_003_500);
        assert_eq!(summary.by_model[0].model, "gpt-4o");
        assert_eq!(summary.by_model[1].calls, 2);
        assert!((summary.total_cost_usd - (2.5 + 0.0105 + 0.006)).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_counts_tokens_only() {
        let engine = TelemetryEngine::new();
        let cost = engine.record("local-llama", 100, 100);
        assert_eq!(cost.cost_usd, 0.0);
        assert_eq!(engine.summary().total_tokens, 200);
    }

    #[test]
    fn reset_clears_totals() {
        let engine = TelemetryEngine::new();
        engine.record("gpt-4o", 10, 10);
        let before = engine.summary().since;
        engine.reset();
        let summary = engine.summary();
        assert_eq!(summary.llm_calls, 0);
        assert!(summary.by_model.is_empty());
        assert!(summary.since >= before);
    }
}
