//! Usage and cost summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tokens and cost of one model invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InvocationCost {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Estimated cost in USD; 0.0 for unpriced models.
    pub cost_usd: f64,
}

/// Cumulative usage of the active conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_cost_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    /// Number of model invocations.
    pub llm_calls: u64,
    /// Cost breakdown by model, most expensive first.
    pub by_model: Vec<ModelCost>,
    /// Start of the accounting window (last reset).
    pub since: DateTime<Utc>,
}

/// Cost breakdown for a single model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCost {
    pub model: String,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub calls: u64,
}
