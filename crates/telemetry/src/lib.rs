//! Cost tracking for model invocations.
//!
//! Prices every call with the built-in table and keeps cumulative totals for
//! the active conversation.

pub mod engine;
pub mod model;
pub mod pricing;

pub use engine::TelemetryEngine;
pub use model::{CostSummary, InvocationCost, ModelCost};
pub use pricing::{ModelPricing, PricingTable};
