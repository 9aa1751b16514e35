//! LLM Provider implementations for DawPilot.
//!
//! All providers implement the `dawpilot_core::Provider` trait.
//! The router selects the correct provider based on configuration, and
//! [`ModelInvoker`] adds streaming accumulation and retry on top.

pub mod anthropic;
pub mod openai_compat;
pub mod resilient;
pub mod router;
mod sse;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use resilient::{ModelInvoker, ModelTurn, NullSink, RetryPolicy, TextSink};
pub use router::{ProviderRouter, UnconfiguredProvider, build_from_config, build_or_placeholder, build_provider};
