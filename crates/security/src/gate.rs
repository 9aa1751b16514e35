//! Destructive action gate.
//!
//! A destructive tool call passes only when its arguments carry
//! `confirmed: true` as a JSON boolean. Anything else (missing, `false`,
//! `"true"`, `1`) is blocked before it can reach the host.

use std::collections::HashSet;

use dawpilot_core::message::ToolCallResult;
use dawpilot_core::tool::ToolRegistry;
use serde_json::Value;

/// Error text returned to the model for a blocked call.
pub const BLOCKED_MESSAGE: &str = "Destructive action blocked: you must ask the user for confirmation first, then call this tool again with confirmed: true.";

/// Outcome of [`DestructiveGate::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Block,
}

impl GateDecision {
    pub fn is_blocked(self) -> bool {
        self == Self::Block
    }
}

#[derive(Debug, Clone, Default)]
pub struct DestructiveGate {
    destructive: HashSet<String>,
}

impl DestructiveGate {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            destructive: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Gate every tool the registry flags as destructive.
    pub fn from_registry(registry: &ToolRegistry) -> Self {
        Self::new(registry.destructive_names())
    }

    pub fn is_destructive(&self, name: &str) -> bool {
        self.destructive.contains(name)
    }

    pub fn check(&self, name: &str, arguments: &Value) -> GateDecision {
        if !self.is_destructive(name) {
            return GateDecision::Allow;
        }
        match arguments.get("confirmed") {
            Some(Value::Bool(true)) => GateDecision::Allow,
            _ => GateDecision::Block,
        }
    }

    /// The synthesized result for a blocked call.
    pub fn block_result(id: impl Into<String>) -> ToolCallResult {
        ToolCallResult::error(id, BLOCKED_MESSAGE)
    }
}
