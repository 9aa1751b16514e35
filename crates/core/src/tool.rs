//! Tool catalog types and the local-resolution seam.
//!
//! Every tool the model may call is described by a [`ToolSpec`] in the
//! [`ToolRegistry`]. Most tools are executed by the external executor; a few
//! can be answered in-process by a [`LocalTool`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::message::{ToolCallRequest, ToolCallResult};
use crate::provider::ToolDefinition;

/// Static description of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema describing this tool's parameters.
    pub parameters: serde_json::Value,
    /// Requires `confirmed: true` before it may run.
    #[serde(default)]
    pub destructive: bool,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            destructive: false,
        }
    }

    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    /// Convert into a ToolDefinition for sending to the LLM.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// A tool answerable from in-process data.
///
/// Returning `None` means "not resolvable right now"; the caller then
/// forwards the call to the external executor.
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// The tool name this handler answers.
    fn name(&self) -> &str;

    async fn resolve(&self, call: &ToolCallRequest) -> Option<ToolCallResult>;
}

/// A registry of available tools, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name in place.
    pub fn register(&mut self, spec: ToolSpec) {
        match self.index.get(&spec.name) {
            Some(&pos) => self.specs[pos] = spec,
            None => {
                self.index.insert(spec.name.clone(), self.specs.len());
                self.specs.push(spec);
            }
        }
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, spec: ToolSpec) -> Self {
        self.register(spec);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&pos| &self.specs[pos])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn is_destructive(&self, name: &str) -> bool {
        self.get(name).is_some_and(|s| s.destructive)
    }

    pub fn destructive_names(&self) -> Vec<&str> {
        self.specs
            .iter()
            .filter(|s| s.destructive)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.specs.iter().map(ToolSpec::to_definition).collect()
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str) -> ToolSpec {
        ToolSpec::new(name, format!("{name} tool"), json!({"type": "object"}))
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = ToolRegistry::new().with(spec("set_tempo"));
        assert!(registry.get("set_tempo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_keeps_registration_order() {
        let registry = ToolRegistry::new()
            .with(spec("b"))
            .with(spec("a"))
            .with(spec("c"));
        assert_eq!(registry.names(), vec!["b", "a", "c"]);
        let defs = registry.definitions();
        assert_eq!(defs[1].name, "a");
    }

    #[test]
    fn reregistering_replaces_in_place() {
        let mut registry = ToolRegistry::new().with(spec("a")).with(spec("b"));
        registry.register(spec("a").destructive());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.is_destructive("a"));
    }

    #[test]
    fn destructive_flags() {
        let registry = ToolRegistry::new()
            .with(spec("delete_track").destructive())
            .with(spec("set_tempo"));
        assert!(registry.is_destructive("delete_track"));
        assert!(!registry.is_destructive("set_tempo"));
        assert!(!registry.is_destructive("unknown"));
        assert_eq!(registry.destructive_names(), vec!["delete_track"]);
    }
}
