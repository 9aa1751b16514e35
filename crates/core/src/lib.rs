//! # DawPilot Core
//!
//! Domain types, traits, and error definitions shared by every DawPilot crate.
//! This crate has **zero framework dependencies**: it defines the conversation
//! model, the provider and local-tool seams, and the cached session context.
//!
//! Implementations live in their respective crates (providers, tools, agent),
//! all depending inward on core.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{ConversationHistory, Message, MessageBody, Segment, ToolCallRequest, ToolCallResult};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, StopReason, StreamChunk, ToolDefinition, Usage};
pub use session::{ContextDepth, SessionContext, SessionStore};
pub use tool::{LocalTool, ToolRegistry, ToolSpec};
