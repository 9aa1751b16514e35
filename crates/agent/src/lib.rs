//! The assistant loop for dawpilot.
//!
//! A turn runs **invoke → gate → handle → feed back** until the model stops
//! asking for tools:
//!
//! 1. **Build the request** from history, tool catalog and cached session context
//! 2. **Invoke the model** through the retrying [`ModelInvoker`](dawpilot_providers::ModelInvoker)
//! 3. **For each tool call**: destructive gate, local handler, else relay to
//!    the host through the [`ActionBroker`]
//! 4. **Append the results** as one batch and loop back to step 2
//!
//! Everything the caller sees arrives as [`AgentStreamEvent`]s.

pub mod broker;
pub mod loop_runner;
pub mod prompt;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use broker::{ActionBroker, ActionReport, ActionRequest};
pub use loop_runner::{BUSY_MESSAGE, Orchestrator, ROUND_LIMIT_NOTICE, TurnOutcome, TurnSettings};
pub use stream_event::AgentStreamEvent;
