//! Safety policy for actions the model sends to the host.
//!
//! - **Gate**: destructive tools need an explicit `confirmed: true`
//! - **Audit logging**: structured record of gate decisions and executor traffic

pub mod audit;
pub mod gate;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use gate::{BLOCKED_MESSAGE, DestructiveGate, GateDecision};
