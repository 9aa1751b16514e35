//! Cached session context pushed by the host application.
//!
//! The host owns the live session; we only keep the most recent snapshot.
//! Every update swaps in a new [`SessionContext`], so readers holding an older
//! `Arc` keep a consistent view.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

/// Level of detail used when projecting a session snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextDepth {
    Minimal,
    #[default]
    Standard,
    Detailed,
    Full,
}

impl ContextDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Standard => "standard",
            Self::Detailed => "detailed",
            Self::Full => "full",
        }
    }
}

impl FromStr for ContextDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "standard" => Ok(Self::Standard),
            "detailed" => Ok(Self::Detailed),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown context depth '{other}'")),
        }
    }
}

impl std::fmt::Display for ContextDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable view of the host session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Full state tree as last pushed by the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,

    /// Free-text description of the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Latest audio analysis result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_analysis: Option<serde_json::Value>,
}

impl SessionContext {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.summary.is_none() && self.audio_analysis.is_none()
    }
}

/// Holder for the current [`SessionContext`].
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<Arc<SessionContext>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent snapshot.
    pub fn snapshot(&self) -> Arc<SessionContext> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the state tree.
    pub fn set_state(&self, state: serde_json::Value) {
        self.update(|ctx| ctx.state = Some(state));
    }

    pub fn set_summary(&self, summary: impl Into<String>) {
        let summary = summary.into();
        self.update(|ctx| ctx.summary = (!summary.trim().is_empty()).then_some(summary));
    }

    pub fn set_audio_analysis(&self, analysis: serde_json::Value) {
        self.update(|ctx| ctx.audio_analysis = Some(analysis));
    }

    /// Drop everything.
    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(SessionContext::default());
    }

    fn update(&self, apply: impl FnOnce(&mut SessionContext)) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut next = SessionContext::clone(&guard);
        apply(&mut next);
        *guard = Arc::new(next);
    }
}
