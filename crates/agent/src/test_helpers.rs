//! Shared test helpers for orchestrator tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dawpilot_core::error::ProviderError;
use dawpilot_core::message::ToolCallRequest;
use dawpilot_core::provider::{ChunkReceiver, Provider, ProviderRequest, StopReason, StreamChunk, Usage};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::stream_event::AgentStreamEvent;

/// One scripted model response.
pub enum Step {
    Reply {
        text: String,
        tool_calls: Vec<ToolCallRequest>,
        /// Overrides the stop reason implied by `tool_calls`.
        stop: Option<StopReason>,
    },
    /// Reject the request with this HTTP status.
    Fail(u16),
    /// Open a stream that never finishes.
    Hang,
}

impl Step {
    pub fn text(text: &str) -> Self {
        Self::Reply {
            text: text.into(),
            tool_calls: vec![],
            stop: None,
        }
    }

    pub fn tools(calls: Vec<(&str, &str, Value)>) -> Self {
        Self::Reply {
            text: String::new(),
            tool_calls: calls
                .into_iter()
                .map(|(id, name, arguments)| ToolCallRequest {
                    id: id.into(),
                    name: name.into(),
                    arguments,
                })
                .collect(),
            stop: None,
        }
    }

    /// Tool calls in a reply that hit the token limit.
    pub fn cut_off(calls: Vec<(&str, &str, Value)>) -> Self {
        match Self::tools(calls) {
            Self::Reply { text, tool_calls, .. } => Self::Reply {
                text,
                tool_calls,
                stop: Some(StopReason::MaxTokens),
            },
            other => other,
        }
    }
}

/// A provider that plays back [`Step`]s in order.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ProviderRequest>>,
    calls: AtomicUsize,
    hung: Mutex<Vec<mpsc::Sender<Result<StreamChunk, ProviderError>>>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            hung: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider exhausted");

        let (tx, rx) = mpsc::channel(8);
        match step {
            Step::Fail(status) => return Err(ProviderError::from_status(status, "scripted failure")),
            Step::Hang => self.hung.lock().unwrap().push(tx),
            Step::Reply { text, tool_calls, stop } => {
                let stop = stop.unwrap_or(if tool_calls.is_empty() {
                    StopReason::EndTurn
                } else {
                    StopReason::ToolUse
                });
                if !text.is_empty() {
                    tx.send(Ok(StreamChunk::text(text))).await.unwrap();
                }
                tx.send(Ok(StreamChunk::finish(stop, tool_calls, Some(Usage::new(100, 20)))))
                    .await
                    .unwrap();
            }
        }
        Ok(rx)
    }
}

/// Drain a turn's event stream.
pub async fn collect(mut rx: mpsc::Receiver<AgentStreamEvent>) -> Vec<AgentStreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}
