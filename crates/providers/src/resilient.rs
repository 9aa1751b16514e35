//! Resilient model invocation: one streamed exchange with retry on
//! transient failures.
//!
//! Text deltas go to a caller-supplied [`TextSink`] as they arrive. Tool calls
//! are only returned once the provider signals the end of the message.
//! Retryable failures ([`ErrorKind::is_retryable`]) are retried with
//! exponential backoff and ±25% jitter; a notice is written to the same sink
//! before each backoff sleep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dawpilot_core::error::{ErrorKind, ProviderError};
use dawpilot_core::message::ToolCallRequest;
use dawpilot_core::provider::{Provider, ProviderRequest, StopReason, Usage};
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Receives streamed text, including retry notices.
#[async_trait]
pub trait TextSink: Send + Sync {
    async fn text(&self, chunk: &str);
}

#[async_trait]
impl TextSink for mpsc::Sender<String> {
    async fn text(&self, chunk: &str) {
        let _ = self.send(chunk.to_string()).await;
    }
}

/// Discards everything.
pub struct NullSink;

#[async_trait]
impl TextSink for NullSink {
    async fn text(&self, _chunk: &str) {}
}

/// Backoff schedule for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Relative jitter, 0.25 = ±25%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Randomized delay before retry `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let unit = rand::rng().random_range(-1.0..=1.0);
        self.delay_with(attempt, unit)
    }

    /// `base * 2^(attempt-1) * (1 + jitter * unit)` rounded to whole ms,
    /// with `unit` in `[-1, 1]`.
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let nominal = self.base_delay.as_millis() as f64 * 2f64.powi(exponent);
        let jittered = nominal * (1.0 + self.jitter * unit.clamp(-1.0, 1.0));
        Duration::from_millis(jittered.round().max(0.0) as u64)
    }
}

/// Everything one successful model exchange produced.
#[derive(Debug, Clone)]
pub struct ModelTurn {
    /// Text of the final (successful) attempt
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    /// 1 when the first attempt succeeded
    pub attempts: u32,
}

impl ModelTurn {
    /// The model stopped to call tools and actually named some.
    pub fn wants_tools(&self) -> bool {
        self.stop_reason.wants_tools() && !self.tool_calls.is_empty()
    }
}

/// Wraps a provider with streaming accumulation and retry.
///
/// Holds no state across calls.
#[derive(Clone)]
pub struct ModelInvoker {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl ModelInvoker {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one model exchange, retrying transient failures.
    ///
    /// A failure after text was already streamed is retried too; the sink
    /// will then see the partial text, the retry notice, and the new attempt.
    pub async fn invoke(
        &self,
        request: &ProviderRequest,
        sink: &dyn TextSink,
    ) -> Result<ModelTurn, ProviderError> {
        let mut retries = 0u32;

        loop {
            match self.attempt(request, sink).await {
                Ok(mut turn) => {
                    turn.attempts = retries + 1;
                    debug!(
                        provider = self.provider.name(),
                        attempts = turn.attempts,
                        tool_calls = turn.tool_calls.len(),
                        "Model turn complete"
                    );
                    return Ok(turn);
                }
                Err(err) => {
                    let kind = err.kind();
                    if !kind.is_retryable() || retries >= self.policy.max_retries {
                        warn!(
                            provider = self.provider.name(),
                            kind = %kind,
                            retries,
                            error = %err,
                            "Model invocation failed"
                        );
                        return Err(err);
                    }

                    retries += 1;
                    let delay = self.policy.delay_for(retries);
                    info!(
                        provider = self.provider.name(),
                        kind = %kind,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying model invocation"
                    );
                    sink.text(&retry_notice(kind, retries, self.policy.max_retries, delay))
                        .await;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: &ProviderRequest,
        sink: &dyn TextSink,
    ) -> Result<ModelTurn, ProviderError> {
        let mut rx = self.provider.stream(request.clone()).await?;
        let mut text = String::new();

        while let Some(item) = rx.recv().await {
            let chunk = item?;

            if let Some(delta) = chunk.content.as_deref()
                && !delta.is_empty()
            {
                text.push_str(delta);
                sink.text(delta).await;
            }

            if chunk.done {
                return Ok(ModelTurn {
                    text,
                    tool_calls: chunk.tool_calls,
                    stop_reason: chunk.stop_reason.unwrap_or(StopReason::EndTurn),
                    usage: chunk.usage.unwrap_or_default(),
                    attempts: 1,
                });
            }
        }

        Err(ProviderError::StreamInterrupted(
            "provider stream closed without a final chunk".into(),
        ))
    }
}

/// The visible line written before a backoff sleep.
pub fn retry_notice(kind: ErrorKind, retry: u32, max_retries: u32, delay: Duration) -> String {
    format!(
        "\n[{} Retrying in {:.1}s ({retry}/{max_retries})]\n",
        kind.user_message(),
        delay.as_secs_f64()
    )
}
