//! Error types for the DawPilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Provider failures additionally carry a coarse [`ErrorKind`] that drives
//! the retry policy and is what the caller-facing stream reports.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all DawPilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Turn control ---
    #[error("A turn is already in progress")]
    Busy,

    #[error("Turn cancelled: {0}")]
    Cancelled(String),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Coarse classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthError,
    RateLimit,
    Overloaded,
    ServerError,
    NetworkError,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthError => "auth_error",
            Self::RateLimit => "rate_limit",
            Self::Overloaded => "overloaded",
            Self::ServerError => "server_error",
            Self::NetworkError => "network_error",
            Self::UnknownError => "unknown_error",
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Overloaded | Self::ServerError | Self::NetworkError
        )
    }

    /// Short text suitable for showing to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AuthError => "Invalid API key. Check the provider settings.",
            Self::RateLimit => "Rate limited by the model provider.",
            Self::Overloaded => "The model provider is overloaded.",
            Self::ServerError => "The model provider returned a server error.",
            Self::NetworkError => "Could not reach the model provider.",
            Self::UnknownError => "Unexpected error from the model provider.",
        }
    }

    /// Map an HTTP status code to a kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::AuthError,
            429 => Self::RateLimit,
            503 | 529 => Self::Overloaded,
            s if s >= 500 => Self::ServerError,
            _ => Self::UnknownError,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProviderError {
    /// Build the error variant matching an HTTP failure status.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match ErrorKind::from_status(status_code) {
            ErrorKind::AuthError => Self::AuthenticationFailed(message),
            ErrorKind::RateLimit => Self::RateLimited { retry_after_secs: 0 },
            ErrorKind::Overloaded => Self::Overloaded(message),
            _ => Self::ApiError { status_code, message },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ApiError { status_code, .. } => ErrorKind::from_status(*status_code),
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Overloaded(_) => ErrorKind::Overloaded,
            Self::AuthenticationFailed(_) => ErrorKind::AuthError,
            Self::StreamInterrupted(_) | Self::Timeout(_) | Self::Network(_) => {
                ErrorKind::NetworkError
            }
            Self::ModelNotFound(_) | Self::NotConfigured(_) => ErrorKind::UnknownError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool blocked: {tool_name}: {reason}")]
    Blocked { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 500,
            message: "upstream exploded".into(),
        });
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[test]
    fn status_codes_classify() {
        assert_eq!(ErrorKind::from_status(401), ErrorKind::AuthError);
        assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimit);
        assert_eq!(ErrorKind::from_status(529), ErrorKind::Overloaded);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::Overloaded);
        assert_eq!(ErrorKind::from_status(500), ErrorKind::ServerError);
        assert_eq!(ErrorKind::from_status(502), ErrorKind::ServerError);
        assert_eq!(ErrorKind::from_status(400), ErrorKind::UnknownError);
    }

    #[test]
    fn only_transient_kinds_retry() {
        assert!(!ErrorKind::AuthError.is_retryable());
        assert!(!ErrorKind::UnknownError.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(ErrorKind::Overloaded.is_retryable());
        assert!(ErrorKind::ServerError.is_retryable());
        assert!(ErrorKind::NetworkError.is_retryable());
    }

    #[test]
    fn from_status_picks_variant() {
        assert!(matches!(
            ProviderError::from_status(429, "slow down"),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(403, "nope"),
            ProviderError::AuthenticationFailed(_)
        ));
        let err = ProviderError::from_status(418, "teapot");
        assert_eq!(err.kind(), ErrorKind::UnknownError);
    }

    #[test]
    fn transport_failures_are_network_errors() {
        assert_eq!(
            ProviderError::Network("connection refused".into()).kind(),
            ErrorKind::NetworkError
        );
        assert_eq!(
            ProviderError::StreamInterrupted("eof".into()).kind(),
            ErrorKind::NetworkError
        );
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimit).unwrap();
        assert_eq!(json, "\"rate_limit\"");
    }
}
