//! Error types for Relay operations.
//!
//! [`RelayError`] covers the provider failure taxonomy the router reasons
//! about (timeouts, rate limits, overload, open circuits) as well as the
//! configuration and logging failures of the surrounding stack. Each variant
//! knows whether the retry loop should try again via
//! [`RelayError::retry_decision`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::recovery::RetryDecision;

/// Result type alias using [`RelayError`].
pub type Result<T> = std::result::Result<T, RelayError>;

/// Error type for all Relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// The provider did not answer within the request deadline.
    #[error("{provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    /// The provider throttled the request.
    #[error("{provider} rate limit exceeded{}", retry_after_hint(*.retry_after_secs))]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// The provider reported capacity exhaustion.
    #[error("{provider} is overloaded: {message}")]
    ServerOverloaded {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Any other transport or protocol failure.
    #[error("{provider} request failed: {message}")]
    Provider { provider: String, message: String },

    // =========================================================================
    // Routing Errors
    // =========================================================================
    /// The provider's circuit breaker rejected the call.
    #[error("Circuit open for {provider}, call rejected")]
    CircuitOpen { provider: String },

    /// Every provider in the chain failed for this call.
    #[error("All providers failed (primary: {primary}; fallback: {fallback})")]
    AllProvidersFailed {
        primary: Box<RelayError>,
        fallback: Box<RelayError>,
    },

    /// The caller's deadline passed or the call was cancelled.
    #[error("Call cancelled: {reason}")]
    Cancelled { reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file not found
    #[error("Configuration not found at {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration file is invalid YAML
    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    /// API key environment variable is unset or empty
    #[error("Missing API key for {provider}: set {env_var}")]
    MissingApiKey { provider: String, env_var: String },

    /// A complexity pattern failed to compile
    #[error("Invalid complexity pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Directory creation failed
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Internal error (should not happen)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn retry_after_hint(secs: Option<u64>) -> String {
    match secs {
        Some(secs) => format!(" (retry after {secs}s)"),
        None => String::new(),
    }
}

impl RelayError {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a timeout error for a provider.
    pub fn timeout(provider: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            provider: provider.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a generic provider failure.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a circuit-open rejection.
    pub fn circuit_open(provider: impl Into<String>) -> Self {
        Self::CircuitOpen {
            provider: provider.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create a config validation error.
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a config not found error.
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// How the retry loop should react to this error.
    ///
    /// Timeouts and generic provider failures are transient. Rate limits,
    /// overload and open circuits end the current provider's attempts so the
    /// router can move on to the next provider.
    pub fn retry_decision(&self) -> RetryDecision {
        match self {
            Self::Timeout { .. } | Self::Provider { .. } => RetryDecision::Retry,
            _ => RetryDecision::FailFast,
        }
    }

    /// Whether this outcome should count against a circuit breaker.
    ///
    /// Rejections by the breaker itself and caller cancellations say nothing
    /// about the provider's health.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, Self::CircuitOpen { .. } | Self::Cancelled { .. })
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this is a breaker rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Name of the provider this error originated from, if any.
    pub fn provider_name(&self) -> Option<&str> {
        match self {
            Self::Timeout { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::ServerOverloaded { provider, .. }
            | Self::Provider { provider, .. }
            | Self::CircuitOpen { provider } => Some(provider),
            _ => None,
        }
    }

    /// Short machine-friendly label used in logs and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerOverloaded { .. } => "server_overloaded",
            Self::Provider { .. } => "provider",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::AllProvidersFailed { .. } => "all_providers_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::ConfigNotFound { .. }
            | Self::ConfigInvalid { .. }
            | Self::ConfigValidation { .. }
            | Self::MissingApiKey { .. }
            | Self::InvalidPattern { .. } => "config",
            Self::DirectoryCreation { .. } => "io",
            Self::Internal { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retried() {
        let timeout = RelayError::timeout("deepseek", Duration::from_secs(60));
        assert_eq!(timeout.retry_decision(), RetryDecision::Retry);
        assert_eq!(timeout.to_string(), "deepseek timed out after 60000ms");

        let generic = RelayError::provider("deepseek", "connection reset");
        assert_eq!(generic.retry_decision(), RetryDecision::Retry);
    }

    #[test]
    fn test_throttling_fails_fast() {
        let rate = RelayError::RateLimited {
            provider: "deepseek".into(),
            retry_after_secs: Some(30),
        };
        assert_eq!(rate.retry_decision(), RetryDecision::FailFast);
        assert!(rate.to_string().contains("retry after 30s"));

        let overload = RelayError::ServerOverloaded {
            provider: "deepseek".into(),
            status: Some(503),
            message: "busy".into(),
        };
        assert_eq!(overload.retry_decision(), RetryDecision::FailFast);
        assert_eq!(
            RelayError::circuit_open("openai").retry_decision(),
            RetryDecision::FailFast
        );
    }

    #[test]
    fn test_circuit_open_is_not_a_failure() {
        assert!(!RelayError::circuit_open("openai").counts_as_failure());
        assert!(!RelayError::cancelled("deadline").counts_as_failure());
        assert!(RelayError::provider("openai", "boom").counts_as_failure());
    }

    #[test]
    fn test_all_providers_failed_mentions_both() {
        let err = RelayError::AllProvidersFailed {
            primary: Box::new(RelayError::provider("deepseek", "503 from upstream")),
            fallback: Box::new(RelayError::timeout("openai", Duration::from_secs(90))),
        };
        let msg = err.to_string();
        assert!(msg.contains("503 from upstream"));
        assert!(msg.contains("openai timed out"));
        assert_eq!(err.kind(), "all_providers_failed");
        assert_eq!(err.provider_name(), None);
    }
}
