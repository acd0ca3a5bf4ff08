//! Mapping upstream failures onto the router's error taxonomy.
//!
//! Status codes are checked first; the error payload only refines the
//! answer (a 500 that says "overloaded" is treated as overload, not as a
//! generic failure).

use std::time::Duration;

use relay_core::RelayError;

use crate::openai_types::ApiErrorEnvelope;

/// Longest body excerpt kept in an error message.
const MAX_BODY_EXCERPT: usize = 200;

/// Classify a non-success HTTP response.
pub fn classify_status(
    provider: &str,
    status: u16,
    body: &str,
    retry_after_secs: Option<u64>,
    timeout: Duration,
) -> RelayError {
    let detail = error_detail(body);
    let lower = detail.to_lowercase();

    match status {
        429 => RelayError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs,
        },
        503 | 529 => RelayError::ServerOverloaded {
            provider: provider.to_string(),
            status: Some(status),
            message: format!("HTTP {status}: {detail}"),
        },
        408 | 504 => RelayError::timeout(provider, timeout),
        500..=599 if mentions_overload(&lower) => RelayError::ServerOverloaded {
            provider: provider.to_string(),
            status: Some(status),
            message: format!("HTTP {status}: {detail}"),
        },
        _ => RelayError::provider(provider, format!("HTTP {status}: {detail}")),
    }
}

/// Classify an error reported inside an otherwise successful response.
pub fn classify_message(provider: &str, message: &str, timeout: Duration) -> RelayError {
    let lower = message.to_lowercase();

    if lower.contains("rate limit") || lower.contains("too many requests") {
        RelayError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs: None,
        }
    } else if mentions_overload(&lower) {
        RelayError::ServerOverloaded {
            provider: provider.to_string(),
            status: None,
            message: message.to_string(),
        }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        RelayError::timeout(provider, timeout)
    } else {
        RelayError::provider(provider, message)
    }
}

/// Classify a transport-level failure.
pub fn classify_transport(provider: &str, err: &reqwest::Error, timeout: Duration) -> RelayError {
    if err.is_timeout() {
        RelayError::timeout(provider, timeout)
    } else if err.is_connect() {
        RelayError::provider(provider, format!("connection failed: {err}"))
    } else if err.is_decode() {
        RelayError::provider(provider, format!("malformed response: {err}"))
    } else {
        RelayError::provider(provider, err.to_string())
    }
}

fn mentions_overload(lower: &str) -> bool {
    lower.contains("overload") || lower.contains("capacity")
}

/// Prefer the structured `error.message`; fall back to a body excerpt.
fn error_detail(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(body) {
        return envelope.error.message;
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_BODY_EXCERPT {
        let excerpt: String = trimmed.chars().take(MAX_BODY_EXCERPT).collect();
        format!("{excerpt}...")
    } else if trimmed.is_empty() {
        "<empty body>".to_string()
    } else {
        trimmed.to_string()
    }
}
