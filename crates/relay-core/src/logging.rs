//! Logging infrastructure for Relay.
//!
//! Structured logging using the `tracing` ecosystem. The router and breakers
//! emit events with fixed targets (`relay::router`, `relay::breaker`) so a
//! subscriber can route or filter them without parsing messages.
//!
//! ## Features
//!
//! - JSON lines written to `~/.relay/logs/relay.log` (daily rotation)
//! - Compact console output on stderr
//! - `RUST_LOG` overrides the default filter
//!
//! ## Example
//!
//! ```no_run
//! use relay_core::logging;
//!
//! let _guard = logging::init_logging(None, false).expect("logging init");
//! tracing::info!(provider = "deepseek", "router ready");
//! ```

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{RelayError, Result};

/// Guard that must be held to ensure log flushing on shutdown.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the Relay logging system.
///
/// Sets up JSON file logging under `log_dir` (default `~/.relay/logs/`) and
/// human-readable console logging on stderr. `verbose` switches the default
/// level from INFO to DEBUG.
///
/// The returned [`LogGuard`] must stay alive for the application lifetime.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };

    std::fs::create_dir_all(&log_dir).map_err(|e| RelayError::DirectoryCreation {
        path: log_dir.clone(),
        source: e,
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "relay.log");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_span_list(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_file(verbose)
        .with_line_number(verbose)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::debug!(log_dir = %log_dir.display(), verbose, "logging initialized");

    Ok(LogGuard {
        _file_guard: Some(file_guard),
    })
}

/// Filter directive used when `RUST_LOG` is unset.
///
/// Covers the binary and every `relay_*` crate.
pub fn default_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!(
        "relay={level},relay_core={level},relay_config={level},relay_providers={level},relay_router={level}"
    )
}

/// Initialize minimal console-only logging for tests.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Returns `~/.relay/logs/`.
pub fn default_log_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| RelayError::Internal {
        message: "HOME environment variable not set".into(),
    })?;

    Ok(PathBuf::from(home).join(".relay").join("logs"))
}

/// Log a routing decision or outcome.
///
/// # Example
///
/// ```ignore
/// log_route_event!("deepseek", "fallback");
/// log_route_event!("deepseek", "attempt_failed", attempt = 2, error = %err);
/// ```
#[macro_export]
macro_rules! log_route_event {
    ($provider:expr, $event:expr) => {
        tracing::info!(
            target: "relay::router",
            provider = $provider,
            event = $event,
            "route event"
        )
    };
    ($provider:expr, $event:expr, $($field:tt)*) => {
        tracing::info!(
            target: "relay::router",
            provider = $provider,
            event = $event,
            $($field)*,
            "route event"
        )
    };
}

/// Log a circuit breaker state transition.
///
/// # Example
///
/// ```ignore
/// log_breaker_transition!("deepseek", CircuitState::Closed, CircuitState::Open, failures = 5);
/// ```
#[macro_export]
macro_rules! log_breaker_transition {
    ($provider:expr, $from:expr, $to:expr) => {
        tracing::warn!(
            target: "relay::breaker",
            provider = $provider,
            from = %$from,
            to = %$to,
            "circuit transition"
        )
    };
    ($provider:expr, $from:expr, $to:expr, $($field:tt)*) => {
        tracing::warn!(
            target: "relay::breaker",
            provider = $provider,
            from = %$from,
            to = %$to,
            $($field)*,
            "circuit transition"
        )
    };
}
