//! Request routing for Relay.
//!
//! This crate decides which provider and model serve a completion request,
//! and keeps serving when a provider misbehaves.
//!
//! # Overview
//!
//! - [`ComplexityAnalyzer`] scores a prompt and recommends a model tier and
//!   timeout
//! - [`CircuitBreaker`] stops calling a provider after repeated failures and
//!   tries it again after a cool-down
//! - [`RequestRouter`] retries the primary, then falls back once
//! - [`StatsCollector`] counts attempts, fallbacks and errors
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │    RequestRouter     │
//! │  (plan, retry, fall  │
//! │   back, record)      │
//! └──────────┬───────────┘
//!            │
//!     ┌──────┴───────┐
//!     ▼              ▼
//! ┌─────────┐   ┌──────────┐
//! │ Breaker │   │ Breaker  │
//! │ primary │   │ fallback │
//! └────┬────┘   └────┬─────┘
//!      ▼             ▼
//! ┌─────────┐   ┌──────────┐
//! │ Provider│   │ Provider │
//! │ client  │   │ client   │
//! └─────────┘   └──────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use relay_config::RelayConfig;
//! use relay_router::RequestRouter;
//!
//! #[tokio::main]
//! async fn main() -> relay_core::Result<()> {
//!     let config = RelayConfig::load(None)?;
//!     let router = RequestRouter::from_config(&config)?;
//!
//!     let text = router.call_prompt("Explain TCP slow start").await?;
//!     println!("{text}");
//!
//!     let stats = router.snapshot();
//!     println!("fallbacks: {}", stats.total_fallbacks);
//!     Ok(())
//! }
//! ```

pub mod circuit_breaker;
pub mod complexity;
pub mod router;
pub mod stats;

pub use circuit_breaker::{
    BreakerConfig, CircuitBreaker, CircuitState, Permit, ProviderHealth, TransitionObserver,
};
pub use complexity::{ComplexityAnalysis, ComplexityAnalyzer};
pub use router::{Completion, RequestRouter};
pub use stats::{ErrorRecord, ProviderStats, StatsCollector, TierStats, UsageStats};

pub use relay_core::CallBudget;
pub use tokio_util::sync::CancellationToken;
