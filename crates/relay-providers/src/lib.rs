//! # relay-providers
//!
//! Clients for the upstream text-generation providers behind the Relay
//! router.
//!
//! - [`ProviderClient`] - One attempt against one provider, no internal retry
//! - [`OpenAiCompatibleClient`] - DeepSeek/OpenAI chat completions over HTTP
//! - [`ScriptedProvider`] - Replays queued outcomes
//! - [`classify`] - Status code and payload classification
//! - [`RateLimiter`] - Client-side calls-per-minute pacing

pub mod classify;
pub mod openai;
pub mod openai_types;
pub mod provider;
pub mod rate_limit;

pub use openai::OpenAiCompatibleClient;
pub use provider::{
    ProviderClient, RequestContext, ScriptedFailure, ScriptedProvider, Step, ToolSchema,
};
pub use rate_limit::{RateLimitUsage, RateLimiter};
