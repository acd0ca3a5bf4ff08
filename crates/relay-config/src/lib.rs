//! # relay-config
//!
//! Configuration for the Relay router: provider endpoints and models,
//! circuit breaker thresholds, retry/backoff, adaptive timeouts and the
//! complexity keyword profile.
//!
//! ## Example
//!
//! ```no_run
//! use relay_config::RelayConfig;
//!
//! let config = RelayConfig::load(None).expect("config");
//! assert!(config.retry.max_retries >= 1);
//! ```

pub mod complexity;
pub mod config;

pub use complexity::{ComplexityProfile, OutputTrigger};
pub use config::{
    BreakerSettings, CONFIG_PATH_ENV, HalfOpenAdmission, ModelMap, ProviderSettings, RateLimitSettings,
    RelayConfig, RetrySettings, TimeoutSettings, default_config_path,
};
