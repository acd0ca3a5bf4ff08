//! Router configuration.
//!
//! Everything has a default, so an empty YAML file (or no file at all) gives
//! a working DeepSeek → OpenAI chain. Circuit breaker defaults differ per
//! slot: the fallback trips sooner and recovers faster than the primary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_core::{ComplexityLevel, ModelTier, ProviderSlot, RelayError, Result, RetryPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::complexity::ComplexityProfile;

/// Environment variable pointing at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG";

/// Top-level router configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Preferred (cheaper) provider
    pub primary: ProviderSettings,

    /// Provider used once the primary gives up
    pub fallback: ProviderSettings,

    /// Retry behavior applied to each provider
    pub retry: RetrySettings,

    /// Per-request timeouts
    pub timeouts: TimeoutSettings,

    /// Pick model and timeout from prompt complexity
    pub auto_complexity_detection: bool,

    /// Wrap provider calls in circuit breakers
    pub enable_circuit_breaker: bool,

    /// How many concurrent trials a half-open breaker admits
    pub half_open_admission: HalfOpenAdmission,

    /// Sampling temperature sent to providers
    pub temperature: f32,

    /// Keyword/pattern data for the complexity analyzer
    pub complexity: ComplexityProfile,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            primary: ProviderSettings::deepseek(),
            fallback: ProviderSettings::openai(),
            retry: RetrySettings::default(),
            timeouts: TimeoutSettings::default(),
            auto_complexity_detection: true,
            enable_circuit_breaker: true,
            half_open_admission: HalfOpenAdmission::default(),
            temperature: 0.7,
            complexity: ComplexityProfile::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a YAML file and validate it.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RelayError::ConfigNotFound {
            path: path.to_path_buf(),
            source: Some(e),
        })?;
        let config = Self::from_yaml_str(&content).map_err(|e| match e {
            RelayError::ConfigInvalid { message, .. } => RelayError::ConfigInvalid {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        info!(path = %path.display(), "loaded router config");
        Ok(config)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty map.
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| RelayError::ConfigInvalid {
                path: PathBuf::from("<inline>"),
                message: e.to_string(),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, else `$RELAY_CONFIG`, else `~/.relay/config.yaml`,
    /// else built-in defaults.
    ///
    /// An explicitly named file must exist; the implicit locations are
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_yaml(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_yaml(Path::new(&env_path));
        }
        match default_config_path() {
            Some(default) if default.exists() => Self::from_yaml(&default),
            _ => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.primary.validate("primary")?;
        self.fallback.validate("fallback")?;
        self.breaker(ProviderSlot::Primary).validate("primary")?;
        self.breaker(ProviderSlot::Fallback).validate("fallback")?;

        if self.retry.max_retries == 0 {
            return Err(RelayError::config_validation(
                "retry.max_retries must be at least 1",
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(RelayError::config_validation(
                "retry.base_delay_ms must not exceed retry.max_delay_ms",
            ));
        }
        let t = &self.timeouts;
        if [t.base_timeout_secs, t.low_secs, t.medium_secs, t.high_secs].contains(&0) {
            return Err(RelayError::config_validation("timeouts must be positive"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RelayError::config_validation(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    /// Provider settings for a slot.
    pub fn provider(&self, slot: ProviderSlot) -> &ProviderSettings {
        match slot {
            ProviderSlot::Primary => &self.primary,
            ProviderSlot::Fallback => &self.fallback,
        }
    }

    /// Effective breaker settings for a slot.
    ///
    /// A provider block without a `breaker` section gets its slot's default.
    pub fn breaker(&self, slot: ProviderSlot) -> BreakerSettings {
        self.provider(slot)
            .breaker
            .clone()
            .unwrap_or_else(|| BreakerSettings::default_for(slot))
    }

    pub fn with_primary(mut self, primary: ProviderSettings) -> Self {
        self.primary = primary;
        self
    }

    pub fn with_fallback(mut self, fallback: ProviderSettings) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_auto_complexity_detection(mut self, enabled: bool) -> Self {
        self.auto_complexity_detection = enabled;
        self
    }

    pub fn with_circuit_breaker(mut self, enabled: bool) -> Self {
        self.enable_circuit_breaker = enabled;
        self
    }

    pub fn with_half_open_admission(mut self, admission: HalfOpenAdmission) -> Self {
        self.half_open_admission = admission;
        self
    }
}

/// `~/.relay/config.yaml`, when `HOME` is set.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".relay").join("config.yaml"))
}

// ============ Providers ============

/// Connection and model settings for one upstream provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Display name used in logs and stats
    pub name: String,

    /// Base URL of the OpenAI-compatible API
    pub base_url: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Model name per tier
    pub models: ModelMap,

    /// Circuit breaker overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker: Option<BreakerSettings>,

    /// Maximum completion tokens requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Client-side pacing; unset means no pacing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSettings>,
}

impl ProviderSettings {
    /// DeepSeek: a cheap chat model and a slower reasoning model.
    ///
    /// The reasoning model has no function calling, so tool requests stay
    /// on the chat model.
    pub fn deepseek() -> Self {
        Self {
            name: "deepseek".to_string(),
            base_url: "https://api.deepseek.com".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            models: ModelMap {
                cheap: "deepseek-chat".to_string(),
                capable: "deepseek-reasoner".to_string(),
                tool_capable: "deepseek-chat".to_string(),
            },
            breaker: None,
            max_tokens: None,
            rate_limit: None,
        }
    }

    /// OpenAI: one model for every tier.
    pub fn openai() -> Self {
        Self {
            name: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            models: ModelMap::uniform("gpt-4.1-mini"),
            breaker: None,
            max_tokens: None,
            rate_limit: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerSettings) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitSettings) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Model name configured for `tier`.
    pub fn model_for(&self, tier: ModelTier) -> &str {
        self.models.get(tier)
    }

    /// Read the API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(RelayError::MissingApiKey {
                provider: self.name.clone(),
                env_var: self.api_key_env.clone(),
            }),
        }
    }

    fn validate(&self, slot: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RelayError::config_validation(format!("{slot}.name is empty")));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(RelayError::config_validation(format!(
                "{slot}.base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        let m = &self.models;
        if [&m.cheap, &m.capable, &m.tool_capable]
            .iter()
            .any(|model| model.trim().is_empty())
        {
            return Err(RelayError::config_validation(format!(
                "{slot}.models must name a model for every tier"
            )));
        }
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate(slot)?;
        }
        Ok(())
    }
}

/// Model names per tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMap {
    pub cheap: String,
    pub capable: String,
    pub tool_capable: String,
}

impl ModelMap {
    /// Same model for every tier.
    pub fn uniform(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            cheap: model.clone(),
            capable: model.clone(),
            tool_capable: model,
        }
    }

    pub fn get(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Cheap => &self.cheap,
            ModelTier::Capable => &self.capable,
            ModelTier::ToolCapable => &self.tool_capable,
        }
    }
}

// ============ Resilience ============

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Seconds to wait before admitting a trial call
    pub recovery_timeout_secs: u64,

    /// Successful trials needed to close the circuit again
    pub half_open_max_calls: u32,
}

impl BreakerSettings {
    /// Slot defaults: primary 5/60s/3, fallback 3/30s/2.
    pub fn default_for(slot: ProviderSlot) -> Self {
        match slot {
            ProviderSlot::Primary => Self {
                failure_threshold: 5,
                recovery_timeout_secs: 60,
                half_open_max_calls: 3,
            },
            ProviderSlot::Fallback => Self {
                failure_threshold: 3,
                recovery_timeout_secs: 30,
                half_open_max_calls: 2,
            },
        }
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    fn validate(&self, slot: &str) -> Result<()> {
        if self.failure_threshold == 0 || self.half_open_max_calls == 0 {
            return Err(RelayError::config_validation(format!(
                "{slot}.breaker thresholds must be at least 1"
            )));
        }
        Ok(())
    }
}

/// Client-side pacing for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Calls allowed in any 60 second window
    pub calls_per_minute: u32,

    /// Minimum gap between consecutive call starts, in milliseconds
    pub min_delay_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            calls_per_minute: 20,
            min_delay_ms: 1000,
        }
    }
}

impl RateLimitSettings {
    /// Longest accepted `min_delay_ms`.
    pub const MAX_MIN_DELAY_MS: u64 = 3_600_000;

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    fn validate(&self, slot: &str) -> Result<()> {
        if self.calls_per_minute == 0 {
            return Err(RelayError::config_validation(format!(
                "{slot}.rate_limit.calls_per_minute must be at least 1"
            )));
        }
        if self.min_delay_ms > Self::MAX_MIN_DELAY_MS {
            return Err(RelayError::config_validation(format!(
                "{slot}.rate_limit.min_delay_ms must not exceed {}",
                Self::MAX_MIN_DELAY_MS
            )));
        }
        Ok(())
    }
}

/// Admission rule for a half-open circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HalfOpenAdmission {
    /// Admit every caller while half-open; concurrent trials may exceed
    /// `half_open_max_calls`.
    #[default]
    BestEffort,
    /// Admit at most `half_open_max_calls` trials in flight.
    Strict,
}

/// Retry/backoff settings, applied per provider per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per provider
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    pub base_delay_ms: u64,

    /// Cap on the exponential backoff in milliseconds
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter in milliseconds
    pub jitter_max_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_max_ms: 1000,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_jitter: Duration::from_millis(self.jitter_max_ms),
        }
    }
}

/// Request timeouts in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Used for tool requests and when complexity detection is off
    pub base_timeout_secs: u64,
    pub low_secs: u64,
    pub medium_secs: u64,
    pub high_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            base_timeout_secs: 60,
            low_secs: 60,
            medium_secs: 90,
            high_secs: 120,
        }
    }
}

impl TimeoutSettings {
    pub fn base(&self) -> Duration {
        Duration::from_secs(self.base_timeout_secs)
    }

    /// Adaptive timeout for a complexity level.
    pub fn for_level(&self, level: ComplexityLevel) -> Duration {
        let secs = match level {
            ComplexityLevel::Low => self.low_secs,
            ComplexityLevel::Medium => self.medium_secs,
            ComplexityLevel::High => self.high_secs,
        };
        Duration::from_secs(secs)
    }
}
