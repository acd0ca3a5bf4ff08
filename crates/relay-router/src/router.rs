//! Multi-provider request router.
//!
//! The router turns one completion request into at most two provider
//! phases:
//!
//! 1. Plan: tool requests are pinned to the tool-capable tier with the base
//!    timeout. Otherwise the complexity analyzer picks tier and timeout
//!    (or the cheap tier and base timeout when detection is off).
//! 2. Primary: attempts go through the primary's circuit breaker under the
//!    shared retry policy. Timeouts and generic failures are retried;
//!    rate limits, overload and open circuits end the phase at once. When
//!    the provider has a client-side rate limit, each admitted attempt
//!    waits for its slot before the request is sent.
//! 3. Fallback: tried once per call with the same shape and its own
//!    breaker. If it fails too, the caller gets
//!    [`RelayError::AllProvidersFailed`] carrying both errors.
//!
//! Every attempt outcome and breaker transition lands in the
//! [`StatsCollector`]; the primary is never retried after the fallback
//! phase has started.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_config::RelayConfig;
//! use relay_core::Message;
//! use relay_providers::ScriptedProvider;
//! use relay_router::RequestRouter;
//!
//! # async fn example() -> relay_core::Result<()> {
//! let router = RequestRouter::new(
//!     &RelayConfig::default(),
//!     Arc::new(ScriptedProvider::new("deepseek")),
//!     Arc::new(ScriptedProvider::new("openai")),
//! )?;
//! let text = router.call(&[Message::user("Say OK")], &[]).await?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use relay_config::{ModelMap, RelayConfig, TimeoutSettings};
use relay_core::{
    CallBudget, Message, ModelTier, ProviderSlot, RelayError, Result, RetryPolicy,
    log_route_event, retry_with_policy,
};
use relay_providers::{
    OpenAiCompatibleClient, ProviderClient, RateLimiter, RequestContext, ToolSchema,
};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use crate::complexity::{ComplexityAnalysis, ComplexityAnalyzer};
use crate::stats::{StatsCollector, UsageStats};

/// A successful routed call.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub text: String,
    pub slot: ProviderSlot,
    pub provider: String,
    pub model: String,
    pub tier: ModelTier,
    /// Attempts made against the provider that answered.
    pub attempts: u32,
    pub fell_back: bool,
    /// Present when the complexity analyzer ran.
    pub analysis: Option<ComplexityAnalysis>,
}

/// Model tier and timeout chosen for one call.
#[derive(Debug, Clone)]
struct RoutePlan {
    tier: ModelTier,
    timeout: Duration,
    analysis: Option<ComplexityAnalysis>,
}

/// One provider with its breaker and optional pacing.
struct ProviderLane {
    slot: ProviderSlot,
    client: Arc<dyn ProviderClient>,
    breaker: CircuitBreaker,
    limiter: Option<RateLimiter>,
}

impl ProviderLane {
    async fn invoke(&self, context: &RequestContext) -> Result<String> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        self.client.invoke(context).await
    }
}

/// Routes completion requests across a primary and a fallback provider.
pub struct RequestRouter {
    primary: ProviderLane,
    fallback: ProviderLane,
    analyzer: ComplexityAnalyzer,
    retry: RetryPolicy,
    timeouts: TimeoutSettings,
    auto_complexity_detection: bool,
    temperature: f32,
    stats: Arc<StatsCollector>,
}

impl RequestRouter {
    /// Build a router around two provider clients.
    pub fn new(
        config: &RelayConfig,
        primary: Arc<dyn ProviderClient>,
        fallback: Arc<dyn ProviderClient>,
    ) -> Result<Self> {
        config.validate()?;
        let stats = Arc::new(StatsCollector::new(primary.name(), fallback.name()));

        let lane = |slot: ProviderSlot, client: Arc<dyn ProviderClient>| {
            let sink = Arc::clone(&stats);
            let breaker = CircuitBreaker::new(
                client.name(),
                BreakerConfig::from_settings(
                    &config.breaker(slot),
                    config.half_open_admission,
                    config.enable_circuit_breaker,
                ),
            )
            .with_observer(Arc::new(move |from: CircuitState, to: CircuitState| {
                sink.record_transition(slot, from, to)
            }));
            let limiter = config
                .provider(slot)
                .rate_limit
                .clone()
                .map(|settings| RateLimiter::new(client.name(), settings));
            ProviderLane {
                slot,
                client,
                breaker,
                limiter,
            }
        };
        let primary = lane(ProviderSlot::Primary, primary);
        let fallback = lane(ProviderSlot::Fallback, fallback);

        // Recommendations name the primary client's models
        let models = ModelMap {
            cheap: primary.client.model_for(ModelTier::Cheap).to_string(),
            capable: primary.client.model_for(ModelTier::Capable).to_string(),
            tool_capable: primary.client.model_for(ModelTier::ToolCapable).to_string(),
        };
        let analyzer = ComplexityAnalyzer::new(&config.complexity, models, config.timeouts.clone())?;

        info!(
            primary = primary.client.name(),
            fallback = fallback.client.name(),
            circuit_breaker = config.enable_circuit_breaker,
            auto_complexity_detection = config.auto_complexity_detection,
            "router initialized"
        );

        Ok(Self {
            primary,
            fallback,
            analyzer,
            retry: config.retry.to_policy(),
            timeouts: config.timeouts.clone(),
            auto_complexity_detection: config.auto_complexity_detection,
            temperature: config.temperature,
            stats,
        })
    }

    /// Build a router with HTTP clients for both configured providers.
    ///
    /// API keys are read from each provider's `api_key_env`.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let primary = OpenAiCompatibleClient::from_settings(config.primary.clone())?;
        let fallback = OpenAiCompatibleClient::from_settings(config.fallback.clone())?;
        Self::new(config, Arc::new(primary), Arc::new(fallback))
    }

    /// Produce a completion for `messages`.
    ///
    /// A non-empty `tools` list pins the request to tool-capable models.
    pub async fn call(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<String> {
        self.call_with(messages, tools, &CallBudget::unbounded())
            .await
            .map(|completion| completion.text)
    }

    /// Produce a completion for a bare prompt.
    pub async fn call_prompt(&self, prompt: &str) -> Result<String> {
        self.call(&[Message::user(prompt)], &[]).await
    }

    /// Produce a completion within `budget`, returning routing details.
    ///
    /// When the budget's deadline passes or its token is cancelled, the
    /// in-flight attempt is abandoned, no further attempt starts, and the
    /// call fails with [`RelayError::Cancelled`].
    pub async fn call_with(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        budget: &CallBudget,
    ) -> Result<Completion> {
        let plan = self.plan(messages, tools);
        self.stats
            .record_request(plan.analysis.as_ref().map(|a| a.level));

        let primary_err = match self.run_lane(&self.primary, &plan, messages, tools, budget).await {
            Ok(completion) => return Ok(completion),
            Err(err) => err,
        };
        if matches!(primary_err, RelayError::Cancelled { .. }) {
            self.stats.record_error(&primary_err);
            return Err(primary_err);
        }

        self.stats.record_fallback();
        log_route_event!(
            self.primary.client.name(),
            "fallback",
            to = self.fallback.client.name(),
            error = %primary_err
        );

        match self.run_lane(&self.fallback, &plan, messages, tools, budget).await {
            Ok(mut completion) => {
                completion.fell_back = true;
                Ok(completion)
            }
            Err(err @ RelayError::Cancelled { .. }) => {
                self.stats.record_error(&err);
                Err(err)
            }
            Err(fallback_err) => {
                let err = RelayError::AllProvidersFailed {
                    primary: Box::new(primary_err),
                    fallback: Box::new(fallback_err),
                };
                error!(error = %err, "all providers failed");
                self.stats.record_error(&err);
                Err(err)
            }
        }
    }

    /// Consistent copy of usage counters, with current breaker state and
    /// rate limiter usage.
    pub fn snapshot(&self) -> UsageStats {
        [&self.primary, &self.fallback]
            .into_iter()
            .fold(self.stats.snapshot(), |usage, lane| {
                let usage = usage.with_health(lane.slot, lane.breaker.health());
                match &lane.limiter {
                    Some(limiter) => usage.with_rate_limit(lane.slot, limiter.usage()),
                    None => usage,
                }
            })
    }

    pub fn breaker_state(&self, slot: ProviderSlot) -> CircuitState {
        self.lane(slot).breaker.state()
    }

    pub fn breaker(&self, slot: ProviderSlot) -> &CircuitBreaker {
        &self.lane(slot).breaker
    }

    pub fn analyzer(&self) -> &ComplexityAnalyzer {
        &self.analyzer
    }

    fn lane(&self, slot: ProviderSlot) -> &ProviderLane {
        match slot {
            ProviderSlot::Primary => &self.primary,
            ProviderSlot::Fallback => &self.fallback,
        }
    }

    fn plan(&self, messages: &[Message], tools: &[ToolSchema]) -> RoutePlan {
        if !tools.is_empty() {
            return RoutePlan {
                tier: ModelTier::ToolCapable,
                timeout: self.timeouts.base(),
                analysis: None,
            };
        }
        if !self.auto_complexity_detection {
            return RoutePlan {
                tier: ModelTier::Cheap,
                timeout: self.timeouts.base(),
                analysis: None,
            };
        }

        let analysis = self.analyzer.analyze(messages);
        debug!(
            level = %analysis.level,
            score = analysis.score,
            estimated_output_tokens = analysis.estimated_output_tokens,
            reasons = ?analysis.reasons,
            "complexity analyzed"
        );
        RoutePlan {
            tier: analysis.recommended_tier,
            timeout: analysis.recommended_timeout(),
            analysis: Some(analysis),
        }
    }

    async fn run_lane(
        &self,
        lane: &ProviderLane,
        plan: &RoutePlan,
        messages: &[Message],
        tools: &[ToolSchema],
        budget: &CallBudget,
    ) -> Result<Completion> {
        let name = lane.client.name();
        let model = lane.client.model_for(plan.tier).to_string();
        let context = RequestContext::new(messages.to_vec(), model.clone())
            .with_tools(tools.to_vec())
            .with_tier(plan.tier)
            .with_timeout(plan.timeout)
            .with_temperature(self.temperature);

        log_route_event!(
            name,
            "selected",
            slot = %lane.slot,
            model = %model,
            tier = %plan.tier,
            timeout_secs = plan.timeout.as_secs()
        );

        let context = &context;
        let stats = self.stats.as_ref();
        let tier = plan.tier;
        let outcome = retry_with_policy(&self.retry, budget, move |attempt| async move {
            let result = lane.breaker.guard(|| lane.invoke(context)).await;
            stats.record(lane.slot, tier, &result);
            if let Err(err) = &result {
                log_route_event!(
                    name,
                    "attempt_failed",
                    attempt = attempt + 1,
                    kind = err.kind(),
                    error = %err
                );
            }
            result
        })
        .await;

        let text = outcome.result?;
        log_route_event!(name, "succeeded", attempts = outcome.attempts, model = %model);
        Ok(Completion {
            text,
            slot: lane.slot,
            provider: name.to_string(),
            model,
            tier,
            attempts: outcome.attempts,
            fell_back: false,
            analysis: plan.analysis.clone(),
        })
    }
}
