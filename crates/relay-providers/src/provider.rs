//! Provider client trait and in-process implementations.
//!
//! A [`ProviderClient`] performs exactly one attempt against one upstream
//! provider. It never retries on its own; retry, breaking and fallback are
//! the router's job. Implementations must honor [`RequestContext::timeout`]
//! and report failures using the [`RelayError`] taxonomy so the router can
//! tell transient failures from throttling.
//!
//! ## Implementations
//!
//! - [`OpenAiCompatibleClient`](crate::openai::OpenAiCompatibleClient) - DeepSeek/OpenAI over HTTP
//! - [`ScriptedProvider`] - Replays queued outcomes, for tests and dry runs

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use ::async_trait::async_trait;
use relay_config::ModelMap;
use relay_core::{Message, ModelTier, RelayError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tool/function schema forwarded to providers that support it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments.
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Everything a provider needs for one attempt.
///
/// Built once per call per provider and reused across that provider's
/// retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub messages: Vec<Message>,
    /// Present only when the caller supplied at least one tool.
    pub tools: Option<Vec<ToolSchema>>,
    pub tier: ModelTier,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
}

impl RequestContext {
    pub fn new(messages: Vec<Message>, model: impl Into<String>) -> Self {
        Self {
            messages,
            tools: None,
            tier: ModelTier::Cheap,
            model: model.into(),
            timeout: Duration::from_secs(60),
            temperature: 0.7,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// One upstream text-generation provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Perform a single completion attempt and return the response text.
    async fn invoke(&self, context: &RequestContext) -> Result<String>;

    /// Provider name for logs and stats.
    fn name(&self) -> &str;

    /// Concrete model this provider uses for `tier`.
    fn model_for(&self, tier: ModelTier) -> &str;
}

// ============ Scripted Provider ============

/// Failure a [`ScriptedProvider`] can be told to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    Timeout,
    RateLimited,
    Overloaded,
    Provider(String),
}

impl ScriptedFailure {
    fn into_error(self, provider: &str, timeout: Duration) -> RelayError {
        match self {
            Self::Timeout => RelayError::timeout(provider, timeout),
            Self::RateLimited => RelayError::RateLimited {
                provider: provider.to_string(),
                retry_after_secs: None,
            },
            Self::Overloaded => RelayError::ServerOverloaded {
                provider: provider.to_string(),
                status: Some(503),
                message: "scripted overload".to_string(),
            },
            Self::Provider(message) => RelayError::provider(provider, message),
        }
    }
}

/// One scripted outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Reply(String),
    Fail(ScriptedFailure),
    /// Never answer; the attempt ends when the request timeout fires.
    Hang,
}

/// Provider that replays queued outcomes.
///
/// Steps are consumed in order; once the queue is empty every call gets the
/// `otherwise` step. Every received [`RequestContext`] is recorded.
pub struct ScriptedProvider {
    name: String,
    models: ModelMap,
    script: Mutex<VecDeque<Step>>,
    otherwise: Step,
    delay: Duration,
    requests: Mutex<Vec<RequestContext>>,
}

impl ScriptedProvider {
    /// A provider that answers "OK" to everything.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: ModelMap {
                cheap: "scripted-cheap".to_string(),
                capable: "scripted-capable".to_string(),
                tool_capable: "scripted-tools".to_string(),
            },
            script: Mutex::new(VecDeque::new()),
            otherwise: Step::Reply("OK".to_string()),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_models(mut self, models: ModelMap) -> Self {
        self.models = models;
        self
    }

    /// Queue a successful reply.
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.step(Step::Reply(text.into()))
    }

    /// Queue a failure.
    pub fn fail(self, failure: ScriptedFailure) -> Self {
        self.step(Step::Fail(failure))
    }

    /// Queue `n` copies of a failure.
    pub fn fail_times(mut self, failure: ScriptedFailure, n: usize) -> Self {
        for _ in 0..n {
            self = self.fail(failure.clone());
        }
        self
    }

    pub fn step(self, step: Step) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
        self
    }

    /// Outcome once the queue is exhausted.
    pub fn otherwise(mut self, step: Step) -> Self {
        self.otherwise = step;
        self
    }

    /// Fail every call that is not explicitly scripted.
    pub fn always_fail(self, failure: ScriptedFailure) -> Self {
        self.otherwise(Step::Fail(failure))
    }

    /// Simulated latency before each outcome.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of attempts received so far.
    pub fn invocations(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Copies of every context received so far.
    pub fn requests(&self) -> Vec<RequestContext> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| self.otherwise.clone())
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn invoke(&self, context: &RequestContext) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(context.clone());
        }
        let step = self.next_step();
        debug!(provider = %self.name, ?step, "scripted invoke");

        let outcome = async {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match step {
                Step::Reply(text) => Ok(text),
                Step::Fail(failure) => Err(failure.into_error(&self.name, context.timeout)),
                Step::Hang => std::future::pending().await,
            }
        };

        match tokio::time::timeout(context.timeout, outcome).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::timeout(&self.name, context.timeout)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        self.models.get(tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new(vec![Message::user("hi")], "scripted-cheap")
            .with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_empty_tool_list_is_no_tools() {
        let context = ctx().with_tools(vec![]);
        assert!(context.tools.is_none());
        assert!(!context.has_tools());

        let context = ctx().with_tools(vec![ToolSchema::new("t", "d", json!({}))]);
        assert!(context.has_tools());
    }

    #[tokio::test]
    async fn test_scripted_steps_then_otherwise() {
        let provider = ScriptedProvider::new("p")
            .fail(ScriptedFailure::RateLimited)
            .reply("first");

        assert!(matches!(
            provider.invoke(&ctx()).await,
            Err(RelayError::RateLimited { .. })
        ));
        assert_eq!(provider.invoke(&ctx()).await.unwrap(), "first");
        assert_eq!(provider.invoke(&ctx()).await.unwrap(), "OK");
        assert_eq!(provider.invocations(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_times_out_at_context_timeout() {
        let provider = ScriptedProvider::new("p").step(Step::Hang);
        let start = tokio::time::Instant::now();

        let err = provider.invoke(&ctx()).await.unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_records_contexts() {
        let provider = ScriptedProvider::new("p");
        provider
            .invoke(&ctx().with_tier(ModelTier::Capable))
            .await
            .unwrap();
        assert_eq!(provider.requests()[0].tier, ModelTier::Capable);
        assert_eq!(provider.model_for(ModelTier::ToolCapable), "scripted-tools");
    }
}
