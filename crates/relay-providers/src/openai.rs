//! OpenAI-compatible HTTP provider.
//!
//! [`OpenAiCompatibleClient`] talks to any API that implements
//! `POST /chat/completions` with bearer authentication. DeepSeek and OpenAI
//! both do, so the router's primary and fallback use the same client with
//! different [`ProviderSettings`].
//!
//! ## Example
//!
//! ```no_run
//! use relay_config::ProviderSettings;
//! use relay_core::Message;
//! use relay_providers::{OpenAiCompatibleClient, ProviderClient, RequestContext};
//!
//! # async fn example() -> relay_core::Result<()> {
//! let client = OpenAiCompatibleClient::from_settings(ProviderSettings::deepseek())?;
//! let context = RequestContext::new(vec![Message::user("Say OK")], "deepseek-chat");
//! let text = client.invoke(&context).await?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use relay_config::ProviderSettings;
use relay_core::{ModelTier, RelayError, Result};
use reqwest::header::RETRY_AFTER;
use tracing::debug;

use crate::classify::{classify_message, classify_status, classify_transport};
use crate::openai_types::{ApiTool, ChatCompletionRequest, ChatCompletionResponse};
use crate::provider::{ProviderClient, RequestContext};

/// Connection establishment bound, independent of the request timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Provider speaking the OpenAI chat completions protocol.
pub struct OpenAiCompatibleClient {
    settings: ProviderSettings,
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiCompatibleClient {
    /// Create a client, reading the API key from `settings.api_key_env`.
    pub fn from_settings(settings: ProviderSettings) -> Result<Self> {
        let api_key = settings.resolve_api_key()?;
        Self::with_api_key(settings, api_key)
    }

    /// Create a client with an explicit API key.
    pub fn with_api_key(settings: ProviderSettings, api_key: impl Into<String>) -> Result<Self> {
        // No client-wide timeout: each request carries its own.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RelayError::Internal {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            settings,
            client,
            api_key: api_key.into(),
        })
    }

    /// DeepSeek preset.
    pub fn deepseek() -> Result<Self> {
        Self::from_settings(ProviderSettings::deepseek())
    }

    /// OpenAI preset.
    pub fn openai() -> Result<Self> {
        Self::from_settings(ProviderSettings::openai())
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn build_request<'a>(&'a self, context: &'a RequestContext) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &context.model,
            messages: &context.messages,
            temperature: context.temperature,
            max_tokens: self.settings.max_tokens,
            tools: context
                .tools
                .iter()
                .flatten()
                .map(ApiTool::from)
                .collect(),
        }
    }

    async fn send_request(&self, context: &RequestContext) -> Result<String> {
        let name = self.settings.name.as_str();
        debug!(provider = name, model = %context.model, url = %self.endpoint(), "sending completion request");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.build_request(context))
            .send()
            .await
            .map_err(|e| classify_transport(name, &e, context.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = body_or_read_error(response.text().await);
            return Err(classify_status(
                name,
                status.as_u16(),
                &body,
                retry_after,
                context.timeout,
            ));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| classify_transport(name, &e, context.timeout))?;

        Self::extract_text(name, body, context.timeout)
    }

    /// Pull the reply out of the first choice.
    ///
    /// A choice without text but with tool calls yields the raw tool call
    /// JSON so the caller's agent loop can act on it.
    fn extract_text(
        provider: &str,
        body: ChatCompletionResponse,
        timeout: Duration,
    ) -> Result<String> {
        if let Some(error) = body.error {
            return Err(classify_message(provider, &error.message, timeout));
        }
        if let Some(usage) = &body.usage {
            debug!(
                provider,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion usage"
            );
        }

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::provider(provider, "response contained no choices"))?;

        match (choice.message.content, choice.message.tool_calls) {
            (Some(text), _) if !text.is_empty() => Ok(text),
            (_, Some(calls)) => Ok(calls.to_string()),
            _ => Err(RelayError::provider(
                provider,
                format!(
                    "empty completion (finish_reason: {})",
                    choice.finish_reason.as_deref().unwrap_or("unknown")
                ),
            )),
        }
    }
}

/// Error body text, or a note on why it could not be read.
fn body_or_read_error<E: std::fmt::Display>(body: std::result::Result<String, E>) -> String {
    body.unwrap_or_else(|e| format!("<unreadable body: {e}>"))
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    async fn invoke(&self, context: &RequestContext) -> Result<String> {
        match tokio::time::timeout(context.timeout, self.send_request(context)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::timeout(&self.settings.name, context.timeout)),
        }
    }

    fn name(&self) -> &str {
        &self.settings.name
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        self.settings.model_for(tier)
    }
}
