//! HTTP-level failure classification for the OpenAI-compatible client.
//!
//! Each test stands up a mock upstream and checks that the client maps the
//! response onto the right error kind, which decides whether the router
//! retries, fails fast, or falls back.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use relay_config::ProviderSettings;
use relay_core::{Message, ModelTier, RelayError, RetryDecision};
use relay_providers::{OpenAiCompatibleClient, ProviderClient, RequestContext, ToolSchema};
use serde_json::json;
use wiremock::{
    Mock, MockServer, Request, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

/// Matcher that counts every request it sees.
struct CallCounter {
    calls: Arc<AtomicU32>,
}

impl CallCounter {
    fn new() -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl wiremock::Match for CallCounter {
    fn matches(&self, _request: &Request) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }
}

fn openai_client(server: &MockServer) -> OpenAiCompatibleClient {
    OpenAiCompatibleClient::with_api_key(
        ProviderSettings::openai().with_base_url(server.uri()),
        "sk-test",
    )
    .unwrap()
}

fn context() -> RequestContext {
    RequestContext::new(vec![Message::user("hello")], "gpt-4.1-mini")
        .with_timeout(Duration::from_secs(5))
}

#[cfg(test)]
mod status_classification {
    use super::*;

    #[tokio::test]
    async fn test_503_is_overload_and_fails_fast() {
        let server = MockServer::start().await;
        let (counter, calls) = CallCounter::new();
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(counter)
            .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
            .mount(&server)
            .await;

        let err = openai_client(&server).invoke(&context()).await.unwrap_err();

        assert!(matches!(
            err,
            RelayError::ServerOverloaded {
                status: Some(503),
                ..
            }
        ));
        assert_eq!(err.retry_decision(), RetryDecision::FailFast);
        // The client itself never retries
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_500_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": {"message": "internal error", "type": "server_error"}
            })))
            .mount(&server)
            .await;

        let err = openai_client(&server).invoke(&context()).await.unwrap_err();

        assert!(matches!(err, RelayError::Provider { .. }));
        assert_eq!(err.retry_decision(), RetryDecision::Retry);
        assert!(err.to_string().contains("internal error"));
    }

    #[tokio::test]
    async fn test_529_overloaded_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(json!({
                "error": {"message": "Overloaded", "type": "overloaded_error"}
            })))
            .mount(&server)
            .await;

        let err = openai_client(&server).invoke(&context()).await.unwrap_err();
        assert!(matches!(err, RelayError::ServerOverloaded { .. }));
    }

    #[tokio::test]
    async fn test_401_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .mount(&server)
            .await;

        let err = openai_client(&server).invoke(&context()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "openai request failed: HTTP 401: Incorrect API key provided"
        );
    }
}

#[cfg(test)]
mod transport_failures {
    use super::*;

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Bind then drop a server so the port is very likely closed
        let uri = {
            let server = MockServer::start().await;
            server.uri()
        };
        let client = OpenAiCompatibleClient::with_api_key(
            ProviderSettings::openai().with_base_url(uri),
            "sk-test",
        )
        .unwrap();

        let err = client.invoke(&context()).await.unwrap_err();

        assert!(matches!(err, RelayError::Provider { .. } | RelayError::Timeout { .. }));
        assert_eq!(err.retry_decision(), RetryDecision::Retry);
    }

    #[tokio::test]
    async fn test_malformed_body_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = openai_client(&server).invoke(&context()).await.unwrap_err();
        assert!(matches!(err, RelayError::Provider { .. }));
    }
}

#[cfg(test)]
mod tools {
    use super::*;

    #[tokio::test]
    async fn test_tools_are_forwarded_as_functions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "tools": [{"type": "function", "function": {"name": "list_files"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "list_files", "arguments": "{}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = openai_client(&server);
        let ctx = context()
            .with_tier(ModelTier::ToolCapable)
            .with_tools(vec![ToolSchema::new(
                "list_files",
                "List files in a directory",
                json!({"type": "object", "properties": {"path": {"type": "string"}}}),
            )]);

        let text = client.invoke(&ctx).await.unwrap();
        assert!(text.contains("list_files"));
        assert!(text.contains("call_1"));
    }
}
