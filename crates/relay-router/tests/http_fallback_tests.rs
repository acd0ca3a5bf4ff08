//! Router over real HTTP clients pointed at mock upstreams.

use std::sync::Arc;

use relay_config::{ProviderSettings, RelayConfig, RetrySettings};
use relay_core::{Message, ProviderSlot, RelayError};
use relay_providers::OpenAiCompatibleClient;
use relay_router::{CallBudget, RequestRouter};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn config() -> RelayConfig {
    RelayConfig::default().with_retry(RetrySettings {
        max_retries: 2,
        base_delay_ms: 0,
        max_delay_ms: 0,
        jitter_max_ms: 0,
    })
}

fn router(primary: &MockServer, fallback: &MockServer) -> RequestRouter {
    let primary = OpenAiCompatibleClient::with_api_key(
        ProviderSettings::deepseek().with_base_url(primary.uri()),
        "sk-primary",
    )
    .unwrap();
    let fallback = OpenAiCompatibleClient::with_api_key(
        ProviderSettings::openai().with_base_url(fallback.uri()),
        "sk-fallback",
    )
    .unwrap();
    RequestRouter::new(&config(), Arc::new(primary), Arc::new(fallback)).unwrap()
}

fn completion_body(text: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
    })
}

#[tokio::test]
async fn test_primary_answers_with_cheap_model() {
    let primary = MockServer::start().await;
    let fallback = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-primary"))
        .and(body_partial_json(json!({"model": "deepseek-chat"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("OK")))
        .expect(1)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("unused")))
        .expect(0)
        .mount(&fallback)
        .await;

    let router = router(&primary, &fallback);
    let completion = router
        .call_with(&[Message::user("Say OK")], &[], &CallBudget::unbounded())
        .await
        .unwrap();

    assert_eq!(completion.text, "OK");
    assert_eq!(completion.provider, "deepseek");
    assert_eq!(completion.model, "deepseek-chat");
}

#[tokio::test]
async fn test_rate_limited_primary_falls_back() {
    let primary = MockServer::start().await;
    let fallback = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "20")
                .set_body_json(json!({"error": {"message": "Rate limit reached"}})),
        )
        .expect(1)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-fallback"))
        .and(body_partial_json(json!({"model": "gpt-4.1-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("from openai")))
        .expect(1)
        .mount(&fallback)
        .await;

    let router = router(&primary, &fallback);
    let completion = router
        .call_with(&[Message::user("Say OK")], &[], &CallBudget::unbounded())
        .await
        .unwrap();

    assert_eq!(completion.text, "from openai");
    assert_eq!(completion.slot, ProviderSlot::Fallback);
    assert!(completion.fell_back);

    let stats = router.snapshot();
    assert_eq!(stats.total_fallbacks, 1);
    assert_eq!(stats.recent_errors[0].kind, "rate_limited");
}

#[tokio::test]
async fn test_server_errors_on_both_sides() {
    let primary = MockServer::start().await;
    let fallback = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("primary exploded"))
        .expect(2)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(2)
        .mount(&fallback)
        .await;

    let router = router(&primary, &fallback);
    let err = router.call_prompt("Say OK").await.unwrap_err();

    assert!(matches!(err, RelayError::AllProvidersFailed { .. }));
    let message = err.to_string();
    assert!(message.contains("HTTP 500"));
    assert!(message.contains("HTTP 502"));

    let stats = router.snapshot();
    assert_eq!(stats.primary.failures, 2);
    assert_eq!(stats.fallback.failures, 2);
}
