//! Integration tests for the Mistral provider
//!
//! A wiremock server stands in for the chat-completions endpoint.

use followup_engine::llm::{mistral::MistralProvider, LLMError, LLMProvider, Message};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_generate_sends_history_and_reads_reply() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "mistral-small",
            "messages": [
                {"role": "system", "content": "notes"},
                {"role": "user", "content": "hi"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "How are you? \\done"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = MistralProvider::new(&format!("{}/v1/", server.uri()), "mistral-small", "test-key");
    let reply = provider
        .generate(&[Message::system("notes"), Message::user("hi")])
        .await
        .unwrap();

    assert_eq!(reply, "How are you? \\done");
    assert_eq!(provider.name(), "mistral");
}

#[tokio::test]
async fn test_status_codes_map_to_errors() {
    let cases = [
        (401, "auth"),
        (403, "auth"),
        (429, "rate"),
        (503, "unavailable"),
        (400, "invalid"),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let provider = MistralProvider::new(&server.uri(), "m", "key");
        let err = provider.generate(&[Message::user("hi")]).await.unwrap_err();

        let matched = match err {
            LLMError::AuthenticationFailed(_) => "auth",
            LLMError::RateLimitExceeded => "rate",
            LLMError::ProviderUnavailable(_) => "unavailable",
            LLMError::InvalidRequest(_) => "invalid",
            ref other => panic!("Unexpected error for {}: {:?}", status, other),
        };
        assert_eq!(matched, expected, "status {}", status);
    }
}

#[tokio::test]
async fn test_missing_choices_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let provider = MistralProvider::new(&server.uri(), "m", "key");
    let err = provider.generate(&[Message::user("hi")]).await.unwrap_err();

    assert!(matches!(err, LLMError::ParseError(_)));
}

#[tokio::test]
async fn test_connection_error() {
    // Nothing listens on this port
    let provider = MistralProvider::new("http://127.0.0.1:9", "m", "key");

    let err = provider.generate(&[Message::user("hi")]).await.unwrap_err();

    assert!(matches!(err, LLMError::NetworkError(_)));
}

#[test]
fn test_debug_hides_api_key() {
    let provider = MistralProvider::new("https://api.mistral.ai/v1", "m", "secret-key");
    let debug = format!("{:?}", provider);

    assert!(debug.contains("api.mistral.ai"));
    assert!(!debug.contains("secret-key"));
}
