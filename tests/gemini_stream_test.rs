use std::sync::Arc;

use fitstream::{ApiKeySource, ChatBackend, FitStreamError, GeminiChat, GeminiConfig, Message};
use futures::StreamExt;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestKey;

impl ApiKeySource for TestKey {
    fn api_key(&self) -> Option<String> {
        Some("test-key".to_string())
    }
}

struct NoKey;

impl ApiKeySource for NoKey {
    fn api_key(&self) -> Option<String> {
        None
    }
}

fn config_for(server: &MockServer) -> GeminiConfig {
    GeminiConfig {
        api_base: server.uri(),
        chat_model: "gemini-test".to_string(),
        ..GeminiConfig::default()
    }
}

fn sse(events: &[&str]) -> ResponseTemplate {
    let body: String = events.iter().map(|e| format!("data: {}\r\n\r\n", e)).collect();
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

#[test_log::test(tokio::test)]
async fn test_streams_text_and_citations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(serde_json::json!({
            "tools": [{ "googleSearch": {} }],
            "contents": [
                { "role": "model", "parts": [{ "text": "Earlier answer" }] },
                { "role": "user", "parts": [{ "text": "best HIIT videos" }] }
            ]
        })))
        .respond_with(sse(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"Try "}]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"these."}]},"groundingMetadata":{"groundingChunks":[{"web":{"uri":"https://www.youtube.com/watch?v=dQw4w9WgXcQ","title":"20 min HIIT"}},{"web":{"title":"no uri"}}]}}]}"#,
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let chat = GeminiChat::new(config_for(&server), Arc::new(TestKey));
    let history = vec![Message::model("Earlier answer")];
    let chunks: Vec<_> = chat
        .stream_chat("best HIIT videos", &history)
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(chunks.len(), 2);
    let first = chunks[0].as_ref().unwrap();
    assert_eq!(first.text, "Try ");
    assert!(first.citations.is_none());

    let second = chunks[1].as_ref().unwrap();
    assert_eq!(second.text, "these.");
    let citations = second.citations.as_ref().unwrap();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].title, "20 min HIIT");
}

#[test_log::test(tokio::test)]
async fn test_http_error_surfaces_api_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": { "code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED" }
        })))
        .mount(&server)
        .await;

    let chat = GeminiChat::new(config_for(&server), Arc::new(TestKey));
    let err = match chat.stream_chat("hello", &[]).await {
        Ok(_) => panic!("expected an error"),
        Err(e) => e,
    };
    match err {
        FitStreamError::Api { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "API key not valid");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_error_event_ends_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"Warm up"}]}}]}"#,
            r#"{"error":{"code":500,"message":"internal"}}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"never seen"}]}}]}"#,
        ]))
        .mount(&server)
        .await;

    let chat = GeminiChat::new(config_for(&server), Arc::new(TestKey));
    let chunks: Vec<_> = chat.stream_chat("hello", &[]).await.unwrap().collect().await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].as_ref().unwrap().text, "Warm up");
    assert!(matches!(chunks[1], Err(FitStreamError::Api { status: 500, .. })));
}

#[test_log::test(tokio::test)]
async fn test_truncated_payload_is_reported_not_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"He"}]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"llo""#,
            r#"{"candidates":[{"content":{"parts":[{"text":"never seen"}]}}]}"#,
        ]))
        .mount(&server)
        .await;

    let chat = GeminiChat::new(config_for(&server), Arc::new(TestKey));
    let chunks: Vec<_> = chat.stream_chat("hello", &[]).await.unwrap().collect().await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].as_ref().unwrap().text, "He");
    assert!(matches!(chunks[1], Err(FitStreamError::Malformed(_))));
}

#[tokio::test]
async fn test_missing_key_fails_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let chat = GeminiChat::new(config_for(&server), Arc::new(NoKey));
    let err = chat.stream_chat("hello", &[]).await.err().unwrap();
    assert!(matches!(err, FitStreamError::MissingApiKey));
    assert!(err.is_credential_failure());
}
