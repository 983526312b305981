//! OpenAI-compatible provider tests against a wiremock backend.

use futures::StreamExt;
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tycho::provider::{ChatRequest, ModelProvider, OpenAiCompatibleProvider, ToolDefinition};
use tycho::types::{ChatMessage, GenerationSettings};

fn provider_for(server: &MockServer) -> OpenAiCompatibleProvider {
    OpenAiCompatibleProvider::new("test-model", "sk-test", Some(server.uri()))
}

fn request(messages: Vec<ChatMessage>) -> ChatRequest {
    ChatRequest {
        messages,
        settings: GenerationSettings::default(),
        tools: Vec::new(),
    }
}

fn sse_body(events: &[&str]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str("data: ");
        body.push_str(event);
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn streaming_yields_content_and_usage() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#,
        r#"{"choices":[{"delta":{"content":"lo"},"finish_reason":null}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_string_contains("\"stream\":true"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .stream_chat(&request(vec![ChatMessage::user("hi")]))
        .await
        .unwrap();

    let mut text = String::new();
    let mut usage = None;
    while let Some(delta) = stream.next().await {
        let delta = delta.unwrap();
        if let Some(chunk) = delta.content {
            text.push_str(&chunk);
        }
        if let Some(u) = delta.usage {
            usage = Some(u);
        }
    }
    assert_eq!(text, "Hello");
    assert_eq!(usage.unwrap().total_tokens, 7);
}

#[tokio::test]
async fn streaming_reassembles_tool_call_fragments() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"lookup","arguments":""}}]},"finish_reason":null}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"q\":"}}]},"finish_reason":null}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"rust\"}"}}]},"finish_reason":null}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .stream_chat(&request(vec![ChatMessage::user("hi")]))
        .await
        .unwrap();

    let mut arguments = String::new();
    let mut name = None;
    while let Some(delta) = stream.next().await {
        for fragment in delta.unwrap().tool_calls {
            if let Some(n) = fragment.name {
                name = Some(n);
            }
            arguments.push_str(&fragment.arguments);
        }
    }
    assert_eq!(name.as_deref(), Some("lookup"));
    assert_eq!(arguments, r#"{"q":"rust"}"#);
}

#[tokio::test]
async fn complete_returns_text_and_usage() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "choices": [{"message": {"content": "Hello there"}}],
        "usage": {"prompt_tokens": 4, "completion_tokens": 3, "total_tokens": 7},
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let response = provider
        .complete(&request(vec![ChatMessage::user("hi")]))
        .await
        .unwrap();
    assert_eq!(response.text, "Hello there");
    assert_eq!(response.usage.total_tokens, 7);
}

#[tokio::test]
async fn tools_are_advertised_in_the_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("\"type\":\"function\""))
        .and(body_string_contains("\"name\":\"lookup\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "ok"}}],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut req = request(vec![ChatMessage::user("hi")]);
    req.tools = vec![ToolDefinition {
        name: "lookup".into(),
        description: "Look things up".into(),
        parameters: serde_json::json!({"type": "object", "properties": {}}),
    }];
    provider.complete(&req).await.unwrap();
}

#[tokio::test]
async fn unauthorized_maps_to_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider
        .complete(&request(vec![ChatMessage::user("hi")]))
        .await
        .unwrap_err();
    assert!(matches!(err, tycho::error::TychoError::Authentication(_)));
}

#[tokio::test]
async fn rate_limit_maps_to_rate_limited_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(serde_json::json!({"error": {"retry_after": 2}})),
        )
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider
        .stream_chat(&request(vec![ChatMessage::user("hi")]))
        .await
        .err()
        .expect("expected stream_chat to fail");
    match err {
        tycho::error::TychoError::RateLimited { retry_after_ms } => {
            assert_eq!(retry_after_ms, Some(2000));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
