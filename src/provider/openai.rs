//! OpenAI-compatible Chat Completions provider.
//!
//! Streams `{content, tool_calls, usage}` deltas from any backend speaking
//! the chat-completions SSE protocol. Tool-call fragments carry the stream
//! index so a turn with several parallel calls can be reassembled by the
//! conversation engine.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::error::TychoError;
use crate::types::*;

use super::http::{bearer_headers, shared_client};
use super::{ChatRequest, ChatResponse, ModelProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatibleProvider {
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    /// Build from environment configuration (`TYCHO_API_KEY` or
    /// `OPENAI_API_KEY`, plus optional `TYCHO_BASE_URL` and `TYCHO_MODEL`).
    pub fn from_env(default_model: impl Into<String>) -> crate::error::Result<Self> {
        let config = crate::config::TychoConfig::from_env();
        let api_key = config.api_key.ok_or_else(|| {
            TychoError::Configuration("TYCHO_API_KEY or OPENAI_API_KEY is not set".into())
        })?;
        Ok(Self::new(
            config.model.unwrap_or_else(|| default_model.into()),
            api_key,
            config.base_url,
        ))
    }

    fn build_request_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let messages = request
            .messages
            .iter()
            .map(message_to_wire)
            .collect::<Vec<_>>();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        let obj = body.as_object_mut().unwrap();

        if stream {
            obj.insert(
                "stream_options".into(),
                serde_json::json!({"include_usage": true}),
            );
        }
        if let Some(max) = request.settings.max_tokens {
            obj.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = request.settings.temperature {
            obj.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = request.settings.top_p {
            obj.insert("top_p".into(), top_p.into());
        }
        if let Some(ref stops) = request.settings.stop_sequences {
            obj.insert("stop".into(), serde_json::json!(stops));
        }
        if let Some(seed) = request.settings.seed {
            obj.insert("seed".into(), seed.into());
        }
        if let Some(ref user) = request.settings.user {
            obj.insert("user".into(), user.clone().into());
        }

        if !request.tools.is_empty() {
            let tool_defs: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            obj.insert("tools".into(), tool_defs.into());
        }

        body
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn provider_name(&self) -> &str {
        "openai-compatible"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, TychoError> {
        let body = self.build_request_body(request, false);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, "chat completion");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(super::http::status_to_error(status, &body_text));
        }

        let data: WireChatResponse = resp.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TychoError::api(200, "No choices in response"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(ChatResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: data.usage.map(usage_from_wire).unwrap_or_default(),
        })
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<ChatDelta, TychoError>>, TychoError> {
        let body = self.build_request_body(request, true);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, "chat completion stream");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(super::http::status_to_error(status, &body_text));
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            futures::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(TychoError::Network(e));
                        break;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    if let Some(data) = super::http::parse_sse_data(&line) {
                        match serde_json::from_str::<WireStreamChunk>(data) {
                            Ok(chunk) => {
                                if let Some(delta) = chunk_to_delta(chunk) {
                                    yield Ok(delta);
                                }
                            }
                            Err(_) => {} // skip unparseable chunks
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn chunk_to_delta(chunk: WireStreamChunk) -> Option<ChatDelta> {
    // Usage-only chunks (stream_options.include_usage) have no choices.
    let usage = chunk.usage.map(usage_from_wire);
    let Some(choice) = chunk.choices.into_iter().next() else {
        return usage.map(|u| ChatDelta {
            usage: Some(u),
            ..Default::default()
        });
    };

    let tool_calls = choice
        .delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCallFragment {
            index: tc.index,
            id: tc.id,
            name: tc.function.as_ref().and_then(|f| f.name.clone()),
            arguments: tc
                .function
                .and_then(|f| f.arguments)
                .unwrap_or_default(),
        })
        .collect();

    Some(ChatDelta {
        content: choice.delta.content,
        tool_calls,
        finish_reason: choice.finish_reason.as_deref().and_then(parse_finish_reason),
        usage,
    })
}

fn parse_finish_reason(s: &str) -> Option<FinishReason> {
    match s {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "tool_calls" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

fn usage_from_wire(u: WireUsage) -> Usage {
    Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    }
}

fn message_to_wire(msg: &ChatMessage) -> serde_json::Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    if let Some(ref call_id) = msg.tool_call_id {
        return serde_json::json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": msg.content,
        });
    }

    if !msg.tool_calls.is_empty() {
        let tc_json: Vec<serde_json::Value> = msg
            .tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments,
                    }
                })
            })
            .collect();
        return serde_json::json!({
            "role": role,
            "content": if msg.content.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::Value::String(msg.content.clone())
            },
            "tool_calls": tc_json,
        });
    }

    serde_json::json!({ "role": role, "content": msg.content })
}

// Wire response types (internal)

#[derive(Deserialize)]
struct WireChatResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    delta: WireStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<WireStreamToolCall>>,
}

#[derive(Deserialize)]
struct WireStreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<WireStreamFunction>,
}

#[derive(Deserialize)]
struct WireStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_message_carries_call_id() {
        let msg = ChatMessage::tool_result("call_9", &serde_json::json!({"n": 1}));
        let wire = message_to_wire(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_9");
    }

    #[test]
    fn assistant_with_calls_nulls_empty_content() {
        let msg = ChatMessage::assistant_with_tool_calls(
            "",
            vec![ToolCallRequest {
                id: "c1".into(),
                name: "f".into(),
                arguments: "{}".into(),
            }],
        );
        let wire = message_to_wire(&msg);
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "f");
    }

    #[test]
    fn stream_chunk_parses_tool_call_fragment() {
        let raw = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"lookup","arguments":"{\"q\""}}]},"finish_reason":null}]}"#;
        let chunk: WireStreamChunk = serde_json::from_str(raw).unwrap();
        let delta = chunk_to_delta(chunk).unwrap();
        assert_eq!(delta.tool_calls.len(), 1);
        let frag = &delta.tool_calls[0];
        assert_eq!(frag.index, 0);
        assert_eq!(frag.id.as_deref(), Some("call_1"));
        assert_eq!(frag.name.as_deref(), Some("lookup"));
        assert_eq!(frag.arguments, "{\"q\"");
    }

    #[test]
    fn usage_only_chunk_yields_usage_delta() {
        let raw = r#"{"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}}"#;
        let chunk: WireStreamChunk = serde_json::from_str(raw).unwrap();
        let delta = chunk_to_delta(chunk).unwrap();
        assert_eq!(delta.usage.unwrap().total_tokens, 10);
        assert!(delta.content.is_none());
    }

    #[test]
    fn finish_reason_parses_known_values() {
        assert_eq!(parse_finish_reason("stop"), Some(FinishReason::Stop));
        assert_eq!(
            parse_finish_reason("tool_calls"),
            Some(FinishReason::ToolCalls)
        );
        assert_eq!(parse_finish_reason("???"), None);
    }
}
