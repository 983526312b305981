//! Shared test helpers: a scripted mock provider.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use tycho::error::TychoError;
use tycho::provider::{ChatRequest, ChatResponse, ModelProvider};
use tycho::types::*;

/// One scripted model turn: the deltas its stream will yield.
#[derive(Clone, Default)]
pub struct ScriptedTurn {
    pub deltas: Vec<ChatDelta>,
    /// When set, the stream never completes after the deltas; used to test
    /// cancellation mid-stream.
    pub hang_after: bool,
}

impl ScriptedTurn {
    /// A turn that streams the given text chunks and stops.
    pub fn text(chunks: &[&str]) -> Self {
        let mut deltas: Vec<ChatDelta> = chunks
            .iter()
            .map(|c| ChatDelta {
                content: Some(c.to_string()),
                ..Default::default()
            })
            .collect();
        deltas.push(ChatDelta {
            finish_reason: Some(FinishReason::Stop),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
            ..Default::default()
        });
        Self {
            deltas,
            hang_after: false,
        }
    }

    /// A turn that requests the given tool calls (complete fragments).
    pub fn tool_calls(calls: &[(&str, &str, serde_json::Value)]) -> Self {
        let deltas = calls
            .iter()
            .enumerate()
            .map(|(index, (id, name, args))| ChatDelta {
                tool_calls: vec![ToolCallFragment {
                    index,
                    id: Some(id.to_string()),
                    name: Some(name.to_string()),
                    arguments: args.to_string(),
                }],
                ..Default::default()
            })
            .chain(std::iter::once(ChatDelta {
                finish_reason: Some(FinishReason::ToolCalls),
                ..Default::default()
            }))
            .collect();
        Self {
            deltas,
            hang_after: false,
        }
    }

    pub fn hanging(self) -> Self {
        Self {
            hang_after: true,
            ..self
        }
    }
}

/// A provider that replays scripted turns and records every request.
pub struct MockProvider {
    turns: Mutex<Vec<ScriptedTurn>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn queue(&self, turn: ScriptedTurn) {
        self.turns.lock().unwrap().push(turn);
    }

    /// Messages sent with the nth request.
    pub fn request_messages(&self, n: usize) -> Vec<ChatMessage> {
        self.requests.lock().unwrap()[n].messages.clone()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse, TychoError> {
        Err(TychoError::InvalidState(
            "mock provider only streams".into(),
        ))
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<ChatDelta, TychoError>>, TychoError> {
        self.requests.lock().unwrap().push(request.clone());
        let turn = {
            let mut turns = self.turns.lock().unwrap();
            if turns.is_empty() {
                return Err(TychoError::InvalidState("no scripted turn queued".into()));
            }
            turns.remove(0)
        };

        let deltas = futures::stream::iter(turn.deltas.into_iter().map(Ok));
        if turn.hang_after {
            Ok(Box::pin(deltas.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(deltas))
        }
    }
}
