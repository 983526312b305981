//! Model backend trait and the OpenAI-compatible implementation.

pub mod http;
pub mod openai;

pub use openai::OpenAiCompatibleProvider;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::TychoError;
use crate::types::{ChatDelta, ChatMessage, GenerationSettings, ToolCallRequest, Usage};

/// A request sent to a model backend.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub settings: GenerationSettings,
    pub tools: Vec<ToolDefinition>,
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

/// Core trait implemented by model backends.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g. "openai-compatible").
    fn provider_name(&self) -> &str;

    /// The model id this provider instance serves.
    fn model_id(&self) -> &str;

    /// Run one turn, non-streaming.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, TychoError>;

    /// Run one turn, yielding deltas as they arrive.
    async fn stream_chat(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<ChatDelta, TychoError>>, TychoError>;
}
