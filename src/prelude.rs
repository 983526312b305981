//! Convenience re-exports.

pub use crate::config::{OutputStorePolicy, TychoConfig};
pub use crate::conversation::{Conversation, ConversationBuilder, MessageStream};
pub use crate::error::{Result, TychoError};
pub use crate::hooks::{ConversationHooks, MessageEvent, ToolEvent};
pub use crate::output_store::{OutputStore, PeekResult};
pub use crate::provider::{ChatRequest, ChatResponse, ModelProvider, OpenAiCompatibleProvider};
pub use crate::script::{ScriptTool, SCRIPT_TOOL_NAME};
pub use crate::telemetry::UsageSink;
pub use crate::tools::{
    memory_tools, ClosureTool, Tool, ToolArguments, ToolExecutionContext, ToolParameters,
    ToolRegistry,
};
pub use crate::types::{ChatMessage, GenerationSettings, Role, ToolCallRequest, Usage};
