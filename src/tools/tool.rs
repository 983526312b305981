//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TychoError;
use crate::hooks::BroadcastFn;
use crate::output_store::OutputStore;

use super::arguments::ToolArguments;
use super::registry::ToolRegistry;
use super::types::ToolParameters;

/// Context available during tool execution.
///
/// The conversation engine fills `tool_call_id` and `conversation_id` for
/// every call. The registry, broadcaster, and output store are injected only
/// when the script tool runs, so that model-authored code can reach the other
/// tools and report progress through the hook surface.
#[derive(Clone, Default)]
pub struct ToolExecutionContext {
    pub tool_call_id: Option<String>,
    pub conversation_id: Option<String>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    pub registry: Option<ToolRegistry>,
    pub broadcast: Option<BroadcastFn>,
    pub output_store: Option<Arc<OutputStore>>,
}

impl std::fmt::Debug for ToolExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutionContext")
            .field("tool_call_id", &self.tool_call_id)
            .field("conversation_id", &self.conversation_id)
            .field("registry", &self.registry.as_ref().map(|r| r.names()))
            .field("broadcast", &self.broadcast.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Core tool trait — implement to create custom tools.
///
/// `execute` must not fail for recoverable/user errors the model should see;
/// raise [`TychoError::ToolExecution`] and the engine converts it into an
/// `{"error": ...}` tool-result message instead of aborting the turn.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    /// Human-readable description, advertised to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the parameters.
    fn parameters(&self) -> &ToolParameters;

    /// Execute the tool with parsed arguments.
    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, TychoError>;
}

/// Type alias for the tool handler function.
type ToolHandler = dyn Fn(
        ToolArguments,
        ToolExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, TychoError>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick tool creation.
pub struct ClosureTool {
    name: String,
    description: String,
    parameters: ToolParameters,
    handler: Arc<ToolHandler>,
}

impl ClosureTool {
    /// Create a tool from an async closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, TychoError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl Tool for ClosureTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, TychoError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for ClosureTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_tool_round_trips_arguments() {
        let tool = ClosureTool::new(
            "echo",
            "Echo the input back",
            ToolParameters::object().string("text", "Text to echo", true).build(),
            |args, _ctx| async move {
                let text = args.get_str("text")?.to_string();
                Ok(serde_json::json!({ "echo": text }))
            },
        );

        let args = ToolArguments::new(serde_json::json!({"text": "hi"}));
        let result = tool
            .execute(&args, &ToolExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(result["echo"], "hi");
    }

    #[tokio::test]
    async fn closure_tool_propagates_tool_errors() {
        let tool = ClosureTool::new(
            "fail",
            "Always fails",
            ToolParameters::empty(),
            |_args, _ctx| async move {
                Err(TychoError::tool("fail", "deliberate"))
            },
        );

        let args = ToolArguments::new(serde_json::json!({}));
        let err = tool
            .execute(&args, &ToolExecutionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TychoError::ToolExecution { .. }));
    }
}
