//! The `run_script` tool: lets the model write and execute sandboxed code.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::TychoError;
use crate::hooks::ToolEvent;
use crate::tools::{Tool, ToolArguments, ToolExecutionContext, ToolParameters, ToolRegistry};

use super::context::ScriptExecutionContext;
use super::runtime::ScriptRuntime;

/// Name the script tool registers under; the engine strips it from the
/// sandbox registry so scripts cannot recurse into it.
pub const SCRIPT_TOOL_NAME: &str = "run_script";

const DESCRIPTION: &str = "Execute a script in a sandboxed runtime with the other tools bound as \
functions. Call a tool as `tool_name(#{ arg: value })`; its JSON result is the return value. \
Use `progress(message)` to report intermediate status, and `peek(output_id, offset, limit)` \
to page through previously archived outputs. The final expression of the script is returned \
as the tool result.";

/// Tool that evaluates model-authored scripts against the live registry.
pub struct ScriptTool {
    parameters: ToolParameters,
    extensions: Vec<Arc<dyn Tool>>,
}

impl Default for ScriptTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptTool {
    pub fn new() -> Self {
        Self {
            parameters: ToolParameters::object()
                .string("purpose", "One-line summary of what the script does", true)
                .string("code", "The script source to execute", true)
                .build(),
            extensions: Vec::new(),
        }
    }

    /// Add bindings exposed to scripts only, not advertised to the model.
    pub fn with_extensions(mut self, extensions: Vec<Arc<dyn Tool>>) -> Self {
        self.extensions = extensions;
        self
    }
}

#[async_trait]
impl Tool for ScriptTool {
    fn name(&self) -> &str {
        SCRIPT_TOOL_NAME
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    /// Never returns `Err`: every failure becomes a structured error value
    /// so the model can read it and self-correct on the next turn.
    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, TychoError> {
        let purpose = args.get_str_opt("purpose").unwrap_or_default().to_string();
        let code = match args.get_str("code") {
            Ok(code) => code.to_string(),
            Err(e) => return Ok(error_result(&purpose, &e.to_string())),
        };

        let call_id = ctx
            .tool_call_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Some(b) = &ctx.broadcast {
            b(ToolEvent::ScriptExecuting {
                call_id: call_id.clone(),
                purpose: purpose.clone(),
                code: code.clone(),
            });
        }

        let registry = ctx
            .registry
            .clone()
            .unwrap_or_else(ToolRegistry::new)
            .without(SCRIPT_TOOL_NAME);
        let runtime = ScriptRuntime::new(ScriptExecutionContext {
            conversation_id: ctx.conversation_id.clone(),
            project_id: ctx.project_id.clone(),
            user_id: ctx.user_id.clone(),
            invocation_id: call_id.clone(),
            registry,
            extensions: self.extensions.clone(),
            broadcast: ctx.broadcast.clone(),
            output_store: ctx.output_store.clone(),
        });

        let mut outcome = runtime.execute(&code).await;
        if outcome.is_err() {
            // Models sometimes double-escape the source, shipping literal
            // `\n` sequences instead of newlines. One normalized retry.
            if let Some(normalized) = normalize_escapes(&code) {
                tracing::warn!(call_id = %call_id, "script failed; retrying with unescaped source");
                outcome = runtime.execute(&normalized).await;
            }
        }

        match outcome {
            Ok(value) => {
                if let Some(b) = &ctx.broadcast {
                    b(ToolEvent::ScriptComplete { call_id });
                }
                // Oversized values are archived by the engine like any other
                // tool result; the sandbox's peek binding pages them back.
                Ok(value)
            }
            Err(e) => {
                let message = e.to_string();
                if let Some(b) = &ctx.broadcast {
                    b(ToolEvent::ScriptError {
                        call_id,
                        message: message.clone(),
                    });
                }
                Ok(error_result(&purpose, &message))
            }
        }
    }
}

fn error_result(purpose: &str, message: &str) -> serde_json::Value {
    serde_json::json!({
        "__error": true,
        "error": message,
        "purpose": purpose,
    })
}

/// If the source has no real newlines but carries escaped ones, produce an
/// unescaped copy to retry with. Returns `None` when the source looks sane.
fn normalize_escapes(code: &str) -> Option<String> {
    if code.contains('\n') || !code.contains("\\n") {
        return None;
    }
    Some(
        code.replace("\\r\\n", "\n")
            .replace("\\n", "\n")
            .replace("\\t", "\t")
            .replace("\\\"", "\""),
    )
}

impl std::fmt::Debug for ScriptTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptTool")
            .field("extensions", &self.extensions.len())
            .finish()
    }
}
