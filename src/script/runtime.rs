//! Restricted script runtime with live tool bindings.
//!
//! Each invocation assembles a fresh [`rhai::Engine`]: no ambient file,
//! network, or process access, only the functions registered here. Every
//! registry tool becomes a host function of the same name taking one object
//! map of arguments, so a script can orchestrate multiple tool calls, branch
//! on their results, and return a single combined value.
//!
//! Scripts are synchronous; tool implementations are async. The bridge runs
//! the script on a blocking thread and re-enters the runtime with a captured
//! [`tokio::runtime::Handle`], which requires a multi-threaded runtime.

use std::sync::Arc;

use rhai::{Dynamic, Engine, EvalAltResult, Position, Scope};
use uuid::Uuid;

use crate::error::{Result, TychoError};
use crate::hooks::ToolEvent;
use crate::provider::http::shared_client;
use crate::tools::{Tool, ToolArguments, ToolExecutionContext};

use super::context::ScriptExecutionContext;

/// One-shot script evaluator bound to a [`ScriptExecutionContext`].
pub struct ScriptRuntime {
    ctx: ScriptExecutionContext,
}

impl ScriptRuntime {
    pub fn new(ctx: ScriptExecutionContext) -> Self {
        Self { ctx }
    }

    /// Evaluate `code` and return its final expression as JSON.
    ///
    /// Script-level failures (syntax errors, thrown values, failed tool
    /// calls that the script did not catch) surface as
    /// [`TychoError::Script`].
    pub async fn execute(&self, code: &str) -> Result<serde_json::Value> {
        let ctx = self.ctx.clone();
        let code = code.to_string();
        let handle = tokio::runtime::Handle::current();
        tokio::task::spawn_blocking(move || eval_blocking(&ctx, &handle, &code))
            .await
            .map_err(|e| TychoError::Script(format!("script task failed: {e}")))?
    }
}

fn eval_blocking(
    ctx: &ScriptExecutionContext,
    handle: &tokio::runtime::Handle,
    code: &str,
) -> Result<serde_json::Value> {
    let engine = build_engine(ctx, handle);
    let mut scope = Scope::new();
    let result = engine
        .eval_with_scope::<Dynamic>(&mut scope, code)
        .map_err(|e| TychoError::Script(e.to_string()))?;
    if result.is_unit() {
        return Ok(serde_json::Value::Null);
    }
    rhai::serde::from_dynamic::<serde_json::Value>(&result)
        .map_err(|e| TychoError::Script(format!("script result not representable as JSON: {e}")))
}

fn build_engine(ctx: &ScriptExecutionContext, handle: &tokio::runtime::Handle) -> Engine {
    let mut engine = Engine::new();

    engine.on_print(|text| tracing::info!(target: "tycho::script", "{text}"));
    engine.on_debug(|text, _source, pos| {
        tracing::debug!(target: "tycho::script", position = %pos, "{text}")
    });

    for (name, tool) in ctx.registry.iter() {
        bind_tool(&mut engine, name, tool.clone(), ctx, handle);
    }
    for tool in &ctx.extensions {
        bind_tool(&mut engine, tool.name(), tool.clone(), ctx, handle);
    }

    bind_progress(&mut engine, ctx);
    bind_peek(&mut engine, ctx, handle);
    bind_fetch(&mut engine, handle);

    engine
}

/// Expose one tool as `name(#{ ... })` plus a zero-argument overload.
fn bind_tool(
    engine: &mut Engine,
    name: &str,
    tool: Arc<dyn Tool>,
    ctx: &ScriptExecutionContext,
    handle: &tokio::runtime::Handle,
) {
    let call = tool_call_fn(name.to_string(), tool, ctx, handle);

    let unary = call.clone();
    engine.register_fn(name, move |args: rhai::Map| -> ScriptFnResult {
        let args = rhai::serde::from_dynamic::<serde_json::Value>(&Dynamic::from(args))
            .map_err(|e| runtime_error(format!("invalid tool arguments: {e}")))?;
        unary(args)
    });
    engine.register_fn(name, move || -> ScriptFnResult {
        call(serde_json::json!({}))
    });
}

type ScriptFnResult = std::result::Result<Dynamic, Box<EvalAltResult>>;
type ToolCallFn = Arc<dyn Fn(serde_json::Value) -> ScriptFnResult + Send + Sync>;

fn tool_call_fn(
    name: String,
    tool: Arc<dyn Tool>,
    ctx: &ScriptExecutionContext,
    handle: &tokio::runtime::Handle,
) -> ToolCallFn {
    let handle = handle.clone();
    let broadcast = ctx.broadcast.clone();
    let conversation_id = ctx.conversation_id.clone();
    let project_id = ctx.project_id.clone();
    let user_id = ctx.user_id.clone();

    Arc::new(move |arguments: serde_json::Value| {
        // Each sub-call gets its own id so transports can correlate
        // before/after pairs raised from inside the script.
        let call_id = Uuid::new_v4().to_string();
        if let Some(b) = &broadcast {
            b(ToolEvent::Before {
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            });
        }

        let tool_ctx = ToolExecutionContext {
            tool_call_id: Some(call_id.clone()),
            conversation_id: conversation_id.clone(),
            project_id: project_id.clone(),
            user_id: user_id.clone(),
            ..Default::default()
        };
        let args = ToolArguments::new(arguments);
        let outcome = handle.block_on(tool.execute(&args, &tool_ctx));

        match outcome {
            Ok(value) => {
                if let Some(b) = &broadcast {
                    b(ToolEvent::After {
                        call_id,
                        name: name.clone(),
                        result: value.clone(),
                    });
                }
                rhai::serde::to_dynamic(&value)
                    .map_err(|e| runtime_error(format!("tool result not scriptable: {e}")))
            }
            Err(e) => {
                if let Some(b) = &broadcast {
                    b(ToolEvent::Failed {
                        call_id,
                        name: name.clone(),
                        message: e.to_string(),
                    });
                }
                Err(runtime_error(format!("{name}: {e}")))
            }
        }
    })
}

/// `progress(message)` and `progress(message, data)` report to the hook
/// surface without touching the script's return value.
fn bind_progress(engine: &mut Engine, ctx: &ScriptExecutionContext) {
    let broadcast = ctx.broadcast.clone();
    let invocation_id = ctx.invocation_id.clone();
    engine.register_fn("progress", move |message: &str| {
        if let Some(b) = &broadcast {
            b(ToolEvent::ScriptProgress {
                call_id: invocation_id.clone(),
                message: message.to_string(),
                data: None,
            });
        }
    });

    let broadcast = ctx.broadcast.clone();
    let invocation_id = ctx.invocation_id.clone();
    engine.register_fn("progress", move |message: &str, data: Dynamic| {
        if let Some(b) = &broadcast {
            let data = rhai::serde::from_dynamic::<serde_json::Value>(&data).ok();
            b(ToolEvent::ScriptProgress {
                call_id: invocation_id.clone(),
                message: message.to_string(),
                data,
            });
        }
    });
}

/// `peek(output_id, offset, limit)` pages through archived outputs.
fn bind_peek(engine: &mut Engine, ctx: &ScriptExecutionContext, handle: &tokio::runtime::Handle) {
    let Some(store) = ctx.output_store.clone() else {
        return;
    };
    let handle = handle.clone();
    engine.register_fn(
        "peek",
        move |id: &str, offset: i64, limit: i64| -> ScriptFnResult {
            let page = handle
                .block_on(store.peek(id, offset.max(0) as usize, limit.max(0) as usize))
                .map_err(|e| runtime_error(e.to_string()))?;
            rhai::serde::to_dynamic(&page)
                .map_err(|e| runtime_error(format!("peek result not scriptable: {e}")))
        },
    );
}

/// `fetch(url)` performs an HTTP GET and returns `#{status, body}`.
fn bind_fetch(engine: &mut Engine, handle: &tokio::runtime::Handle) {
    let handle = handle.clone();
    engine.register_fn("fetch", move |url: &str| -> ScriptFnResult {
        let response = handle
            .block_on(async {
                let response = shared_client().get(url).send().await?;
                let status = response.status().as_u16();
                let body = response.text().await?;
                Ok::<_, reqwest::Error>((status, body))
            })
            .map_err(|e| runtime_error(format!("fetch failed: {e}")))?;
        rhai::serde::to_dynamic(&serde_json::json!({
            "status": response.0,
            "body": response.1,
        }))
        .map_err(|e| runtime_error(format!("fetch result not scriptable: {e}")))
    });
}

fn runtime_error(message: String) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(message),
        Position::NONE,
    ))
}
