//! The streaming turn loop: model stream, tool execution, recursion.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, TychoError};
use crate::hooks::{BroadcastFn, ConversationHooks, MessageEvent, ToolEvent};
use crate::output_store::OutputStore;
use crate::provider::{ChatRequest, ModelProvider};
use crate::script::SCRIPT_TOOL_NAME;
use crate::telemetry::UsageSink;
use crate::tools::{Tool, ToolArguments, ToolExecutionContext, ToolRegistry};
use crate::types::{ChatMessage, GenerationSettings, Role, ToolCallFragment, ToolCallRequest};

/// Shared state behind a `Conversation` handle.
pub(super) struct ConversationState {
    pub id: String,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    pub provider: Arc<dyn ModelProvider>,
    pub settings: GenerationSettings,
    pub registry: std::sync::RwLock<ToolRegistry>,
    pub history: Mutex<Vec<ChatMessage>>,
    pub max_history: Option<usize>,
    pub hooks: ConversationHooks,
    pub usage_sink: Option<Arc<dyn UsageSink>>,
    pub output_store: Arc<OutputStore>,
    pub active_cancel: std::sync::Mutex<Option<CancellationToken>>,
}

/// Drive one user turn to completion: stream, execute tool calls, recurse
/// until the model produces a turn with no calls, is cancelled, or fails.
pub(super) async fn run_turn(
    state: Arc<ConversationState>,
    user_message: ChatMessage,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<Result<String>>,
) {
    append(&state, user_message).await;
    state.hooks.emit_message(MessageEvent::Start).await;

    // Token usage summed across every model call of this message, reported
    // to the sink once when the turn loop exits.
    let mut usage_total: Option<crate::types::Usage> = None;

    loop {
        let request = ChatRequest {
            messages: state.history.lock().await.clone(),
            settings: state.settings.clone(),
            tools: registry_snapshot(&state).definitions(),
        };

        let mut stream = match state.provider.stream_chat(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                report_usage(&state, usage_total);
                fail(&state, &tx, e).await;
                return;
            }
        };

        let mut text = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut usage = None;
        let mut cancelled = false;
        let mut stream_error = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                delta = stream.next() => {
                    let Some(delta) = delta else { break };
                    match delta {
                        Ok(delta) => {
                            if let Some(chunk) = delta.content {
                                if !chunk.is_empty() {
                                    text.push_str(&chunk);
                                    state
                                        .hooks
                                        .emit_message(MessageEvent::Chunk(chunk.clone()))
                                        .await;
                                    let _ = tx.send(Ok(chunk));
                                }
                            }
                            for fragment in delta.tool_calls {
                                accumulator.apply(fragment);
                            }
                            if let Some(u) = delta.usage {
                                usage = Some(u);
                            }
                        }
                        Err(e) => {
                            stream_error = Some(e);
                            break;
                        }
                    }
                }
            }
        }
        drop(stream);

        if let Some(u) = usage {
            usage_total = Some(match usage_total {
                Some(total) => total.add(&u),
                None => u,
            });
        }

        if let Some(e) = stream_error {
            report_usage(&state, usage_total);
            fail(&state, &tx, e).await;
            return;
        }

        if cancelled {
            report_usage(&state, usage_total);
            finalize_cancel(&state, text).await;
            return;
        }

        let calls = accumulator.finish();
        if calls.is_empty() {
            report_usage(&state, usage_total);
            if !text.is_empty() {
                append(&state, ChatMessage::assistant(text.clone())).await;
            }
            state.hooks.emit_message(MessageEvent::End(text)).await;
            return;
        }

        append(
            &state,
            ChatMessage::assistant_with_tool_calls(text.clone(), calls.clone()),
        )
        .await;

        // Sequential execution, in stream-index order. Cancellation is
        // honored between calls; a call already running finishes on its own.
        for call in &calls {
            if cancel.is_cancelled() {
                // The assistant message is already finalized; remaining
                // calls are simply not executed. The cancel hook still
                // carries the text accumulated this turn.
                report_usage(&state, usage_total);
                state
                    .hooks
                    .emit_message(MessageEvent::Cancel(text.clone()))
                    .await;
                return;
            }
            let result = execute_call(&state, call).await;
            let result = match state.output_store.preview(&state.id, result).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(error = %e, tool = %call.name, "archiving tool result failed");
                    serde_json::json!({ "error": format!("failed to archive tool result: {e}") })
                }
            };
            append(&state, ChatMessage::tool_result(&call.id, &result)).await;
        }
    }
}

/// Run one tool call, converting every failure into an `{"error": ...}`
/// value the model can read on the next turn.
async fn execute_call(state: &Arc<ConversationState>, call: &ToolCallRequest) -> serde_json::Value {
    let registry = registry_snapshot(state);
    let Some(tool) = registry.get(&call.name).cloned() else {
        tracing::warn!(tool = %call.name, "model requested unknown tool");
        return serde_json::json!({ "error": format!("Tool \"{}\" not found", call.name) });
    };

    let arguments = match call.parse_arguments() {
        Ok(arguments) => arguments,
        Err(e) => return serde_json::json!({ "error": e.to_string() }),
    };

    state
        .hooks
        .emit_tool(ToolEvent::Before {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: arguments.clone(),
        })
        .await;

    let mut ctx = ToolExecutionContext {
        tool_call_id: Some(call.id.clone()),
        conversation_id: Some(state.id.clone()),
        project_id: state.project_id.clone(),
        user_id: state.user_id.clone(),
        ..Default::default()
    };

    // The script tool gets the live registry plus a broadcaster so events
    // raised inside the sandbox reach the hook surface in order.
    let forwarder = if call.name == SCRIPT_TOOL_NAME {
        ctx.registry = Some(registry);
        ctx.output_store = Some(state.output_store.clone());
        let (broadcast, forwarder) = broadcast_forwarder(state.hooks.clone());
        ctx.broadcast = Some(broadcast);
        Some(forwarder)
    } else {
        None
    };

    let args = ToolArguments::new(arguments);
    let outcome = tool.execute(&args, &ctx).await;
    drop(ctx);
    if let Some(forwarder) = forwarder {
        // All broadcaster clones are gone once the tool returns; await the
        // forwarder so script events land before the after/failed event.
        let _ = forwarder.await;
    }

    match outcome {
        Ok(result) => {
            state
                .hooks
                .emit_tool(ToolEvent::After {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    result: result.clone(),
                })
                .await;
            result
        }
        Err(e) => {
            tracing::warn!(tool = %call.name, error = %e, "tool execution failed");
            state
                .hooks
                .emit_tool(ToolEvent::Failed {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    message: e.to_string(),
                })
                .await;
            serde_json::json!({ "error": e.to_string() })
        }
    }
}

/// Bridge the sandbox's synchronous broadcast calls back onto the async hook
/// surface. The returned task drains in order and finishes when every clone
/// of the broadcast closure has been dropped.
fn broadcast_forwarder(hooks: ConversationHooks) -> (BroadcastFn, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ToolEvent>();
    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            hooks.emit_tool(event).await;
        }
    });
    let broadcast: BroadcastFn = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (broadcast, task)
}

/// Append to history, trim to the window, and fire the history hook.
///
/// Trimming drops the oldest non-system message so a leading system prompt
/// survives any window size.
pub(super) async fn append(state: &Arc<ConversationState>, message: ChatMessage) {
    {
        let mut history = state.history.lock().await;
        history.push(message.clone());
        if let Some(max) = state.max_history {
            while history.len() > max {
                let drop_at = usize::from(
                    history.first().map(|m| m.role == Role::System).unwrap_or(false),
                );
                if drop_at >= history.len() {
                    break;
                }
                history.remove(drop_at);
            }
        }
    }
    state.hooks.emit_history(message).await;
}

async fn finalize_cancel(state: &Arc<ConversationState>, partial: String) {
    // Partial text becomes a plain assistant message; pending tool calls
    // from an unfinished stream are discarded.
    if !partial.is_empty() {
        append(state, ChatMessage::assistant(partial.clone())).await;
    }
    state.hooks.emit_message(MessageEvent::Cancel(partial)).await;
}

async fn fail(
    state: &Arc<ConversationState>,
    tx: &mpsc::UnboundedSender<Result<String>>,
    error: TychoError,
) {
    tracing::error!(conversation = %state.id, error = %error, "model turn failed");
    state.hooks.emit_error(error.to_string()).await;
    let _ = tx.send(Err(error));
}

/// Forward the turn's summed usage to the sink, fire-and-forget. `None`
/// (the backend never reported usage) sends nothing.
fn report_usage(state: &Arc<ConversationState>, usage: Option<crate::types::Usage>) {
    let Some(usage) = usage else {
        return;
    };
    let Some(sink) = state.usage_sink.clone() else {
        return;
    };
    let conversation_id = state.id.clone();
    let project_id = state.project_id.clone();
    tokio::spawn(async move {
        if let Err(e) = sink
            .update_token_usage(&conversation_id, project_id.as_deref(), usage)
            .await
        {
            tracing::warn!(conversation = %conversation_id, error = %e, "usage sink failed");
        }
    });
}

fn registry_snapshot(state: &Arc<ConversationState>) -> ToolRegistry {
    match state.registry.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Reassembles streamed tool-call fragments into complete requests.
///
/// Fragments arrive keyed by stream index; the first fragment for an index
/// carries the id and name, later ones extend the argument string.
#[derive(Default)]
pub(super) struct ToolCallAccumulator {
    partial: Vec<PartialCall>,
}

/// Upper bound on the stream index of a tool-call fragment. Slots are
/// allocated up to the index, so an absurd index from a misbehaving backend
/// must not translate into an allocation.
const MAX_TOOL_CALL_INDEX: usize = 64;

#[derive(Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn apply(&mut self, fragment: ToolCallFragment) {
        if fragment.index >= MAX_TOOL_CALL_INDEX {
            tracing::warn!(index = fragment.index, "tool-call fragment index out of range, dropped");
            return;
        }
        while self.partial.len() <= fragment.index {
            self.partial.push(PartialCall::default());
        }
        let slot = &mut self.partial[fragment.index];
        if let Some(id) = fragment.id {
            slot.id = Some(id);
        }
        if let Some(name) = fragment.name {
            slot.name = Some(name);
        }
        slot.arguments.push_str(&fragment.arguments);
    }

    /// Complete calls in index order. Slots that never received a name are
    /// dropped; a missing id gets a synthesized one.
    pub(super) fn finish(self) -> Vec<ToolCallRequest> {
        self.partial
            .into_iter()
            .filter_map(|p| {
                let name = p.name?;
                Some(ToolCallRequest {
                    id: p.id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
                    name,
                    arguments: p.arguments,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> ToolCallFragment {
        ToolCallFragment {
            index,
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: args.to_string(),
        }
    }

    #[test]
    fn accumulator_joins_argument_fragments() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(fragment(0, Some("call_1"), Some("lookup"), ""));
        acc.apply(fragment(0, None, None, r#"{"q":"#));
        acc.apply(fragment(0, None, None, r#""rust"}"#));

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "lookup");
        assert_eq!(calls[0].arguments, r#"{"q":"rust"}"#);
    }

    #[test]
    fn accumulator_keeps_index_order_for_parallel_calls() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(fragment(1, Some("b"), Some("second"), "{}"));
        acc.apply(fragment(0, Some("a"), Some("first"), "{}"));

        let calls = acc.finish();
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].name, "second");
    }

    #[test]
    fn nameless_slots_are_dropped() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(fragment(0, Some("a"), None, "{}"));
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn out_of_range_fragment_index_is_dropped() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(fragment(usize::MAX, Some("x"), Some("huge"), "{}"));
        acc.apply(fragment(0, Some("a"), Some("ok"), "{}"));

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ok");
    }

    #[test]
    fn missing_id_is_synthesized() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(fragment(0, None, Some("lookup"), "{}"));
        let calls = acc.finish();
        assert!(calls[0].id.starts_with("call_"));
    }
}
