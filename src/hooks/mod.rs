//! Typed callback points for transports observing a conversation.
//!
//! Hooks decouple the engine from any particular transport: a WebSocket
//! layer, a CLI, or a test harness registers the callbacks it cares about
//! and receives streaming chunks, tool lifecycle events, and history
//! mutations as they happen. All hooks are optional and may be async; the
//! engine awaits each one before proceeding, so emission order is delivery
//! order.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::types::ChatMessage;

/// An async hook callback.
pub type HookFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// Synchronous broadcast closure handed to the script sandbox. Events pass
/// through a channel back onto the async hook surface, preserving order.
pub type BroadcastFn = Arc<dyn Fn(ToolEvent) + Send + Sync>;

/// Message-lifecycle events for one `send_message` call.
#[derive(Debug, Clone)]
pub enum MessageEvent {
    /// A model stream is about to open.
    Start,
    /// One streamed text chunk.
    Chunk(String),
    /// The turn completed; carries the full concatenated text.
    End(String),
    /// The turn was cancelled; carries the partial text accumulated so far.
    Cancel(String),
}

/// Tool-lifecycle events, including those raised from inside a running
/// script. Sub-tool invocations made by model-authored code surface here
/// exactly like first-class tool calls.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    Before {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    After {
        call_id: String,
        name: String,
        result: serde_json::Value,
    },
    Failed {
        call_id: String,
        name: String,
        message: String,
    },
    ScriptExecuting {
        call_id: String,
        purpose: String,
        code: String,
    },
    ScriptProgress {
        call_id: String,
        message: String,
        data: Option<serde_json::Value>,
    },
    ScriptComplete {
        call_id: String,
    },
    ScriptError {
        call_id: String,
        message: String,
    },
}

impl ToolEvent {
    /// The call id this event belongs to.
    pub fn call_id(&self) -> &str {
        match self {
            Self::Before { call_id, .. }
            | Self::After { call_id, .. }
            | Self::Failed { call_id, .. }
            | Self::ScriptExecuting { call_id, .. }
            | Self::ScriptProgress { call_id, .. }
            | Self::ScriptComplete { call_id }
            | Self::ScriptError { call_id, .. } => call_id,
        }
    }
}

/// Optional observer callbacks for a conversation.
#[derive(Clone, Default)]
pub struct ConversationHooks {
    pub message: Option<HookFn<MessageEvent>>,
    pub tool: Option<HookFn<ToolEvent>>,
    pub history: Option<HookFn<ChatMessage>>,
    pub error: Option<HookFn<String>>,
}

impl ConversationHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message-lifecycle hook.
    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(MessageEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.message = Some(Arc::new(move |ev| Box::pin(f(ev))));
        self
    }

    /// Register a tool-lifecycle hook.
    pub fn on_tool<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ToolEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tool = Some(Arc::new(move |ev| Box::pin(f(ev))));
        self
    }

    /// Register a history-mutation hook, fired for every appended message.
    pub fn on_history<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ChatMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.history = Some(Arc::new(move |msg| Box::pin(f(msg))));
        self
    }

    /// Register a conversation-level error hook.
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.error = Some(Arc::new(move |msg| Box::pin(f(msg))));
        self
    }

    pub(crate) async fn emit_message(&self, event: MessageEvent) {
        if let Some(hook) = &self.message {
            hook(event).await;
        }
    }

    pub(crate) async fn emit_tool(&self, event: ToolEvent) {
        if let Some(hook) = &self.tool {
            hook(event).await;
        }
    }

    pub(crate) async fn emit_history(&self, message: ChatMessage) {
        if let Some(hook) = &self.history {
            hook(message).await;
        }
    }

    pub(crate) async fn emit_error(&self, message: String) {
        if let Some(hook) = &self.error {
            hook(message).await;
        }
    }
}

impl std::fmt::Debug for ConversationHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationHooks")
            .field("message", &self.message.as_ref().map(|_| ".."))
            .field("tool", &self.tool.as_ref().map(|_| ".."))
            .field("history", &self.history.as_ref().map(|_| ".."))
            .field("error", &self.error.as_ref().map(|_| ".."))
            .finish()
    }
}
