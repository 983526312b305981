//! Conversation engine: history, streaming turns, and the tool loop.

mod engine;
mod stream;

pub use stream::MessageStream;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::OutputStorePolicy;
use crate::hooks::ConversationHooks;
use crate::output_store::OutputStore;
use crate::provider::ModelProvider;
use crate::telemetry::UsageSink;
use crate::tools::{Tool, ToolRegistry};
use crate::types::{ChatMessage, GenerationSettings};

use engine::ConversationState;

/// A stateful conversation with one model backend.
///
/// Cloning yields another handle to the same conversation; history, tools,
/// and the output store are shared. One turn runs at a time per handle
/// family: `send_message` replaces the previous turn's cancellation token,
/// and callers are expected to drive turns sequentially.
#[derive(Clone)]
pub struct Conversation {
    state: Arc<ConversationState>,
}

impl Conversation {
    /// Start building a conversation around a provider.
    pub fn builder(provider: Arc<dyn ModelProvider>) -> ConversationBuilder {
        ConversationBuilder::new(provider)
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    /// Send a user message and start the turn loop.
    ///
    /// Returns immediately; the turn runs on a spawned task. The returned
    /// [`MessageStream`] yields assistant text chunks as they stream and
    /// resolves to the full turn text when awaited.
    pub fn send_message(&self, text: impl Into<String>) -> MessageStream {
        let cancel = CancellationToken::new();
        if let Ok(mut slot) = self.state.active_cancel.lock() {
            *slot = Some(cancel.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let state = self.state.clone();
        let message = ChatMessage::user(text);
        tokio::spawn(async move {
            engine::run_turn(state, message, cancel, tx).await;
        });
        MessageStream::new(rx)
    }

    /// Cancel the in-flight turn, if any.
    ///
    /// Streamed partial text is finalized into history as a plain assistant
    /// message; pending tool calls are dropped. A no-op when idle.
    pub fn abort(&self) {
        let token = self
            .state
            .active_cancel
            .lock()
            .ok()
            .and_then(|slot| slot.clone());
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// A snapshot of the conversation history.
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.state.history.lock().await.clone()
    }

    /// Append a message directly, bypassing the model. Applies the same
    /// trimming and history hook as engine-driven appends.
    pub async fn push_message(&self, message: ChatMessage) {
        engine::append(&self.state, message).await;
    }

    /// Clear history (keeping any leading system prompt) and drop this
    /// conversation's archived outputs.
    pub async fn clear(&self) {
        {
            let mut history = self.state.history.lock().await;
            history.retain(|m| m.role == crate::types::Role::System);
        }
        self.state.output_store.clear_for_conversation(&self.state.id).await;
    }

    /// Register a tool after construction.
    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        match self.state.registry.write() {
            Ok(mut registry) => registry.register(tool),
            Err(poisoned) => poisoned.into_inner().register(tool),
        }
    }

    /// Names of the currently registered tools.
    pub fn tool_names(&self) -> Vec<String> {
        match self.state.registry.read() {
            Ok(registry) => registry.names(),
            Err(poisoned) => poisoned.into_inner().names(),
        }
    }

    /// The output store backing this conversation.
    pub fn output_store(&self) -> Arc<OutputStore> {
        self.state.output_store.clone()
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.state.id)
            .field("model", &self.state.provider.model_id())
            .finish()
    }
}

/// Builder for [`Conversation`].
pub struct ConversationBuilder {
    id: Option<String>,
    project_id: Option<String>,
    user_id: Option<String>,
    provider: Arc<dyn ModelProvider>,
    system_prompt: Option<String>,
    settings: GenerationSettings,
    registry: ToolRegistry,
    max_history: Option<usize>,
    hooks: ConversationHooks,
    usage_sink: Option<Arc<dyn UsageSink>>,
    output_store: Option<Arc<OutputStore>>,
}

impl ConversationBuilder {
    fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            id: None,
            project_id: None,
            user_id: None,
            provider,
            system_prompt: None,
            settings: GenerationSettings::default(),
            registry: ToolRegistry::new(),
            max_history: None,
            hooks: ConversationHooks::new(),
            usage_sink: None,
            output_store: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.project_id = Some(id.into());
        self
    }

    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        for tool in tools {
            self.registry.register(tool);
        }
        self
    }

    /// Cap history length; the oldest non-system messages are dropped first.
    pub fn max_history(mut self, max: usize) -> Self {
        self.max_history = Some(max);
        self
    }

    pub fn hooks(mut self, hooks: ConversationHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = Some(sink);
        self
    }

    /// Share an output store across conversations. Defaults to a fresh store
    /// with [`OutputStorePolicy::default`].
    pub fn output_store(mut self, store: Arc<OutputStore>) -> Self {
        self.output_store = Some(store);
        self
    }

    pub fn build(self) -> Conversation {
        let mut history = Vec::new();
        if let Some(prompt) = self.system_prompt {
            history.push(ChatMessage::system(prompt));
        }
        let state = ConversationState {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            project_id: self.project_id,
            user_id: self.user_id,
            provider: self.provider,
            settings: self.settings,
            registry: std::sync::RwLock::new(self.registry),
            history: Mutex::new(history),
            max_history: self.max_history,
            hooks: self.hooks,
            usage_sink: self.usage_sink,
            output_store: self
                .output_store
                .unwrap_or_else(|| OutputStore::new(OutputStorePolicy::default())),
            active_cancel: std::sync::Mutex::new(None),
        };
        Conversation {
            state: Arc::new(state),
        }
    }
}
