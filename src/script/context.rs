//! Execution context threaded into the script sandbox.

use std::sync::Arc;

use crate::hooks::BroadcastFn;
use crate::output_store::OutputStore;
use crate::tools::{Tool, ToolRegistry};

/// Everything one script invocation is allowed to reach.
///
/// The registry here has already been scoped: the script tool strips itself
/// out before building this context, so model-authored code cannot recurse
/// into the sandbox.
#[derive(Clone)]
pub struct ScriptExecutionContext {
    pub conversation_id: Option<String>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    /// The tool-call id of the `run_script` invocation; script-level events
    /// (progress, completion) are tagged with it.
    pub invocation_id: String,
    pub registry: ToolRegistry,
    /// Extra bindings exposed to scripts only, not advertised to the model.
    pub extensions: Vec<Arc<dyn Tool>>,
    pub broadcast: Option<BroadcastFn>,
    pub output_store: Option<Arc<OutputStore>>,
}

impl std::fmt::Debug for ScriptExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptExecutionContext")
            .field("conversation_id", &self.conversation_id)
            .field("invocation_id", &self.invocation_id)
            .field("tools", &self.registry.names())
            .field("extensions", &self.extensions.len())
            .finish()
    }
}
