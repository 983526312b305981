//! Sandboxed script execution with live tool bindings.

mod context;
mod runtime;
mod tool;

pub use context::ScriptExecutionContext;
pub use runtime::ScriptRuntime;
pub use tool::{ScriptTool, SCRIPT_TOOL_NAME};
