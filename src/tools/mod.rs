//! Tool system: the capability contract every callable tool implements.

pub mod arguments;
pub mod builtin;
pub mod registry;
pub mod tool;
pub mod types;

pub use arguments::ToolArguments;
pub use builtin::memory_tools;
pub use registry::ToolRegistry;
pub use tool::{ClosureTool, Tool, ToolExecutionContext};
pub use types::{ParameterBuilder, ToolParameters};
