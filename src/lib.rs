//! Tycho — streaming conversation engine with tool calling and a sandboxed
//! script runtime.
//!
//! A [`Conversation`](conversation::Conversation) drives the full turn loop
//! against an OpenAI-compatible backend: stream text, reassemble tool calls,
//! execute them, feed results back, and recurse until the model answers in
//! plain text. Tools implement the [`Tool`](tools::Tool) trait; the bundled
//! [`ScriptTool`](script::ScriptTool) lets the model write code that calls
//! the other tools directly. Oversized tool outputs are archived in an
//! [`OutputStore`](output_store::OutputStore) and replaced by pageable
//! previews.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tycho::prelude::*;
//!
//! # async fn example() -> tycho::error::Result<()> {
//! let provider = Arc::new(OpenAiCompatibleProvider::from_env("gpt-4o")?);
//! let conversation = Conversation::builder(provider)
//!     .system_prompt("You are a helpful assistant.")
//!     .tool(Arc::new(ScriptTool::new()))
//!     .build();
//!
//! let reply = conversation.send_message("Hello!").await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod hooks;
pub mod output_store;
pub mod prelude;
pub mod provider;
pub mod script;
pub mod telemetry;
pub mod tools;
pub mod types;
