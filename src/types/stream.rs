//! Streaming delta types.

use serde::{Deserialize, Serialize};

use super::usage::Usage;

/// A delta emitted while streaming a model turn. Each delta carries either
/// incremental text, tool-call fragments, or the terminal usage summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatDelta {
    /// Incremental text content, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool-call fragments keyed by stream index.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallFragment>,
    /// Finish reason (only on the final delta of a turn).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Usage summary (typically only on the final delta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One streamed fragment of a tool call. A single turn may interleave
/// fragments for several parallel calls; `index` ties fragments together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Argument JSON fragment, concatenated in arrival order.
    #[serde(default)]
    pub arguments: String,
}

/// Why the model stopped emitting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}
