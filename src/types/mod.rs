//! Core data types: messages, streaming deltas, usage.

pub mod message;
pub mod stream;
pub mod usage;

pub use message::{ChatMessage, Role, ToolCallRequest};
pub use stream::{ChatDelta, FinishReason, ToolCallFragment};
pub use usage::Usage;

use serde::{Deserialize, Serialize};

/// Generation parameters forwarded to the model backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}
