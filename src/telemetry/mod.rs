//! Usage accounting hook-point.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Usage;

/// Receiver for per-turn token usage.
///
/// The engine reports usage fire-and-forget after each model stream closes;
/// sink failures are logged and never affect the conversation.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn update_token_usage(
        &self,
        conversation_id: &str,
        project_id: Option<&str>,
        usage: Usage,
    ) -> Result<()>;
}
