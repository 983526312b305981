//! Configuration (layered: code > env).

use std::path::PathBuf;
use std::time::Duration;

/// Default inline threshold for the output store: 10 MB.
const DEFAULT_MAX_INLINE_BYTES: usize = 10 * 1024 * 1024;
/// Default record time-to-live: one hour.
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Top-level configuration for a Tycho deployment.
#[derive(Debug, Clone)]
pub struct TychoConfig {
    /// API key for the model backend.
    pub api_key: Option<String>,
    /// Base URL of the OpenAI-compatible backend.
    pub base_url: Option<String>,
    /// Default model id.
    pub model: Option<String>,
    /// Output store sizing and expiry policy.
    pub output_store: OutputStorePolicy,
}

impl Default for TychoConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: None,
            output_store: OutputStorePolicy::default(),
        }
    }
}

impl TychoConfig {
    /// Load from environment variables (`TYCHO_API_KEY`, `TYCHO_BASE_URL`,
    /// `TYCHO_MODEL`), reading a `.env` file when present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            api_key: std::env::var("TYCHO_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok(),
            base_url: std::env::var("TYCHO_BASE_URL").ok(),
            model: std::env::var("TYCHO_MODEL").ok(),
            output_store: OutputStorePolicy::default(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Sizing and expiry policy for the output store.
///
/// Values at or below `max_inline_bytes` stay resident in memory; larger
/// values spill to one file per record under `spool_dir`. Every record is
/// removed after `ttl` regardless of storage kind.
#[derive(Debug, Clone)]
pub struct OutputStorePolicy {
    pub max_inline_bytes: usize,
    pub ttl: Duration,
    pub spool_dir: PathBuf,
    /// Serialized size above which a tool result is replaced by a truncated
    /// preview referencing the stored record.
    pub preview_max_bytes: usize,
}

impl Default for OutputStorePolicy {
    fn default() -> Self {
        Self {
            max_inline_bytes: DEFAULT_MAX_INLINE_BYTES,
            ttl: DEFAULT_TTL,
            spool_dir: std::env::temp_dir().join("tycho-outputs"),
            preview_max_bytes: 16 * 1024,
        }
    }
}

impl OutputStorePolicy {
    pub fn with_max_inline_bytes(mut self, bytes: usize) -> Self {
        self.max_inline_bytes = bytes;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = dir.into();
        self
    }

    pub fn with_preview_max_bytes(mut self, bytes: usize) -> Self {
        self.preview_max_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_keeps_source_constants() {
        let policy = OutputStorePolicy::default();
        assert_eq!(policy.max_inline_bytes, 10 * 1024 * 1024);
        assert_eq!(policy.ttl, Duration::from_secs(3600));
    }

    #[test]
    fn builder_overrides_apply() {
        let policy = OutputStorePolicy::default()
            .with_max_inline_bytes(1024)
            .with_ttl(Duration::from_secs(5));
        assert_eq!(policy.max_inline_bytes, 1024);
        assert_eq!(policy.ttl, Duration::from_secs(5));
    }

    #[test]
    fn config_builders_apply() {
        let config = TychoConfig::default()
            .with_api_key("sk-test")
            .with_base_url("http://localhost:8080/v1")
            .with_model("gpt-4o");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8080/v1"));
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
    }
}
