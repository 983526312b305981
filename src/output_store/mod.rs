//! Size-bounded store for large tool outputs.
//!
//! Tool results above the preview threshold are archived here and replaced in
//! the conversation by a truncated preview carrying the record id; scripts
//! (and callers) page through the full value with [`OutputStore::peek`].
//! Small records stay resident in memory, large ones spill to one JSON file
//! per record under the policy's spool directory. Every record expires after
//! the policy TTL, enforced both by a per-record reaper task and lazily on
//! access.

mod truncate;

pub use truncate::{deep_truncate, TruncateLimits};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::OutputStorePolicy;
use crate::error::{Result, TychoError};

/// Where a record's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    File,
}

/// Coarse shape of the stored value, reported in previews so the model knows
/// whether paging applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Array,
    Object,
    Text,
    Other,
}

impl DataType {
    fn of(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Array(_) => Self::Array,
            serde_json::Value::Object(_) => Self::Object,
            serde_json::Value::String(_) => Self::Text,
            _ => Self::Other,
        }
    }
}

/// Metadata for one stored output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: String,
    pub size_bytes: usize,
    pub storage: StorageKind,
    pub created_at: DateTime<Utc>,
    pub data_type: DataType,
    /// Element count for array values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
}

/// One page of a stored value, returned by [`OutputStore::peek`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeekResult {
    pub data: serde_json::Value,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<usize>,
    pub total: usize,
}

enum Payload {
    Memory(serde_json::Value),
    File(PathBuf),
}

struct Entry {
    record: OutputRecord,
    conversation_id: String,
    payload: Payload,
}

/// Two-tier (memory / spill-to-file) output store with TTL expiry.
pub struct OutputStore {
    policy: OutputStorePolicy,
    entries: Mutex<HashMap<String, Entry>>,
}

impl OutputStore {
    pub fn new(policy: OutputStorePolicy) -> Arc<Self> {
        Arc::new(Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub fn policy(&self) -> &OutputStorePolicy {
        &self.policy
    }

    /// Store a value scoped to a conversation and return its record.
    ///
    /// A reaper task is spawned per record; expiry is also checked on every
    /// access in case the task was lost to a runtime shutdown.
    pub async fn store(
        self: &Arc<Self>,
        conversation_id: &str,
        value: serde_json::Value,
    ) -> Result<OutputRecord> {
        let serialized = serde_json::to_string(&value)?;
        let size_bytes = serialized.len();
        let id = Uuid::new_v4().to_string();
        let data_type = DataType::of(&value);
        let row_count = value.as_array().map(|a| a.len());

        let payload = if size_bytes <= self.policy.max_inline_bytes {
            Payload::Memory(value)
        } else {
            tokio::fs::create_dir_all(&self.policy.spool_dir).await?;
            let path = self.policy.spool_dir.join(format!("{id}.json"));
            tokio::fs::write(&path, serialized.as_bytes()).await?;
            Payload::File(path)
        };

        let record = OutputRecord {
            id: id.clone(),
            size_bytes,
            storage: match payload {
                Payload::Memory(_) => StorageKind::Memory,
                Payload::File(_) => StorageKind::File,
            },
            created_at: Utc::now(),
            data_type,
            row_count,
        };

        self.entries.lock().await.insert(
            id.clone(),
            Entry {
                record: record.clone(),
                conversation_id: conversation_id.to_string(),
                payload,
            },
        );

        let store = Arc::downgrade(self);
        let ttl = self.policy.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(store) = store.upgrade() {
                store.remove(&id).await;
            }
        });

        Ok(record)
    }

    /// Fetch the full value for a record id.
    pub async fn retrieve(&self, id: &str) -> Result<serde_json::Value> {
        let path = {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get(id) else {
                return Err(TychoError::NotFound(format!("output record '{id}'")));
            };
            if self.is_expired(&entry.record) {
                let entry = entries.remove(id);
                drop(entries);
                Self::discard_payload(entry).await;
                return Err(TychoError::NotFound(format!("output record '{id}' expired")));
            }
            match &entry.payload {
                Payload::Memory(value) => return Ok(value.clone()),
                Payload::File(path) => path.clone(),
            }
        };
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Metadata for a record, if it exists and has not expired.
    pub async fn record(&self, id: &str) -> Option<OutputRecord> {
        let entries = self.entries.lock().await;
        entries
            .get(id)
            .filter(|e| !self.is_expired(&e.record))
            .map(|e| e.record.clone())
    }

    /// Page through a stored value.
    ///
    /// Arrays page by element, strings by character, objects by key (in the
    /// value's key order); scalar values are returned whole regardless of
    /// offset.
    pub async fn peek(&self, id: &str, offset: usize, limit: usize) -> Result<PeekResult> {
        let value = self.retrieve(id).await?;
        Ok(page_value(&value, offset, limit))
    }

    /// Drop every record belonging to one conversation.
    pub async fn clear_for_conversation(&self, conversation_id: &str) {
        let removed: Vec<Entry> = {
            let mut entries = self.entries.lock().await;
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.conversation_id == conversation_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| entries.remove(&id)).collect()
        };
        for entry in removed {
            Self::discard_payload(Some(entry)).await;
        }
    }

    /// Archive `value` if it serializes above the preview threshold and
    /// return a truncated preview referencing the record; small values pass
    /// through untouched.
    pub async fn preview(
        self: &Arc<Self>,
        conversation_id: &str,
        value: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let size = serde_json::to_string(&value)?.len();
        if size <= self.policy.preview_max_bytes {
            return Ok(value);
        }
        let record = self.store(conversation_id, value.clone()).await?;
        let (preview, _) = deep_truncate(&value, &TruncateLimits::default());
        Ok(serde_json::json!({
            "truncated": true,
            "output_id": record.id,
            "total_bytes": record.size_bytes,
            "data_type": record.data_type,
            "row_count": record.row_count,
            "preview": preview,
            "note": "full result archived; page through it with peek(output_id, offset, limit)",
        }))
    }

    async fn remove(&self, id: &str) {
        let entry = self.entries.lock().await.remove(id);
        Self::discard_payload(entry).await;
    }

    async fn discard_payload(entry: Option<Entry>) {
        if let Some(Entry {
            payload: Payload::File(path),
            ..
        }) = entry
        {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::debug!(path = %path.display(), error = %e, "spool file removal failed");
            }
        }
    }

    fn is_expired(&self, record: &OutputRecord) -> bool {
        let age = Utc::now().signed_duration_since(record.created_at);
        age.to_std().map(|age| age > self.policy.ttl).unwrap_or(false)
    }
}

impl std::fmt::Debug for OutputStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStore")
            .field("policy", &self.policy)
            .finish()
    }
}

fn page_value(value: &serde_json::Value, offset: usize, limit: usize) -> PeekResult {
    match value {
        serde_json::Value::Array(items) => {
            let total = items.len();
            let page: Vec<_> = items.iter().skip(offset).take(limit).cloned().collect();
            let end = offset.saturating_add(page.len());
            PeekResult {
                data: serde_json::Value::Array(page),
                has_more: end < total,
                next_offset: (end < total).then_some(end),
                total,
            }
        }
        serde_json::Value::String(s) => {
            let total = s.chars().count();
            let page: String = s.chars().skip(offset).take(limit).collect();
            let end = offset.saturating_add(page.chars().count());
            PeekResult {
                data: serde_json::Value::String(page),
                has_more: end < total,
                next_offset: (end < total).then_some(end),
                total,
            }
        }
        serde_json::Value::Object(map) => {
            let total = map.len();
            let page: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .skip(offset)
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let end = offset.saturating_add(page.len());
            PeekResult {
                data: serde_json::Value::Object(page),
                has_more: end < total,
                next_offset: (end < total).then_some(end),
                total,
            }
        }
        other => PeekResult {
            data: other.clone(),
            has_more: false,
            next_offset: None,
            total: 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn store_with(policy: OutputStorePolicy) -> Arc<OutputStore> {
        OutputStore::new(policy)
    }

    #[tokio::test]
    async fn small_values_stay_in_memory() {
        let store = store_with(OutputStorePolicy::default());
        let record = store
            .store("conv", serde_json::json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(record.storage, StorageKind::Memory);
        let value = store.retrieve(&record.id).await.unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn large_values_spill_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let policy = OutputStorePolicy::default()
            .with_max_inline_bytes(64)
            .with_spool_dir(dir.path());
        let store = store_with(policy);

        let value = serde_json::json!({"blob": "x".repeat(200)});
        let record = store.store("conv", value.clone()).await.unwrap();
        assert_eq!(record.storage, StorageKind::File);
        assert_eq!(store.retrieve(&record.id).await.unwrap(), value);
    }

    #[tokio::test]
    async fn retrieve_unknown_id_is_not_found() {
        let store = store_with(OutputStorePolicy::default());
        let err = store.retrieve("nope").await.unwrap_err();
        assert!(matches!(err, TychoError::NotFound(_)));
    }

    #[tokio::test]
    async fn peek_pages_arrays() {
        let store = store_with(OutputStorePolicy::default());
        let value = serde_json::json!((0..250).collect::<Vec<_>>());
        let record = store.store("conv", value).await.unwrap();
        assert_eq!(record.row_count, Some(250));

        let page = store.peek(&record.id, 100, 50).await.unwrap();
        assert_eq!(page.data.as_array().unwrap().len(), 50);
        assert_eq!(page.data[0], 100);
        assert!(page.has_more);
        assert_eq!(page.next_offset, Some(150));
        assert_eq!(page.total, 250);
    }

    #[tokio::test]
    async fn peek_past_end_is_empty_without_more() {
        let store = store_with(OutputStorePolicy::default());
        let record = store
            .store("conv", serde_json::json!([1, 2, 3]))
            .await
            .unwrap();
        let page = store.peek(&record.id, 10, 5).await.unwrap();
        assert!(page.data.as_array().unwrap().is_empty());
        assert!(!page.has_more);
        assert_eq!(page.next_offset, None);
    }

    #[tokio::test]
    async fn peek_pages_strings_by_character() {
        let store = store_with(OutputStorePolicy::default());
        let record = store
            .store("conv", serde_json::json!("abcdefghij"))
            .await
            .unwrap();
        let page = store.peek(&record.id, 2, 3).await.unwrap();
        assert_eq!(page.data, "cde");
        assert!(page.has_more);
        assert_eq!(page.next_offset, Some(5));
        assert_eq!(page.total, 10);
    }

    #[tokio::test]
    async fn peek_pages_objects_by_key_and_reconstructs() {
        let store = store_with(OutputStorePolicy::default());
        let value = serde_json::json!({"a": 1, "b": 2, "c": 3, "d": 4, "e": 5});
        let record = store.store("conv", value.clone()).await.unwrap();
        assert_eq!(record.data_type, DataType::Object);

        let first = store.peek(&record.id, 0, 2).await.unwrap();
        assert_eq!(
            first
                .data
                .as_object()
                .unwrap()
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(first.total, 5);

        // Walk the whole object in pages and rebuild it.
        let mut rebuilt = serde_json::Map::new();
        let mut offset = 0;
        loop {
            let page = store.peek(&record.id, offset, 2).await.unwrap();
            for (k, v) in page.data.as_object().unwrap() {
                rebuilt.insert(k.clone(), v.clone());
            }
            match page.next_offset {
                Some(next) => {
                    assert!(page.has_more);
                    offset = next;
                }
                None => {
                    assert!(!page.has_more);
                    break;
                }
            }
        }
        assert_eq!(serde_json::Value::Object(rebuilt), value);
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire_after_ttl() {
        let policy = OutputStorePolicy::default().with_ttl(Duration::from_secs(2));
        let store = store_with(policy);
        let record = store.store("conv", serde_json::json!(1)).await.unwrap();

        // Let the reaper task register its sleep before moving the clock.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        let err = store.retrieve(&record.id).await.unwrap_err();
        assert!(matches!(err, TychoError::NotFound(_)));
    }

    #[tokio::test]
    async fn clear_for_conversation_scopes_by_id() {
        let store = store_with(OutputStorePolicy::default());
        let keep = store.store("conv-a", serde_json::json!(1)).await.unwrap();
        let drop = store.store("conv-b", serde_json::json!(2)).await.unwrap();

        store.clear_for_conversation("conv-b").await;
        assert!(store.retrieve(&keep.id).await.is_ok());
        assert!(store.retrieve(&drop.id).await.is_err());
    }

    #[tokio::test]
    async fn preview_passes_small_values_through() {
        let store = store_with(OutputStorePolicy::default());
        let value = serde_json::json!({"ok": true});
        let out = store.preview("conv", value.clone()).await.unwrap();
        assert_eq!(out, value);
    }

    #[tokio::test]
    async fn preview_archives_large_values() {
        let policy = OutputStorePolicy::default().with_preview_max_bytes(64);
        let store = store_with(policy);
        let value = serde_json::json!((0..100).map(|i| format!("row-{i}")).collect::<Vec<_>>());

        let out = store.preview("conv", value.clone()).await.unwrap();
        assert_eq!(out["truncated"], true);
        let id = out["output_id"].as_str().unwrap();
        assert_eq!(store.retrieve(id).await.unwrap(), value);
        // Preview keeps the head of the array.
        assert_eq!(out["preview"][0], "row-0");
    }
}
