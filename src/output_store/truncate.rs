//! Depth-bounded deep truncation of JSON values.
//!
//! Produces a small inline preview of an arbitrarily large value: strings
//! are capped by character count, arrays by item count, objects by key
//! count, recursing to a fixed depth. Values already within every cap pass
//! through unchanged, so truncation is idempotent on small inputs.

use serde_json::Value;

/// Caps applied while truncating.
#[derive(Debug, Clone, Copy)]
pub struct TruncateLimits {
    pub max_string_chars: usize,
    pub max_array_items: usize,
    pub max_object_keys: usize,
    pub max_depth: usize,
}

impl Default for TruncateLimits {
    fn default() -> Self {
        Self {
            max_string_chars: 256,
            max_array_items: 10,
            max_object_keys: 20,
            max_depth: 6,
        }
    }
}

/// Deep-truncate `value`, returning the preview and whether anything was cut.
pub fn deep_truncate(value: &Value, limits: &TruncateLimits) -> (Value, bool) {
    truncate_at_depth(value, limits, 0)
}

fn truncate_at_depth(value: &Value, limits: &TruncateLimits, depth: usize) -> (Value, bool) {
    match value {
        Value::String(s) => {
            let chars = s.chars().count();
            if chars <= limits.max_string_chars {
                (value.clone(), false)
            } else {
                let head: String = s.chars().take(limits.max_string_chars).collect();
                (
                    Value::String(format!("{head}… (+{} chars)", chars - limits.max_string_chars)),
                    true,
                )
            }
        }
        Value::Array(items) => {
            if depth >= limits.max_depth {
                return (Value::String(format!("[array of {} items]", items.len())), true);
            }
            let mut truncated = items.len() > limits.max_array_items;
            let mut out = Vec::with_capacity(items.len().min(limits.max_array_items));
            for item in items.iter().take(limits.max_array_items) {
                let (v, t) = truncate_at_depth(item, limits, depth + 1);
                truncated |= t;
                out.push(v);
            }
            if items.len() > limits.max_array_items {
                out.push(Value::String(format!(
                    "… (+{} items)",
                    items.len() - limits.max_array_items
                )));
            }
            (Value::Array(out), truncated)
        }
        Value::Object(map) => {
            if depth >= limits.max_depth {
                return (Value::String(format!("[object with {} keys]", map.len())), true);
            }
            let mut truncated = map.len() > limits.max_object_keys;
            let mut out = serde_json::Map::new();
            for (key, item) in map.iter().take(limits.max_object_keys) {
                let (v, t) = truncate_at_depth(item, limits, depth + 1);
                truncated |= t;
                out.insert(key.clone(), v);
            }
            if map.len() > limits.max_object_keys {
                out.insert(
                    "…".to_string(),
                    Value::String(format!("(+{} keys)", map.len() - limits.max_object_keys)),
                );
            }
            (Value::Object(out), truncated)
        }
        _ => (value.clone(), false),
    }
}
