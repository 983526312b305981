//! Built-in key-value memory tools.
//!
//! A small persistence surface shared by the assistant and the script
//! sandbox: values written with `memory_set` in one invocation are readable
//! with `memory_get` in a later one. State lives in a shared in-process map;
//! durable backends satisfy the same [`Tool`] contract externally.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::TychoError;
use crate::tools::tool::{ClosureTool, Tool, ToolExecutionContext};
use crate::tools::types::ToolParameters;

type MemoryMap = Arc<Mutex<HashMap<String, serde_json::Value>>>;

/// Create the `memory_set`, `memory_get`, and `memory_list` tools backed by
/// one shared map.
pub fn memory_tools() -> Vec<Arc<dyn Tool>> {
    let map: MemoryMap = Arc::new(Mutex::new(HashMap::new()));
    vec![
        memory_set_tool(map.clone()),
        memory_get_tool(map.clone()),
        memory_list_tool(map),
    ]
}

fn memory_set_tool(map: MemoryMap) -> Arc<dyn Tool> {
    Arc::new(ClosureTool::new(
        "memory_set",
        "Store a value under a key in conversation memory",
        ToolParameters::object()
            .string("key", "The key to store under", true)
            .string("value", "The value to store (any JSON accepted via 'json')", false)
            .build(),
        move |args, _ctx: ToolExecutionContext| {
            let map = map.clone();
            async move {
                let key = args.get_str("key")?.to_string();
                let value = args
                    .get("json")
                    .cloned()
                    .or_else(|| args.get_str_opt("value").map(|s| serde_json::json!(s)))
                    .ok_or_else(|| {
                        TychoError::tool("memory_set", "either 'value' or 'json' is required")
                    })?;
                map.lock().unwrap().insert(key.clone(), value);
                Ok(serde_json::json!({ "stored": key }))
            }
        },
    ))
}

fn memory_get_tool(map: MemoryMap) -> Arc<dyn Tool> {
    Arc::new(ClosureTool::new(
        "memory_get",
        "Read a value previously stored in conversation memory",
        ToolParameters::object()
            .string("key", "The key to read", true)
            .build(),
        move |args, _ctx: ToolExecutionContext| {
            let map = map.clone();
            async move {
                let key = args.get_str("key")?;
                match map.lock().unwrap().get(key) {
                    Some(value) => Ok(serde_json::json!({ "key": key, "value": value })),
                    None => Err(TychoError::tool(
                        "memory_get",
                        format!("no value stored under '{key}'"),
                    )),
                }
            }
        },
    ))
}

fn memory_list_tool(map: MemoryMap) -> Arc<dyn Tool> {
    Arc::new(ClosureTool::new(
        "memory_list",
        "List the keys currently stored in conversation memory",
        ToolParameters::empty(),
        move |_args, _ctx: ToolExecutionContext| {
            let map = map.clone();
            async move {
                let mut keys: Vec<String> = map.lock().unwrap().keys().cloned().collect();
                keys.sort();
                Ok(serde_json::json!({ "keys": keys }))
            }
        },
    ))
}
