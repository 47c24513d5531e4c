//! RPC method handler for the Tidymarks JSON protocol.
//!
//! Extracted from `rpc_server.rs` so it can be unit-tested independently.
//! The `handle_method` function dispatches method calls to the engine
//! components owned by [`Engine`].

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::app::Engine;
use crate::managers::bookmark_store::Page;
use crate::services::settings_engine::SettingsEngineTrait;
use crate::services::tree_diff::{self, DiffOptions};
use crate::types::node::Node;
use crate::types::operation::Operation;
use crate::types::search::SearchOptions;

fn str_param<'a>(params: &'a Value, name: &str) -> Result<&'a str, String> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing {}", name))
}

fn typed_param<T: DeserializeOwned>(params: &Value, name: &str) -> Result<T, String> {
    let value = params.get(name).cloned().ok_or_else(|| format!("missing {}", name))?;
    serde_json::from_value(value).map_err(|e| format!("invalid {}: {}", name, e))
}

fn usize_param(params: &Value, name: &str, default: usize) -> usize {
    params
        .get(name)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Dispatch a method call to the appropriate handler.
///
/// Returns `Ok(Value)` on success or `Err(String)` with an error message.
pub async fn handle_method(engine: &Mutex<Engine>, method: &str, params: &Value) -> Result<Value, String> {
    match method {
        "ping" => Ok(json!({"pong": true, "version": env!("CARGO_PKG_VERSION")})),

        // ─── Store ───
        "health" => {
            let e = engine.lock().await;
            let init = e.store().last_init();
            match e.store().current() {
                Ok(store) => Ok(json!({
                    "initialized": true,
                    "init": init,
                    "report": store.check_health(),
                    "stats": store.stats().map_err(|e| e.to_string())?,
                })),
                Err(_) => Ok(json!({"initialized": false, "init": init})),
            }
        }
        "children" => {
            let page = Page::new(usize_param(params, "offset", 0), usize_param(params, "limit", Page::default().limit));
            let e = engine.lock().await;
            let store = e.store().current().map_err(|e| e.to_string())?;
            let records = match params.get("parent_id").and_then(|v| v.as_str()) {
                Some(parent) => store.get_children(parent, page),
                None => store.get_roots(),
            }
            .map_err(|e| e.to_string())?;
            to_json(&records)
        }
        "get" => {
            let id = str_param(params, "id")?;
            let e = engine.lock().await;
            let store = e.store().current().map_err(|e| e.to_string())?;
            match store.get_by_id(id).map_err(|e| e.to_string())? {
                Some(record) => {
                    let path = store.path_of(id).map_err(|e| e.to_string())?;
                    Ok(json!({"record": record, "path": path}))
                }
                None => Ok(Value::Null),
            }
        }
        "reload" => {
            let e = engine.lock().await;
            let records = e.reload().await.map_err(|e| e.to_string())?;
            Ok(json!({"records": records}))
        }

        // ─── Search ───
        "search" => {
            let query = str_param(params, "query")?;
            let options: SearchOptions = match params.get("options") {
                Some(_) => typed_param(params, "options")?,
                None => SearchOptions::default(),
            };
            let e = engine.lock().await;
            let results = e.search(query, options).await.map_err(|e| e.to_string())?;
            to_json(&results)
        }
        "history.recent" => {
            let limit = usize_param(params, "limit", 20);
            let e = engine.lock().await;
            let store = e.store().current().map_err(|e| e.to_string())?;
            to_json(&store.recent_searches(limit).map_err(|e| e.to_string())?)
        }

        // ─── Settings ───
        "settings.get" => {
            let e = engine.lock().await;
            match params.get("key").and_then(|v| v.as_str()) {
                Some(key) => e.settings_engine.get_value(key).map_err(|e| e.to_string()),
                None => to_json(e.settings_engine.get_settings()),
            }
        }
        "settings.set" => {
            let key = str_param(params, "key")?;
            let value = params.get("value").cloned().ok_or("missing value")?;
            let mut e = engine.lock().await;
            e.settings_engine.set_value(key, value).map_err(|e| e.to_string())?;
            e.settings_engine.save().map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }

        // ─── Reconciliation ───
        "tree" => {
            let e = engine.lock().await;
            to_json(&e.host().get_tree().await.map_err(|e| e.to_string())?)
        }
        "diff" => {
            let new: Vec<Node> = typed_param(params, "new")?;
            let options: DiffOptions = match params.get("options") {
                Some(_) => typed_param(params, "options")?,
                None => DiffOptions::default(),
            };
            let result = match params.get("old") {
                Some(_) => {
                    let old: Vec<Node> = typed_param(params, "old")?;
                    tree_diff::diff_nodes(&old, &new, options)
                }
                None => {
                    let e = engine.lock().await;
                    let old = e.host().get_tree().await.map_err(|e| e.to_string())?;
                    tree_diff::diff_nodes(&old, &new, options)
                }
            }
            .map_err(|e| e.to_string())?;
            to_json(&result)
        }
        "apply" => {
            let operations: Vec<Operation> = typed_param(params, "operations")?;
            let e = engine.lock().await;
            to_json(&e.apply(&operations).await)
        }

        _ => Err(format!("unknown method: {}", method)),
    }
}
