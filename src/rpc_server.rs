//! Tidymarks RPC server: JSON over stdin/stdout.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! Request:  {"id":1, "method":"search", "params":{"query":"rust"}}
//! Response: {"id":1, "result":{...}} or {"id":1, "error":"..."}
//!
//! Logs go to stderr. The tree host is in-memory; set `TIDYMARKS_TREE` to a
//! JSON file holding a node list to seed it, and `TIDYMARKS_DATA_DIR` to
//! choose where the database lives. `TIDYMARKS_DEBUG` turns on debug logs.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use tidymarks::app::Engine;
use tidymarks::database::connection::DatabaseLocation;
use tidymarks::platform;
use tidymarks::rpc_handler::handle_method;
use tidymarks::services::memory_host::InMemoryTreeHost;
use tidymarks::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use tidymarks::types::node::Node;

/// Simple rate limiter: max requests per second.
struct RateLimiter {
    window_start: Instant,
    request_count: u32,
    max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self { window_start: Instant::now(), request_count: 0, max_per_second }
    }

    /// Returns true if the request is allowed, false if rate-limited.
    fn check(&mut self) -> bool {
        if self.window_start.elapsed().as_secs() >= 1 {
            self.window_start = Instant::now();
            self.request_count = 0;
        }
        self.request_count += 1;
        self.request_count <= self.max_per_second
    }
}

fn load_host() -> Result<InMemoryTreeHost, String> {
    let Ok(path) = std::env::var("TIDYMARKS_TREE") else {
        return Ok(InMemoryTreeHost::with_default_folders());
    };
    let text = std::fs::read_to_string(&path).map_err(|e| format!("cannot read {}: {}", path, e))?;
    let nodes: Vec<Node> = serde_json::from_str(&text).map_err(|e| format!("invalid tree in {}: {}", path, e))?;
    InMemoryTreeHost::from_nodes(&nodes).map_err(|e| e.to_string())
}

fn database_location() -> DatabaseLocation {
    match std::env::var("TIDYMARKS_DATA_DIR") {
        Ok(dir) => DatabaseLocation::File(PathBuf::from(dir).join("tidymarks.db")),
        Err(_) => DatabaseLocation::File(platform::default_database_path()),
    }
}

fn respond(response: &Value) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{}", response);
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if std::env::var_os("TIDYMARKS_DEBUG").is_some() {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_ansi(false)
        .init();

    let host = match load_host() {
        Ok(host) => host,
        Err(err) => {
            tracing::error!(error = %err, "failed to load tree");
            std::process::exit(1);
        }
    };

    let mut settings_engine = SettingsEngine::new(None);
    if let Err(err) = settings_engine.load() {
        tracing::warn!(error = %err, "using default settings");
    }

    let mut engine = Engine::new(database_location(), settings_engine, Arc::new(host));
    if let Err(err) = engine.startup().await {
        tracing::error!(error = %err, hint = %err.user_message(), "storage failed to start");
        respond(&json!({"event": "error", "error": err.to_string()}));
        std::process::exit(1);
    }
    let engine = Mutex::new(engine);

    respond(&json!({"event": "ready", "version": env!("CARGO_PKG_VERSION")}));

    let mut rate_limiter = RateLimiter::new(200);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let req: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                respond(&json!({"id": null, "error": format!("parse error: {}", e)}));
                continue;
            }
        };
        let id = req.get("id").cloned().unwrap_or(Value::Null);

        if !rate_limiter.check() {
            respond(&json!({"id": id, "error": "rate limit exceeded"}));
            continue;
        }

        let method = req.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let params = req.get("params").cloned().unwrap_or(json!({}));

        let response = match handle_method(&engine, method, &params).await {
            Ok(val) => json!({"id": id, "result": val}),
            Err(err) => json!({"id": id, "error": err}),
        };
        respond(&response);
    }

    engine.lock().await.shutdown().await;
}
