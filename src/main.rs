//! Tidymarks demo.
//!
//! Walks the whole pipeline against an in-memory tree host: load the store,
//! search it, stage edits on a proposal tree, diff, reconcile, and watch the
//! mirror pick up a change made directly on the host.

use std::error::Error;
use std::sync::Arc;

use tidymarks::app::Engine;
use tidymarks::database::connection::DatabaseLocation;
use tidymarks::services::memory_host::InMemoryTreeHost;
use tidymarks::services::proposal_tree::{BookmarkTree, DropPosition};
use tidymarks::services::settings_engine::SettingsEngine;
use tidymarks::services::tree_diff;
use tidymarks::services::tree_host::TreeHost;
use tidymarks::types::host::CreateRequest;
use tidymarks::types::search::SearchOptions;
use tidymarks::types::settings::{EngineSettings, ReconcileSettings};

const SEED: &[(&str, &str, &str)] = &[
    ("1", "The Rust Programming Language", "https://doc.rust-lang.org/book/"),
    ("1", "Tokio tutorial #rust #async", "https://tokio.rs/tokio/tutorial"),
    ("1", "React Router", "https://reactrouter.com/en/main"),
    ("2", "SQLite query planner", "https://www.sqlite.org/queryplanner.html"),
    ("2", "Preact", "https://preactjs.com/"),
];

fn section(name: &str) {
    println!("───────────────────────────────────────────────────────────────");
    println!("  {}", name);
    println!("───────────────────────────────────────────────────────────────");
}

async fn seed(host: &InMemoryTreeHost) -> Result<(), Box<dyn Error>> {
    for (parent, title, url) in SEED {
        host.create(CreateRequest {
            parent_id: parent.to_string(),
            title: title.to_string(),
            url: Some(url.to_string()),
            index: None,
        })
        .await?;
    }
    Ok(())
}

async fn demo_store(engine: &mut Engine) -> Result<(), Box<dyn Error>> {
    section("Persistent Store");
    let init = engine.startup().await?;
    let store = engine.store().current()?;
    let stats = store.stats()?;
    println!("  Schema version {}, recovered: {}", init.schema_version, init.recovered);
    println!("  {} bookmarks in {} folders", stats.bookmarks, stats.folders);
    println!("  Healthy: {}", store.check_health().healthy);
    for record in store.get_children("1", Default::default())? {
        println!("    [{}] {}", record.index, record.title);
    }
    println!();
    Ok(())
}

async fn demo_search(engine: &Engine) -> Result<(), Box<dyn Error>> {
    section("Search Engine");
    for query in ["react", "rust", "sqlite planner"] {
        let results = engine.search(query, SearchOptions::default()).await?;
        println!("  \"{}\": {} hits", query, results.len());
        for hit in results.iter().take(3) {
            println!("    {:>6.2}  {}  {:?}", hit.score, hit.record.title, hit.matched_fields);
        }
    }
    let store = engine.store().current()?;
    let recent: Vec<String> = store.recent_searches(5)?.into_iter().map(|e| e.query).collect();
    println!("  Recent searches: {}", recent.join(", "));
    println!();
    Ok(())
}

async fn demo_reconcile(engine: &Engine) -> Result<(), Box<dyn Error>> {
    section("Proposal Tree, Diff and Reconciliation");
    let current = BookmarkTree::from_nodes(&engine.host().get_tree().await?)?;

    let (proposed, reading) = current.add_node("2", "Reading list", None, None)?;
    let (proposed, _) = proposed.add_node(&reading, "Zero To Production", Some("https://www.zero2prod.com/"), None)?;
    let (proposed, staged) = proposed.add_node("2", "Axum docs", Some("https://docs.rs/axum"), Some(0))?;
    let proposed = proposed.move_node(&staged, "3", DropPosition::After)?;
    let sqlite = proposed
        .to_nodes()
        .into_iter()
        .find(|n| n.title.starts_with("SQLite"))
        .map(|n| n.id)
        .ok_or("seeded bookmark missing")?;
    let proposed = proposed.move_node(&sqlite, &reading, DropPosition::Inside)?;

    let diff = tree_diff::diff(&current, &proposed);
    println!(
        "  Diff: {} creates, {} moves, {} updates, {} deletes",
        diff.stats.creates, diff.stats.moves, diff.stats.updates, diff.stats.deletes
    );
    for op in &diff.operations {
        println!("    {}", op.describe());
    }

    let report = engine
        .apply_with_progress(&diff.operations, |p| {
            println!("    operation {}/{}: {}", p.current, p.total, p.description);
        })
        .await;
    println!("  Success: {}, reloaded: {}, mapped ids: {}", report.success, report.reloaded, report.id_map.len());

    let store = engine.store().current()?;
    for record in store.get_children("1", Default::default())? {
        println!("    Bookmarks Bar [{}] {}", record.index, record.title);
    }
    if let Some(folder) = report.id_map.get(&reading) {
        println!("  \"Reading list\" is now {} with path {:?}", folder, store.path_of(folder)?);
    }
    println!();
    Ok(())
}

async fn demo_mirror(engine: &Engine, host: &InMemoryTreeHost) -> Result<(), Box<dyn Error>> {
    section("Host Mirror");
    let created = host
        .create(CreateRequest {
            parent_id: "2".to_string(),
            title: "Made outside the engine".to_string(),
            url: Some("https://example.com/outside".to_string()),
            index: Some(0),
        })
        .await?;
    let stats = engine.flush_mirror().await.unwrap_or_default();
    let store = engine.store().current()?;
    let mirrored = store.get_by_id(&created.id)?;
    println!("  Mirrored \"{}\": {}", created.title, mirrored.is_some());
    println!("  Events applied: {}, during apply: {}", stats.applied, stats.self_caused);
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!();
    println!("  Tidymarks v{} demo", env!("CARGO_PKG_VERSION"));
    println!();

    let host = Arc::new(InMemoryTreeHost::with_default_folders());
    seed(&host).await?;

    let settings = EngineSettings {
        reconcile: ReconcileSettings::immediate(),
        ..EngineSettings::default()
    };
    let settings_engine = SettingsEngine::with_settings("demo_settings.json".to_string(), settings);
    let mut engine = Engine::new(DatabaseLocation::Memory, settings_engine, host.clone());

    demo_store(&mut engine).await?;
    demo_search(&engine).await?;
    demo_reconcile(&engine).await?;
    demo_mirror(&engine, &host).await?;

    engine.shutdown().await;
    println!("  Done.");
    Ok(())
}
