//! Unit tests for the host mirror loop: host notifications reach the store
//! in order, self-caused changes are counted, and events without an open
//! store are skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tidymarks::app::Engine;
use tidymarks::database::DatabaseLocation;
use tidymarks::managers::bookmark_store::Page;
use tidymarks::managers::mirror::Mirror;
use tidymarks::managers::store_handle::StoreHandle;
use tidymarks::services::memory_host::InMemoryTreeHost;
use tidymarks::services::proposal_tree::BookmarkTree;
use tidymarks::services::settings_engine::SettingsEngine;
use tidymarks::services::tree_diff::diff;
use tidymarks::services::tree_host::TreeHost;
use tidymarks::types::host::{CreateRequest, Destination, HostEvent, NodeChanges};
use tidymarks::types::settings::{EngineSettings, ReconcileSettings, StorageSettings};

fn create(parent: &str, title: &str, url: Option<&str>) -> CreateRequest {
    CreateRequest {
        parent_id: parent.into(),
        title: title.into(),
        url: url.map(Into::into),
        index: None,
    }
}

async fn loaded_store(host: &InMemoryTreeHost) -> Arc<StoreHandle> {
    let handle = Arc::new(StoreHandle::in_memory(StorageSettings::default()));
    let store = handle.initialize().await.unwrap();
    store.replace_all(&host.get_tree().await.unwrap()).unwrap();
    handle
}

#[tokio::test]
async fn test_host_changes_are_mirrored_in_order() {
    let host = InMemoryTreeHost::with_default_folders();
    let handle = loaded_store(&host).await;
    let mirror = Mirror::spawn(handle.clone(), host.subscribe().unwrap(), Arc::new(AtomicBool::new(false)));

    let a = host.create(create("1", "Alpha", Some("https://alpha.example"))).await.unwrap();
    let b = host.create(create("1", "Beta", Some("https://beta.example"))).await.unwrap();
    host.move_node(
        &b.id,
        Destination {
            parent_id: "1".into(),
            index: Some(0),
        },
    )
    .await
    .unwrap();
    host.update(
        &a.id,
        NodeChanges {
            title: Some("Alpha renamed".into()),
            url: None,
        },
    )
    .await
    .unwrap();

    let stats = mirror.flush().await.unwrap();
    assert_eq!(stats.applied, 4);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.self_caused, 0);

    let store = handle.current().unwrap();
    let children: Vec<(String, u32)> = store
        .get_children("1", Page::default())
        .unwrap()
        .into_iter()
        .map(|r| (r.title, r.index))
        .collect();
    assert_eq!(
        children,
        vec![("Beta".to_string(), 0), ("Alpha renamed".to_string(), 1)]
    );

    host.remove(&a.id).await.unwrap();
    let stats = mirror.shutdown().await;
    assert_eq!(stats.applied, 5);
    assert!(store.get_by_id(&a.id).unwrap().is_none());
}

#[tokio::test]
async fn test_self_caused_events_are_counted() {
    let host = InMemoryTreeHost::with_default_folders();
    let handle = loaded_store(&host).await;
    let flag = Arc::new(AtomicBool::new(true));
    let mirror = Mirror::spawn(handle.clone(), host.subscribe().unwrap(), flag.clone());

    host.create(create("2", "Mine", None)).await.unwrap();
    let stats = mirror.flush().await.unwrap();
    assert_eq!(stats.self_caused, 1);

    flag.store(false, Ordering::SeqCst);
    host.create(create("2", "Theirs", None)).await.unwrap();
    let stats = mirror.shutdown().await;
    assert_eq!(stats.applied, 2);
    assert_eq!(stats.self_caused, 1);
}

#[tokio::test]
async fn test_events_without_store_are_skipped() {
    let handle = Arc::new(StoreHandle::in_memory(StorageSettings::default()));
    let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let mirror = Mirror::spawn(handle, rx, Arc::new(AtomicBool::new(false)));

    assert!(mirror.send(HostEvent::Removed {
        id: "9".into(),
        parent_id: "1".into(),
        index: 0,
    }));
    let stats = mirror.shutdown().await;
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.applied, 0);
}

#[tokio::test]
async fn test_unknown_node_event_is_counted_as_failed() {
    let host = InMemoryTreeHost::with_default_folders();
    let handle = loaded_store(&host).await;
    let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let mirror = Mirror::spawn(handle, rx, Arc::new(AtomicBool::new(false)));

    mirror.send(HostEvent::Changed {
        id: "missing".into(),
        title: "x".into(),
        url: None,
    });
    let stats = mirror.shutdown().await;
    assert_eq!(stats.failed, 1);
}

fn child_indexes(handle: &StoreHandle, parent: &str) -> Vec<u32> {
    handle
        .current()
        .unwrap()
        .get_children(parent, Page::new(0, 10_000))
        .unwrap()
        .into_iter()
        .map(|r| r.index)
        .collect()
}

#[tokio::test]
async fn test_reload_after_apply_does_not_replay_queued_events() {
    let dir = tempfile::tempdir().unwrap();
    let host = Arc::new(InMemoryTreeHost::with_default_folders());
    for i in 0..400 {
        let url = format!("https://link.example/{}", i);
        host.create(create("1", &format!("Link {}", i), Some(&url))).await.unwrap();
    }
    let settings = SettingsEngine::with_settings(
        dir.path().join("settings.json").to_string_lossy().to_string(),
        EngineSettings {
            reconcile: ReconcileSettings::immediate(),
            ..EngineSettings::default()
        },
    );
    let mut engine = Engine::new(DatabaseLocation::Memory, settings, host.clone());
    engine.startup().await.unwrap();

    // Drop every other child; each removal shifts the siblings behind it
    let old = BookmarkTree::from_nodes(&host.snapshot()).unwrap();
    let doomed: Vec<String> = host.children_of("1").into_iter().step_by(2).collect();
    let new = doomed
        .iter()
        .fold(old.clone(), |tree, id| tree.remove_node(id).unwrap());
    let report = engine.apply(&diff(&old, &new).operations).await;
    assert!(report.success, "errors: {:?}", report.errors);
    assert!(report.reloaded);

    // Checked before any explicit flush: the reload already absorbed the queue
    let expected: Vec<u32> = (0..200).collect();
    assert_eq!(child_indexes(engine.store(), "1"), expected);

    let stats = engine.flush_mirror().await.unwrap();
    assert_eq!(stats.failed, 0);
    assert_eq!(child_indexes(engine.store(), "1"), expected);
    assert_eq!(engine.store().current().unwrap().count().unwrap(), host.snapshot().len());

    engine.shutdown().await;
}
