//! Unit tests for the Reconciler: replaying diffs against an in-memory host,
//! partial failures, progress reporting, the self-change flag and reloads.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tidymarks::managers::bookmark_store::Page;
use tidymarks::managers::store_handle::StoreHandle;
use tidymarks::services::memory_host::InMemoryTreeHost;
use tidymarks::services::proposal_tree::{BookmarkTree, DropPosition};
use tidymarks::services::reconciler::{ApplyProgress, Reconciler};
use tidymarks::services::tree_diff::diff;
use tidymarks::services::tree_host::TreeHost;
use tidymarks::types::host::{CreateRequest, NodeChanges};
use tidymarks::types::node::Node;
use tidymarks::types::operation::{Operation, OperationKind, OperationType, Position};
use tidymarks::types::settings::{ReconcileSettings, StorageSettings};

fn node(id: &str, parent: Option<&str>, index: u32, title: &str, url: Option<&str>) -> Node {
    Node {
        id: id.into(),
        parent_id: parent.map(Into::into),
        index,
        title: title.into(),
        url: url.map(Into::into),
        date_added: 0,
        date_modified: None,
    }
}

fn seed() -> Vec<Node> {
    vec![
        node("0", None, 0, "", None),
        node("1", Some("0"), 0, "Bookmarks Bar", None),
        node("2", Some("0"), 1, "Other Bookmarks", None),
        node("10", Some("1"), 0, "Alpha", Some("https://alpha.example/")),
        node("11", Some("1"), 1, "Beta", Some("https://beta.example/")),
        node("20", Some("2"), 0, "Archive", None),
        node("21", Some("20"), 0, "Old one", Some("https://old.example/1")),
        node("22", Some("20"), 1, "Old two", Some("https://old.example/2")),
    ]
}

struct Fixture {
    host: Arc<InMemoryTreeHost>,
    handle: Arc<StoreHandle>,
    reconciler: Reconciler,
}

async fn fixture(settings: ReconcileSettings) -> Fixture {
    let host = Arc::new(InMemoryTreeHost::from_nodes(&seed()).unwrap());
    let handle = Arc::new(StoreHandle::in_memory(StorageSettings::default()));
    handle.initialize().await.unwrap().replace_all(&seed()).unwrap();
    let reconciler = Reconciler::new(host.clone(), handle.clone(), settings);
    Fixture {
        host,
        handle,
        reconciler,
    }
}

async fn host_tree(host: &InMemoryTreeHost) -> BookmarkTree {
    BookmarkTree::from_nodes(&host.get_tree().await.unwrap()).unwrap()
}

#[tokio::test]
async fn test_staged_create_lands_at_final_index() {
    let f = fixture(ReconcileSettings::immediate()).await;
    let old = host_tree(&f.host).await;
    let (staged, temp_id) = old.add_node("1", "Gamma", Some("https://gamma.example/"), Some(0)).unwrap();
    let new = staged.move_node(&temp_id, "10", DropPosition::After).unwrap();

    let report = f.reconciler.apply(&diff(&old, &new).operations).await;
    assert!(report.success, "errors: {:?}", report.errors);
    assert!(report.reloaded);

    let created = report.id_map.get(&temp_id).unwrap().clone();
    assert_eq!(f.host.children_of("1"), vec!["10".to_string(), created.clone(), "11".to_string()]);

    let store = f.handle.current().unwrap();
    let titles: Vec<String> = store
        .get_children("1", Page::default())
        .unwrap()
        .into_iter()
        .map(|r| r.title)
        .collect();
    assert_eq!(titles, vec!["Alpha", "Gamma", "Beta"]);
}

#[tokio::test]
async fn test_create_then_move_between_empty_folders() {
    let f = fixture(ReconcileSettings::immediate()).await;
    let old = host_tree(&f.host).await;
    let (with_a, a) = old.add_node("1", "A", None, None).unwrap();
    let (with_b, b) = with_a.add_node("1", "B", None, None).unwrap();
    let base = diff(&old, &with_b);
    let report = f.reconciler.apply(&base.operations).await;
    assert!(report.success);
    let (a, b) = (report.id_map[&a].clone(), report.id_map[&b].clone());

    let old = host_tree(&f.host).await;
    let (staged, x) = old.add_node(&a, "X", Some("https://x.example/"), None).unwrap();
    let new = staged.move_node(&x, &b, DropPosition::Inside).unwrap();
    let result = diff(&old, &new);
    assert_eq!((result.stats.creates, result.stats.moves, result.stats.total), (1, 1, 2));

    let report = f.reconciler.apply(&result.operations).await;
    assert!(report.success, "errors: {:?}", report.errors);
    assert!(f.host.children_of(&a).is_empty());
    assert_eq!(f.host.children_of(&b), vec![report.id_map[&x].clone()]);
}

#[tokio::test]
async fn test_nested_creates_resolve_parent_ids() {
    let f = fixture(ReconcileSettings::immediate()).await;
    let old = host_tree(&f.host).await;
    let (staged, folder_id) = old.add_node("2", "Reading", None, Some(0)).unwrap();
    let (new, paper_id) = staged
        .add_node(&folder_id, "Paper", Some("https://paper.example/"), None)
        .unwrap();

    let report = f.reconciler.apply(&diff(&old, &new).operations).await;
    assert!(report.success, "errors: {:?}", report.errors);

    let folder = report.id_map.get(&folder_id).unwrap();
    let paper = report.id_map.get(&paper_id).unwrap();
    assert_eq!(f.host.children_of("2"), vec![folder.clone(), "20".to_string()]);
    assert_eq!(f.host.children_of(folder), vec![paper.clone()]);
}

#[tokio::test]
async fn test_delete_and_cross_parent_move() {
    let f = fixture(ReconcileSettings::immediate()).await;
    let old = host_tree(&f.host).await;
    let new = old
        .remove_node("20")
        .unwrap()
        .move_node("10", "2", DropPosition::Inside)
        .unwrap();

    let result = diff(&old, &new);
    assert_eq!(result.stats.deletes, 1);

    let report = f.reconciler.apply(&result.operations).await;
    assert!(report.success, "errors: {:?}", report.errors);
    assert_eq!(f.host.children_of("1"), vec!["11".to_string()]);
    assert_eq!(f.host.children_of("2"), vec!["10".to_string()]);
    assert!(f.host.get("21").is_none());
    assert!(f.host.get("22").is_none());

    let store = f.handle.current().unwrap();
    assert!(store.get_by_id("21").unwrap().is_none());
    assert_eq!(store.get_by_id("10").unwrap().unwrap().parent_id.as_deref(), Some("2"));
}

#[tokio::test]
async fn test_reordering_within_one_parent() {
    let f = fixture(ReconcileSettings::immediate()).await;
    let old = host_tree(&f.host).await;
    let new = old.move_node("22", "21", DropPosition::Before).unwrap();

    let report = f.reconciler.apply(&diff(&old, &new).operations).await;
    assert!(report.success);
    assert_eq!(f.host.children_of("20"), vec!["22".to_string(), "21".to_string()]);
}

#[tokio::test]
async fn test_partial_failure_keeps_going() {
    let f = fixture(ReconcileSettings::immediate()).await;
    let old = host_tree(&f.host).await;
    let rename = |title: &str| NodeChanges {
        title: Some(title.into()),
        url: None,
    };
    let new = old
        .edit_node("10", &rename("Alpha 2"))
        .unwrap()
        .edit_node("11", &rename("Beta 2"))
        .unwrap()
        .edit_node("21", &rename("Old one 2"))
        .unwrap();
    f.host.fail_on(["11"]);

    let report = f.reconciler.apply(&diff(&old, &new).operations).await;
    assert!(!report.success);
    assert!(report.reloaded);
    assert_eq!(report.errors.len(), 1);
    let failure = &report.errors[0];
    assert_eq!(failure.node_id, "11");
    assert_eq!(failure.kind, OperationType::Update);
    assert!(failure.message.contains("refused"));
    assert_eq!(f.host.get("10").unwrap().title, "Alpha 2");
    assert_eq!(f.host.get("11").unwrap().title, "Beta");
    assert_eq!(f.host.get("21").unwrap().title, "Old one 2");
    let store = f.handle.current().unwrap();
    assert_eq!(store.get_by_id("21").unwrap().unwrap().title, "Old one 2");

    // The failed operation can be retried on its own
    f.host.clear_failures();
    let retry = f.reconciler.apply(&[failure.operation.clone()]).await;
    assert!(retry.success);
    assert_eq!(f.host.get("11").unwrap().title, "Beta 2");
}

#[tokio::test]
async fn test_unresolved_temp_id_fails_its_operation_once() {
    let f = fixture(ReconcileSettings::immediate()).await;
    let orphan_move = Operation::new(
        OperationKind::Move {
            node_id: "tmp_never_created".into(),
            from: Position::new("1", 0),
            to: Position::new("1", 1),
        },
        0,
    );

    let report = f.reconciler.apply(&[orphan_move]).await;
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].message.contains("temporary id"));
    assert_eq!(report.steps, 2);
}

#[tokio::test]
async fn test_progress_is_reported_once_per_operation() {
    let f = fixture(ReconcileSettings {
        batch_size: 1,
        ..ReconcileSettings::immediate()
    })
    .await;
    let old = host_tree(&f.host).await;
    let (staged, temp_id) = old.add_node("1", "Gamma", Some("https://gamma.example/"), Some(0)).unwrap();
    let new = staged
        .move_node(&temp_id, "11", DropPosition::After)
        .unwrap()
        .remove_node("21")
        .unwrap();
    let operations = diff(&old, &new).operations;

    let flag = f.reconciler.self_change_flag();
    let mut seen: Vec<ApplyProgress> = Vec::new();
    let mut raised = true;
    let report = f
        .reconciler
        .apply_with_progress(&operations, |progress| {
            raised &= flag.load(Ordering::SeqCst);
            seen.push(progress.clone());
        })
        .await;

    assert!(report.success);
    assert!(raised);
    // The staged create expands to more host calls than operations
    assert!(report.steps > operations.len());
    assert_eq!(seen.len(), operations.len());
    let currents: Vec<usize> = seen.iter().map(|p| p.current).collect();
    assert_eq!(currents, (1..=operations.len()).collect::<Vec<_>>());
    assert!(seen.iter().all(|p| p.total == operations.len() && !p.description.is_empty()));
    assert!(!f.reconciler.is_applying());
}

#[tokio::test]
async fn test_failed_operation_is_reported_once() {
    let f = fixture(ReconcileSettings::immediate()).await;
    let old = host_tree(&f.host).await;
    let new = old.move_node("22", "21", DropPosition::Before).unwrap();
    let operations = diff(&old, &new).operations;
    f.host.fail_on(["22"]);

    let mut seen: Vec<ApplyProgress> = Vec::new();
    let report = f
        .reconciler
        .apply_with_progress(&operations, |progress| seen.push(progress.clone()))
        .await;

    assert_eq!(report.errors.len(), 1);
    assert_eq!(seen.len(), operations.len());
    assert_eq!(seen.last().map(|p| p.current), Some(operations.len()));
}

#[tokio::test]
async fn test_self_change_flag_clears_after_delay() {
    let f = fixture(ReconcileSettings {
        self_change_clear_ms: 50,
        ..ReconcileSettings::immediate()
    })
    .await;

    let report = f.reconciler.apply(&[]).await;
    assert!(report.success);
    assert!(f.reconciler.is_applying());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!f.reconciler.is_applying());
}

#[tokio::test]
async fn test_reload_picks_up_host_changes() {
    let f = fixture(ReconcileSettings::immediate()).await;
    f.host
        .create(CreateRequest {
            parent_id: "2".into(),
            title: "Outside".into(),
            url: Some("https://outside.example/".into()),
            index: None,
        })
        .await
        .unwrap();

    assert_eq!(f.reconciler.reload().await.unwrap(), seed().len() + 1);
    let store = f.handle.current().unwrap();
    assert_eq!(store.get_children("2", Page::default()).unwrap().len(), 2);
}

#[tokio::test]
async fn test_reload_failure_is_reported_separately() {
    let host = Arc::new(InMemoryTreeHost::from_nodes(&seed()).unwrap());
    let handle = Arc::new(StoreHandle::in_memory(StorageSettings::default()));
    let reconciler = Reconciler::new(host.clone(), handle, ReconcileSettings::immediate());

    let old = host_tree(&host).await;
    let new = old
        .edit_node(
            "10",
            &NodeChanges {
                title: Some("Renamed".into()),
                url: None,
            },
        )
        .unwrap();
    let report = reconciler.apply(&diff(&old, &new).operations).await;

    assert!(report.success);
    assert!(!report.reloaded);
    assert!(report.reload_error.is_some());
    assert_eq!(host.get("10").unwrap().title, "Renamed");
}
