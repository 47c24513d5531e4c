//! Property-based tests for diff-then-apply.
//!
//! Random edits are staged on a snapshot of the host tree. Replaying the diff
//! through the Reconciler must leave the host with exactly the staged shape
//! (same parents, sibling order, titles and URLs), with staged ids replaced by
//! the ids the host handed out.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use tidymarks::managers::store_handle::StoreHandle;
use tidymarks::services::memory_host::InMemoryTreeHost;
use tidymarks::services::proposal_tree::{BookmarkTree, DropPosition};
use tidymarks::services::reconciler::Reconciler;
use tidymarks::services::tree_diff::diff;
use tidymarks::services::tree_host::TreeHost;
use tidymarks::types::host::{CreateRequest, NodeChanges};
use tidymarks::types::node::Node;
use tidymarks::types::settings::{ReconcileSettings, StorageSettings};

#[derive(Debug, Clone)]
enum Edit {
    Add { parent: usize, index: Option<u32>, folder: bool, title: String },
    Move { node: usize, target: usize, position: DropPosition },
    Remove { node: usize },
    Rename { node: usize, title: String },
    Relink { node: usize, path: String },
}

fn arb_title() -> impl Strategy<Value = String> {
    "[A-Za-z][a-z0-9 ]{0,10}"
}

fn arb_position() -> impl Strategy<Value = DropPosition> {
    prop_oneof![
        Just(DropPosition::Inside),
        Just(DropPosition::Before),
        Just(DropPosition::After),
    ]
}

fn arb_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => (any::<usize>(), proptest::option::of(0u32..6), any::<bool>(), arb_title())
            .prop_map(|(parent, index, folder, title)| Edit::Add { parent, index, folder, title }),
        4 => (any::<usize>(), any::<usize>(), arb_position())
            .prop_map(|(node, target, position)| Edit::Move { node, target, position }),
        1 => any::<usize>().prop_map(|node| Edit::Remove { node }),
        1 => (any::<usize>(), arb_title()).prop_map(|(node, title)| Edit::Rename { node, title }),
        1 => (any::<usize>(), "[a-z]{1,8}").prop_map(|(node, path)| Edit::Relink { node, path }),
    ]
}

fn arb_seed() -> impl Strategy<Value = Vec<(usize, bool, String)>> {
    proptest::collection::vec((any::<usize>(), any::<bool>(), arb_title()), 0..15)
}

fn pick(nodes: &[Node], n: usize) -> Option<&Node> {
    if nodes.is_empty() {
        None
    } else {
        nodes.get(n % nodes.len())
    }
}

/// Grows the host with random folders and bookmarks.
async fn grow(host: &InMemoryTreeHost, seed: &[(usize, bool, String)]) {
    for (parent, folder, title) in seed {
        let folders: Vec<Node> = host.snapshot().into_iter().filter(|n| n.is_folder()).collect();
        if let Some(parent) = pick(&folders, *parent) {
            let url = (!folder).then(|| format!("https://{}.example/", title.len()));
            let _ = host
                .create(CreateRequest {
                    parent_id: parent.id.clone(),
                    title: title.clone(),
                    url,
                    index: None,
                })
                .await;
        }
    }
}

/// Applies an edit to the staged tree; edits the tree rejects are skipped.
fn stage(tree: &BookmarkTree, edit: &Edit) -> BookmarkTree {
    let nodes = tree.to_nodes();
    let folders: Vec<Node> = nodes.iter().filter(|n| n.is_folder()).cloned().collect();
    let editable: Vec<Node> = nodes.iter().filter(|n| n.parent_id.is_some()).cloned().collect();

    let staged = match edit {
        Edit::Add { parent, index, folder, title } => pick(&folders, *parent).and_then(|parent| {
            let url = (!folder).then(|| format!("https://{}.example/", title.len()));
            tree.add_node(&parent.id, title, url.as_deref(), *index).ok().map(|(t, _)| t)
        }),
        Edit::Move { node, target, position } => pick(&editable, *node)
            .zip(pick(&nodes, *target))
            .and_then(|(node, target)| tree.move_node(&node.id, &target.id, *position).ok()),
        Edit::Remove { node } => pick(&editable, *node).and_then(|node| tree.remove_node(&node.id).ok()),
        Edit::Rename { node, title } => pick(&editable, *node).and_then(|node| {
            tree.edit_node(
                &node.id,
                &NodeChanges {
                    title: Some(title.clone()),
                    url: None,
                },
            )
            .ok()
        }),
        Edit::Relink { node, path } => pick(&editable, *node).and_then(|node| {
            tree.edit_node(
                &node.id,
                &NodeChanges {
                    title: None,
                    url: Some(format!("https://relinked.example/{}", path)),
                },
            )
            .ok()
        }),
    };
    staged.unwrap_or_else(|| tree.clone())
}

type Shape = Vec<(String, Option<String>, u32, String, Option<String>)>;

/// (id, parent, index, title, url) for every node, with ids translated.
fn shape(nodes: &[Node], id_map: &BTreeMap<String, String>) -> Shape {
    let translate = |id: &str| id_map.get(id).cloned().unwrap_or_else(|| id.to_string());
    let mut shape: Shape = nodes
        .iter()
        .map(|n| {
            (
                translate(&n.id),
                n.parent_id.as_deref().map(translate),
                n.index,
                n.title.clone(),
                n.url.clone(),
            )
        })
        .collect();
    shape.sort();
    shape
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn applied_diff_reproduces_staged_tree(
        seed in arb_seed(),
        edits in proptest::collection::vec(arb_edit(), 1..12),
        batch_size in 1usize..8,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let host = Arc::new(InMemoryTreeHost::with_default_folders());
            grow(&host, &seed).await;

            let store = Arc::new(StoreHandle::in_memory(StorageSettings::default()));
            store.initialize().await.unwrap();
            let reconciler = Reconciler::new(
                host.clone(),
                store.clone(),
                ReconcileSettings {
                    batch_size,
                    ..ReconcileSettings::immediate()
                },
            );

            let old = BookmarkTree::from_nodes(&host.get_tree().await.unwrap()).unwrap();
            let new = edits.iter().fold(old.clone(), |tree, edit| stage(&tree, edit));
            let result = diff(&old, &new);

            let report = reconciler.apply(&result.operations).await;
            prop_assert!(report.success, "failed: {:?}\nops: {:?}", report.errors, result.operations);
            prop_assert_eq!(report.id_map.len(), result.stats.creates);

            let after = host.get_tree().await.unwrap();
            prop_assert_eq!(shape(&after, &BTreeMap::new()), shape(&new.to_nodes(), &report.id_map));

            // The store was reloaded from the host
            let records = store.current().unwrap().count().unwrap();
            prop_assert_eq!(records, after.len());

            // Nothing is left to do
            let settled = BookmarkTree::from_nodes(&after).unwrap();
            prop_assert!(!diff(&settled, &settled).has_changes);
            Ok(())
        })?;
    }

    #[test]
    fn diff_of_identical_snapshots_is_empty(seed in arb_seed()) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let host = InMemoryTreeHost::with_default_folders();
        rt.block_on(grow(&host, &seed));

        let tree = BookmarkTree::from_nodes(&host.snapshot()).unwrap();
        let copy = BookmarkTree::from_nodes(&host.snapshot()).unwrap();
        let result = diff(&tree, &copy);
        prop_assert!(!result.has_changes);
        prop_assert!(result.affected_ids.is_empty());
    }
}
