//! Snapshot Differencer.
//!
//! Compares two tree snapshots by id and produces the typed operations that
//! turn the first into the second. Operations come out grouped as creates,
//! deletes, then updates and moves; the executor decides the replay order.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::proposal_tree::{is_temp_id, BookmarkTree};
use crate::types::errors::TreeError;
use crate::types::node::Node;
use crate::types::operation::{ChangeField, DiffResult, FieldChange, Operation, OperationKind, Position};

/// Parent id given to top-level nodes of both snapshots while comparing.
pub const SYNTHETIC_ROOT_ID: &str = "__root__";

/// What to do with operations that involve staged (temporary) ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempIdPolicy {
    /// Keep them; the executor maps temporary ids to host ids as creates resolve.
    #[default]
    Defer,
    /// Drop every operation that references a temporary id.
    Exclude,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOptions {
    pub temp_ids: TempIdPolicy,
}

struct Entry {
    node: Node,
    staged_at: Option<Position>,
    descendants: usize,
}

/// Flattens a snapshot into pre-order ids plus an id map.
fn flatten(tree: &BookmarkTree) -> (Vec<String>, HashMap<String, Entry>) {
    let mut order = Vec::new();
    let mut map = HashMap::new();
    tree.visit(|tree_node, _| {
        let mut node = tree_node.node.clone();
        if node.parent_id.is_none() {
            node.parent_id = Some(SYNTHETIC_ROOT_ID.to_string());
        }
        order.push(node.id.clone());
        map.insert(
            node.id.clone(),
            Entry {
                node,
                staged_at: tree_node.staged_at.clone(),
                descendants: tree_node.descendant_count(),
            },
        );
    });
    (order, map)
}

fn position_of(node: &Node) -> Position {
    Position::new(node.parent_id.clone().unwrap_or_default(), node.index)
}

/// Operations that turn `old` into `new`, keeping temporary ids.
pub fn diff(old: &BookmarkTree, new: &BookmarkTree) -> DiffResult {
    diff_with(old, new, DiffOptions::default())
}

/// Diffs two flat node lists.
pub fn diff_nodes(old: &[Node], new: &[Node], options: DiffOptions) -> Result<DiffResult, TreeError> {
    Ok(diff_with(
        &BookmarkTree::from_nodes(old)?,
        &BookmarkTree::from_nodes(new)?,
        options,
    ))
}

pub fn diff_with(old: &BookmarkTree, new: &BookmarkTree, options: DiffOptions) -> DiffResult {
    let timestamp = chrono::Utc::now().timestamp_millis();
    let (old_order, old_map) = flatten(old);
    let (new_order, new_map) = flatten(new);

    let roots: HashSet<&str> = old
        .roots()
        .iter()
        .chain(new.roots().iter())
        .map(|r| r.node.id.as_str())
        .collect();

    let mut creates = Vec::new();
    let mut deletes = Vec::new();
    let mut changes = Vec::new();

    for id in &new_order {
        if roots.contains(id.as_str()) || old_map.contains_key(id) {
            continue;
        }
        let entry = &new_map[id];
        let current = position_of(&entry.node);
        let staged = entry
            .staged_at
            .clone()
            .filter(|s| s != &current && new_map.get(&s.parent_id).is_some_and(|p| p.node.is_folder()));

        match staged {
            Some(staged) => {
                let mut node = entry.node.clone();
                node.parent_id = Some(staged.parent_id.clone());
                node.index = staged.index;
                creates.push(Operation::new(
                    OperationKind::Create {
                        node,
                        parent_id: staged.parent_id.clone(),
                        index: staged.index,
                    },
                    timestamp,
                ));
                creates.push(Operation::new(
                    OperationKind::Move {
                        node_id: id.clone(),
                        from: staged,
                        to: current,
                    },
                    timestamp,
                ));
            }
            None => creates.push(Operation::new(
                OperationKind::Create {
                    node: entry.node.clone(),
                    parent_id: current.parent_id,
                    index: current.index,
                },
                timestamp,
            )),
        }
    }

    for id in &old_order {
        if roots.contains(id.as_str()) || new_map.contains_key(id) {
            continue;
        }
        let entry = &old_map[id];
        // A deleted ancestor already takes this node with it
        let parent_deleted = entry
            .node
            .parent_id
            .as_ref()
            .is_some_and(|p| old_map.contains_key(p) && !new_map.contains_key(p));
        if parent_deleted {
            continue;
        }
        let position = position_of(&entry.node);
        deletes.push(Operation::new(
            OperationKind::Delete {
                node: entry.node.clone(),
                parent_id: position.parent_id,
                index: position.index,
                descendant_count: entry.descendants,
            },
            timestamp,
        ));
    }

    for id in &new_order {
        if roots.contains(id.as_str()) {
            continue;
        }
        let (Some(before), Some(after)) = (old_map.get(id), new_map.get(id)) else {
            continue;
        };

        let mut field_changes = Vec::new();
        if before.node.title != after.node.title {
            field_changes.push(FieldChange {
                field: ChangeField::Title,
                old_value: Some(before.node.title.clone()),
                new_value: Some(after.node.title.clone()),
            });
        }
        if before.node.url != after.node.url {
            field_changes.push(FieldChange {
                field: ChangeField::Url,
                old_value: before.node.url.clone(),
                new_value: after.node.url.clone(),
            });
        }
        if !field_changes.is_empty() {
            changes.push(Operation::new(
                OperationKind::Update {
                    node_id: id.clone(),
                    changes: field_changes,
                },
                timestamp,
            ));
        }

        let from = position_of(&before.node);
        let to = position_of(&after.node);
        if from != to {
            changes.push(Operation::new(
                OperationKind::Move {
                    node_id: id.clone(),
                    from,
                    to,
                },
                timestamp,
            ));
        }
    }

    let mut operations: Vec<Operation> = creates.into_iter().chain(deletes).chain(changes).collect();
    if options.temp_ids == TempIdPolicy::Exclude {
        let before = operations.len();
        operations.retain(|op| !op.referenced_ids().iter().any(|id| is_temp_id(id)));
        debug!(dropped = before - operations.len(), "excluded operations on temporary ids");
    }

    let result = DiffResult::new(operations);
    debug!(
        creates = result.stats.creates,
        deletes = result.stats.deletes,
        updates = result.stats.updates,
        moves = result.stats.moves,
        "snapshots compared"
    );
    result
}
