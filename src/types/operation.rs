use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::node::Node;

/// A `(parent, index)` location in a tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub parent_id: String,
    pub index: u32,
}

impl Position {
    pub fn new(parent_id: impl Into<String>, index: u32) -> Self {
        Self {
            parent_id: parent_id.into(),
            index,
        }
    }
}

/// The node fields an `update` operation can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeField {
    Title,
    Url,
}

/// One changed field inside an `update` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: ChangeField,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// Discriminant of [`OperationKind`], used for statistics and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Move,
    Delete,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Move => "move",
            OperationType::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A single divergence between two tree snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OperationKind {
    Create {
        node: Node,
        parent_id: String,
        index: u32,
    },
    Delete {
        node: Node,
        parent_id: String,
        index: u32,
        descendant_count: usize,
    },
    Update {
        node_id: String,
        changes: Vec<FieldChange>,
    },
    Move {
        node_id: String,
        from: Position,
        to: Position,
    },
}

/// A timestamped, immutable operation produced by the differencer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Milliseconds since the UNIX epoch at which the diff produced this operation.
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: OperationKind,
}

impl Operation {
    pub fn new(kind: OperationKind, timestamp: i64) -> Self {
        Self { timestamp, kind }
    }

    pub fn op_type(&self) -> OperationType {
        match &self.kind {
            OperationKind::Create { .. } => OperationType::Create,
            OperationKind::Update { .. } => OperationType::Update,
            OperationKind::Move { .. } => OperationType::Move,
            OperationKind::Delete { .. } => OperationType::Delete,
        }
    }

    /// The id of the node this operation targets.
    pub fn node_id(&self) -> &str {
        match &self.kind {
            OperationKind::Create { node, .. } | OperationKind::Delete { node, .. } => &node.id,
            OperationKind::Update { node_id, .. } | OperationKind::Move { node_id, .. } => node_id,
        }
    }

    /// Every node id this operation refers to (target plus parents).
    pub fn referenced_ids(&self) -> Vec<&str> {
        match &self.kind {
            OperationKind::Create { node, parent_id, .. }
            | OperationKind::Delete { node, parent_id, .. } => vec![node.id.as_str(), parent_id.as_str()],
            OperationKind::Update { node_id, .. } => vec![node_id.as_str()],
            OperationKind::Move { node_id, from, to } => {
                vec![node_id.as_str(), from.parent_id.as_str(), to.parent_id.as_str()]
            }
        }
    }

    /// A short human-readable description used in progress reports.
    pub fn describe(&self) -> String {
        match &self.kind {
            OperationKind::Create { node, parent_id, index } => {
                let what = if node.is_bookmark() { "bookmark" } else { "folder" };
                format!("Create {} \"{}\" in {} at {}", what, node.title, parent_id, index)
            }
            OperationKind::Delete { node, descendant_count, .. } => {
                if *descendant_count > 0 {
                    format!("Delete \"{}\" and {} descendants", node.title, descendant_count)
                } else {
                    format!("Delete \"{}\"", node.title)
                }
            }
            OperationKind::Update { node_id, changes } => {
                let fields: Vec<&str> = changes
                    .iter()
                    .map(|c| match c.field {
                        ChangeField::Title => "title",
                        ChangeField::Url => "url",
                    })
                    .collect();
                format!("Update {} of {}", fields.join(", "), node_id)
            }
            OperationKind::Move { node_id, to, .. } => {
                format!("Move {} to {} at {}", node_id, to.parent_id, to.index)
            }
        }
    }
}

/// Per-type counts of a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub creates: usize,
    pub updates: usize,
    pub moves: usize,
    pub deletes: usize,
    pub total: usize,
}

impl DiffStats {
    pub fn from_operations(operations: &[Operation]) -> Self {
        let mut stats = Self::default();
        for op in operations {
            match op.op_type() {
                OperationType::Create => stats.creates += 1,
                OperationType::Update => stats.updates += 1,
                OperationType::Move => stats.moves += 1,
                OperationType::Delete => stats.deletes += 1,
            }
        }
        stats.total = operations.len();
        stats
    }
}

/// Output of comparing two tree snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub operations: Vec<Operation>,
    pub stats: DiffStats,
    pub affected_ids: BTreeSet<String>,
    pub has_changes: bool,
}

impl DiffResult {
    pub fn new(operations: Vec<Operation>) -> Self {
        let stats = DiffStats::from_operations(&operations);
        let affected_ids = operations.iter().map(|op| op.node_id().to_string()).collect();
        let has_changes = !operations.is_empty();
        Self {
            operations,
            stats,
            affected_ids,
            has_changes,
        }
    }
}
