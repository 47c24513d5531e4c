//! Persistent bookmark tree snapshots.
//!
//! A [`BookmarkTree`] is immutable from the outside: every edit returns a new
//! snapshot that shares all untouched subtrees with the old one. Only the
//! nodes on the path to the edit are copied (`Arc::make_mut`), so keeping the
//! original and the proposal side by side costs little.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::types::errors::TreeError;
use crate::types::host::NodeChanges;
use crate::types::node::{BookmarkRecord, Node};
use crate::types::operation::Position;

/// Prefix of ids handed out to nodes staged in a proposal.
pub const TEMP_ID_PREFIX: &str = "tmp_";

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4().simple())
}

/// Where a moved node lands relative to the target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPosition {
    /// Last child of the target folder.
    Inside,
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub node: Node,
    pub children: Vec<Arc<TreeNode>>,
    /// Where the node was first placed when it was staged in this proposal.
    pub staged_at: Option<Position>,
}

impl TreeNode {
    fn leaf(node: Node, staged_at: Option<Position>) -> Self {
        Self {
            node,
            children: Vec::new(),
            staged_at,
        }
    }

    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| 1 + child.descendant_count())
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookmarkTree {
    roots: Vec<Arc<TreeNode>>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn renumber(children: &mut [Arc<TreeNode>]) {
    for (i, child) in children.iter_mut().enumerate() {
        let i = i as u32;
        if child.node.index != i {
            Arc::make_mut(child).node.index = i;
        }
    }
}

fn locate_in(children: &[Arc<TreeNode>], id: &str, path: &mut Vec<usize>) -> bool {
    for (i, child) in children.iter().enumerate() {
        path.push(i);
        if child.node.id == id || locate_in(&child.children, id, path) {
            return true;
        }
        path.pop();
    }
    false
}

fn visit_in(children: &[Arc<TreeNode>], depth: usize, f: &mut impl FnMut(&TreeNode, usize)) {
    for child in children {
        f(child, depth);
        visit_in(&child.children, depth + 1, f);
    }
}

impl BookmarkTree {
    /// Builds a tree from a flat node list. Sibling indexes are normalized to
    /// `0..n` following the given order of `index`.
    pub fn from_nodes(nodes: &[Node]) -> Result<Self, TreeError> {
        let mut by_id: HashMap<&str, &Node> = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if by_id.insert(node.id.as_str(), node).is_some() {
                return Err(TreeError::DuplicateId(node.id.clone()));
            }
        }

        let mut roots: Vec<&Node> = Vec::new();
        let mut by_parent: HashMap<&str, Vec<&Node>> = HashMap::new();
        for node in nodes {
            match node.parent_id.as_deref() {
                None => roots.push(node),
                Some(parent_id) => match by_id.get(parent_id) {
                    Some(parent) if parent.is_bookmark() => {
                        return Err(TreeError::NotAFolder(parent_id.to_string()))
                    }
                    Some(_) => by_parent.entry(parent_id).or_default().push(node),
                    None => {
                        return Err(TreeError::OrphanNode {
                            id: node.id.clone(),
                            parent_id: parent_id.to_string(),
                        })
                    }
                },
            }
        }
        for siblings in by_parent.values_mut() {
            siblings.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.id.cmp(&b.id)));
        }
        roots.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.id.cmp(&b.id)));

        fn build(node: &Node, index: usize, by_parent: &HashMap<&str, Vec<&Node>>) -> Arc<TreeNode> {
            let mut copy = node.clone();
            copy.index = index as u32;
            let children = by_parent
                .get(node.id.as_str())
                .map(|kids| {
                    kids.iter()
                        .enumerate()
                        .map(|(i, kid)| build(kid, i, by_parent))
                        .collect()
                })
                .unwrap_or_default();
            Arc::new(TreeNode {
                node: copy,
                children,
                staged_at: None,
            })
        }

        let tree = Self {
            roots: roots
                .iter()
                .enumerate()
                .map(|(i, root)| build(root, i, &by_parent))
                .collect(),
        };

        // Nodes on a parent cycle are never reached from a root
        if tree.len() != nodes.len() {
            let mut reached = HashSet::new();
            tree.visit(|n, _| {
                reached.insert(n.node.id.clone());
            });
            if let Some(node) = nodes.iter().find(|n| !reached.contains(&n.id)) {
                return Err(TreeError::OrphanNode {
                    id: node.id.clone(),
                    parent_id: node.parent_id.clone().unwrap_or_default(),
                });
            }
        }
        Ok(tree)
    }

    pub fn from_records(records: &[BookmarkRecord]) -> Result<Self, TreeError> {
        let nodes: Vec<Node> = records.iter().map(BookmarkRecord::to_node).collect();
        Self::from_nodes(&nodes)
    }

    pub fn roots(&self) -> &[Arc<TreeNode>] {
        &self.roots
    }

    /// Pre-order walk with depth (roots at depth 0).
    pub fn visit(&self, mut f: impl FnMut(&TreeNode, usize)) {
        visit_in(&self.roots, 0, &mut f);
    }

    /// Flattens the tree in pre-order.
    pub fn to_nodes(&self) -> Vec<Node> {
        let mut nodes = Vec::new();
        self.visit(|n, _| nodes.push(n.node.clone()));
        nodes
    }

    pub fn len(&self) -> usize {
        let mut count = 0;
        self.visit(|_, _| count += 1);
        count
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    fn locate(&self, id: &str) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        locate_in(&self.roots, id, &mut path).then_some(path)
    }

    fn arc_at(&self, path: &[usize]) -> Option<&Arc<TreeNode>> {
        let (first, rest) = path.split_first()?;
        let mut current = self.roots.get(*first)?;
        for i in rest {
            current = current.children.get(*i)?;
        }
        Some(current)
    }

    fn node_mut(&mut self, path: &[usize]) -> Option<&mut TreeNode> {
        let (first, rest) = path.split_first()?;
        let mut current = Arc::make_mut(self.roots.get_mut(*first)?);
        for i in rest {
            current = Arc::make_mut(current.children.get_mut(*i)?);
        }
        Some(current)
    }

    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        self.locate(id).and_then(|path| self.arc_at(&path)).map(|arc| arc.as_ref())
    }

    /// The shared subtree handle; equal pointers across snapshots mean the
    /// subtree was not copied.
    pub fn subtree(&self, id: &str) -> Option<Arc<TreeNode>> {
        self.locate(id).and_then(|path| self.arc_at(&path).cloned())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.locate(id).is_some()
    }

    pub fn is_root(&self, id: &str) -> bool {
        self.roots.iter().any(|r| r.node.id == id)
    }

    /// True when `id` lies strictly below `ancestor_id`.
    pub fn is_descendant(&self, ancestor_id: &str, id: &str) -> bool {
        match self.find(ancestor_id) {
            Some(ancestor) => {
                let mut path = Vec::new();
                locate_in(&ancestor.children, id, &mut path)
            }
            None => false,
        }
    }

    /// Stages a new node under `parent_id` and returns the new snapshot and the
    /// node's temporary id. `index` is clamped; `None` appends.
    pub fn add_node(
        &self,
        parent_id: &str,
        title: &str,
        url: Option<&str>,
        index: Option<u32>,
    ) -> Result<(Self, String), TreeError> {
        let parent_path = self
            .locate(parent_id)
            .ok_or_else(|| TreeError::NodeNotFound(parent_id.to_string()))?;
        let mut next = self.clone();
        let parent = next
            .node_mut(&parent_path)
            .ok_or_else(|| TreeError::NodeNotFound(parent_id.to_string()))?;
        if parent.node.is_bookmark() {
            return Err(TreeError::NotAFolder(parent_id.to_string()));
        }

        let position = index
            .map(|i| (i as usize).min(parent.children.len()))
            .unwrap_or(parent.children.len());
        let id = new_temp_id();
        let node = Node {
            id: id.clone(),
            parent_id: Some(parent_id.to_string()),
            index: position as u32,
            title: title.to_string(),
            url: url.map(str::to_string),
            date_added: now_millis(),
            date_modified: None,
        };
        let staged = Position::new(parent_id, position as u32);
        parent
            .children
            .insert(position, Arc::new(TreeNode::leaf(node, Some(staged))));
        renumber(&mut parent.children);
        Ok((next, id))
    }

    /// Changes the title and/or URL of a node. Folders cannot get a URL.
    pub fn edit_node(&self, id: &str, changes: &NodeChanges) -> Result<Self, TreeError> {
        if self.is_root(id) {
            return Err(TreeError::RootNode(id.to_string()));
        }
        let path = self
            .locate(id)
            .ok_or_else(|| TreeError::NodeNotFound(id.to_string()))?;
        let mut next = self.clone();
        let target = next
            .node_mut(&path)
            .ok_or_else(|| TreeError::NodeNotFound(id.to_string()))?;
        if changes.url.is_some() && target.node.is_folder() {
            return Err(TreeError::InvalidEdit(format!("folder {} cannot have a URL", id)));
        }
        if let Some(title) = &changes.title {
            target.node.title = title.clone();
        }
        if let Some(url) = &changes.url {
            target.node.url = Some(url.clone());
        }
        target.node.date_modified = Some(now_millis());
        Ok(next)
    }

    /// Moves `id` relative to `target_id`.
    ///
    /// Both the old and the new sibling lists are renumbered from 0. When the
    /// target does not exist the node goes to index 0 of the first root.
    pub fn move_node(&self, id: &str, target_id: &str, position: DropPosition) -> Result<Self, TreeError> {
        if self.is_root(id) {
            return Err(TreeError::RootNode(id.to_string()));
        }
        let source_path = self
            .locate(id)
            .ok_or_else(|| TreeError::NodeNotFound(id.to_string()))?;
        if id == target_id || self.is_descendant(id, target_id) {
            return Err(TreeError::InvalidMove(format!("{} cannot be moved into itself", id)));
        }
        let target_exists = self.contains(target_id);
        if target_exists && position == DropPosition::Inside {
            if let Some(target) = self.find(target_id) {
                if target.node.is_bookmark() {
                    return Err(TreeError::NotAFolder(target_id.to_string()));
                }
            }
        }
        if target_exists && position != DropPosition::Inside && self.is_root(target_id) {
            return Err(TreeError::InvalidMove(format!("cannot place {} beside a root folder", id)));
        }

        let mut next = self.clone();
        let (source_index, source_parent) = source_path
            .split_last()
            .ok_or_else(|| TreeError::NodeNotFound(id.to_string()))?;
        let old_parent = next
            .node_mut(source_parent)
            .ok_or_else(|| TreeError::NodeNotFound(id.to_string()))?;
        let mut moving = old_parent.children.remove(*source_index);
        renumber(&mut old_parent.children);

        let (dest_path, dest_index) = match next.locate(target_id) {
            None => {
                if next.roots.is_empty() {
                    return Err(TreeError::NodeNotFound(target_id.to_string()));
                }
                (vec![0], 0)
            }
            Some(target_path) => match position {
                DropPosition::Inside => {
                    let len = next.arc_at(&target_path).map(|t| t.children.len()).unwrap_or(0);
                    (target_path, len)
                }
                DropPosition::Before | DropPosition::After => {
                    let (target_index, target_parent) = target_path
                        .split_last()
                        .ok_or_else(|| TreeError::NodeNotFound(target_id.to_string()))?;
                    let offset = usize::from(position == DropPosition::After);
                    (target_parent.to_vec(), target_index + offset)
                }
            },
        };

        let dest = next
            .node_mut(&dest_path)
            .ok_or_else(|| TreeError::NodeNotFound(target_id.to_string()))?;
        let dest_index = dest_index.min(dest.children.len());
        {
            let moved = Arc::make_mut(&mut moving);
            moved.node.parent_id = Some(dest.node.id.clone());
            moved.node.index = dest_index as u32;
        }
        dest.children.insert(dest_index, moving);
        renumber(&mut dest.children);
        Ok(next)
    }

    /// Removes a node and its whole subtree.
    pub fn remove_node(&self, id: &str) -> Result<Self, TreeError> {
        if self.is_root(id) {
            return Err(TreeError::RootNode(id.to_string()));
        }
        let path = self
            .locate(id)
            .ok_or_else(|| TreeError::NodeNotFound(id.to_string()))?;
        let (index, parent_path) = path
            .split_last()
            .ok_or_else(|| TreeError::NodeNotFound(id.to_string()))?;
        let mut next = self.clone();
        let parent = next
            .node_mut(parent_path)
            .ok_or_else(|| TreeError::NodeNotFound(id.to_string()))?;
        parent.children.remove(*index);
        renumber(&mut parent.children);
        Ok(next)
    }
}
