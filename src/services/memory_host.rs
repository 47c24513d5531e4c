//! In-memory tree host.
//!
//! Behaves like a browser bookmark API: a single root `"0"`, numeric string
//! ids, `remove` refuses non-empty folders and `move` takes the final index
//! among the new siblings. Every change is broadcast to subscribers. Specific
//! ids can be made to fail for testing partial failures.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::proposal_tree::BookmarkTree;
use super::tree_host::TreeHost;
use crate::types::errors::{HostError, TreeError};
use crate::types::host::{CreateRequest, Destination, HostEvent, NodeChanges};
use crate::types::node::Node;

pub const ROOT_ID: &str = "0";

#[derive(Default)]
struct HostState {
    nodes: HashMap<String, Node>,
    children: HashMap<String, Vec<String>>,
    roots: Vec<String>,
    next_id: u64,
    subscribers: Vec<mpsc::UnboundedSender<HostEvent>>,
    failing: HashSet<String>,
}

impl HostState {
    fn insert(&mut self, node: Node) {
        match node.parent_id.as_deref() {
            Some(parent) => self.children.entry(parent.to_string()).or_default().push(node.id.clone()),
            None => self.roots.push(node.id.clone()),
        }
        self.children.entry(node.id.clone()).or_default();
        self.nodes.insert(node.id.clone(), node);
    }

    fn check(&self, id: &str) -> Result<(), HostError> {
        if self.failing.contains(id) {
            return Err(HostError::Rejected(format!("operation on {} refused", id)));
        }
        Ok(())
    }

    fn node(&self, id: &str) -> Result<&Node, HostError> {
        self.nodes.get(id).ok_or_else(|| HostError::NotFound(id.to_string()))
    }

    fn mutable(&self, id: &str) -> Result<&Node, HostError> {
        self.check(id)?;
        let node = self.node(id)?;
        if node.parent_id.is_none() {
            return Err(HostError::Rejected(format!("root {} cannot be modified", id)));
        }
        Ok(node)
    }

    fn folder(&self, id: &str) -> Result<(), HostError> {
        if self.node(id)?.is_bookmark() {
            return Err(HostError::Rejected(format!("{} is not a folder", id)));
        }
        Ok(())
    }

    fn renumber(&mut self, parent: &str) {
        if let Some(kids) = self.children.get(parent) {
            for (i, kid) in kids.iter().enumerate() {
                if let Some(node) = self.nodes.get_mut(kid) {
                    node.index = i as u32;
                }
            }
        }
    }

    fn is_ancestor(&self, ancestor: &str, id: &str) -> bool {
        let mut cursor = self.nodes.get(id).and_then(|n| n.parent_id.clone());
        while let Some(parent) = cursor {
            if parent == ancestor {
                return true;
            }
            cursor = self.nodes.get(&parent).and_then(|n| n.parent_id.clone());
        }
        false
    }

    fn emit(&mut self, event: HostEvent) {
        self.subscribers.retain(|s| s.send(event.clone()).is_ok());
    }

    fn walk(&self, id: &str, out: &mut Vec<Node>) {
        if let Some(node) = self.nodes.get(id) {
            out.push(node.clone());
        }
        if let Some(kids) = self.children.get(id) {
            for kid in kids {
                self.walk(kid, out);
            }
        }
    }

    fn snapshot(&self) -> Vec<Node> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for root in &self.roots {
            self.walk(root, &mut out);
        }
        out
    }

    fn detach(&mut self, id: &str, parent: &str) {
        if let Some(kids) = self.children.get_mut(parent) {
            kids.retain(|k| k != id);
        }
        self.renumber(parent);
    }

    fn attach(&mut self, id: &str, parent: &str, index: Option<u32>) -> u32 {
        let kids = self.children.entry(parent.to_string()).or_default();
        let position = index.map(|i| (i as usize).min(kids.len())).unwrap_or(kids.len());
        kids.insert(position, id.to_string());
        self.renumber(parent);
        position as u32
    }
}

pub struct InMemoryTreeHost {
    state: Mutex<HostState>,
}

impl Default for InMemoryTreeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTreeHost {
    /// A host holding only the root folder.
    pub fn new() -> Self {
        let mut state = HostState {
            next_id: 1,
            ..HostState::default()
        };
        state.insert(Node {
            id: ROOT_ID.to_string(),
            parent_id: None,
            index: 0,
            title: String::new(),
            url: None,
            date_added: 0,
            date_modified: None,
        });
        Self {
            state: Mutex::new(state),
        }
    }

    /// Root plus the usual "Bookmarks Bar" (`1`) and "Other Bookmarks" (`2`).
    pub fn with_default_folders() -> Self {
        let host = Self::new();
        if let Ok(mut state) = host.state.lock() {
            for (id, title) in [("1", "Bookmarks Bar"), ("2", "Other Bookmarks")] {
                let index = state.children.get(ROOT_ID).map(|k| k.len()).unwrap_or(0) as u32;
                state.insert(Node {
                    id: id.to_string(),
                    parent_id: Some(ROOT_ID.to_string()),
                    index,
                    title: title.to_string(),
                    url: None,
                    date_added: 0,
                    date_modified: None,
                });
            }
            state.next_id = 3;
        }
        host
    }

    /// Seeds a host from a flat node list (validated and renumbered).
    pub fn from_nodes(nodes: &[Node]) -> Result<Self, TreeError> {
        let tree = BookmarkTree::from_nodes(nodes)?;
        let mut state = HostState::default();
        for node in tree.to_nodes() {
            state.insert(node);
        }
        state.next_id = state
            .nodes
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .map(|max| max + 1)
            .unwrap_or(1);
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HostState>, HostError> {
        self.state
            .lock()
            .map_err(|_| HostError::Unavailable("host state lock poisoned".to_string()))
    }

    /// Makes every call that targets one of `ids` fail with `Rejected`.
    pub fn fail_on<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut state) = self.state.lock() {
            state.failing.extend(ids.into_iter().map(Into::into));
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.clear();
        }
    }

    /// Synchronous snapshot, pre-order.
    pub fn snapshot(&self) -> Vec<Node> {
        self.state.lock().map(|s| s.snapshot()).unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.state.lock().ok().and_then(|s| s.nodes.get(id).cloned())
    }

    pub fn children_of(&self, id: &str) -> Vec<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.children.get(id).cloned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TreeHost for InMemoryTreeHost {
    async fn get_tree(&self) -> Result<Vec<Node>, HostError> {
        Ok(self.lock()?.snapshot())
    }

    async fn create(&self, request: CreateRequest) -> Result<Node, HostError> {
        let mut state = self.lock()?;
        state.check(&request.parent_id)?;
        state.folder(&request.parent_id)?;

        let id = state.next_id.to_string();
        state.next_id += 1;
        let node = Node {
            id: id.clone(),
            parent_id: Some(request.parent_id.clone()),
            index: 0,
            title: request.title,
            url: request.url,
            date_added: chrono::Utc::now().timestamp_millis(),
            date_modified: None,
        };
        state.nodes.insert(id.clone(), node);
        state.children.entry(id.clone()).or_default();
        state.attach(&id, &request.parent_id, request.index);

        let created = state.node(&id)?.clone();
        debug!(id = %created.id, parent = %request.parent_id, "host created node");
        state.emit(HostEvent::Created { node: created.clone() });
        Ok(created)
    }

    async fn update(&self, id: &str, changes: NodeChanges) -> Result<Node, HostError> {
        let mut state = self.lock()?;
        let node = state.mutable(id)?;
        if changes.url.is_some() && node.is_folder() {
            return Err(HostError::Rejected(format!("folder {} cannot have a URL", id)));
        }

        let updated = {
            let node = state
                .nodes
                .get_mut(id)
                .ok_or_else(|| HostError::NotFound(id.to_string()))?;
            if let Some(title) = changes.title {
                node.title = title;
            }
            if let Some(url) = changes.url {
                node.url = Some(url);
            }
            node.date_modified = Some(chrono::Utc::now().timestamp_millis());
            node.clone()
        };
        state.emit(HostEvent::Changed {
            id: id.to_string(),
            title: updated.title.clone(),
            url: updated.url.clone(),
        });
        Ok(updated)
    }

    async fn move_node(&self, id: &str, destination: Destination) -> Result<Node, HostError> {
        let mut state = self.lock()?;
        let node = state.mutable(id)?;
        let old_parent = node.parent_id.clone().unwrap_or_default();
        let old_index = node.index;
        state.folder(&destination.parent_id)?;
        if destination.parent_id == id || state.is_ancestor(id, &destination.parent_id) {
            return Err(HostError::Rejected(format!("{} cannot be moved into its own subtree", id)));
        }

        state.detach(id, &old_parent);
        if let Some(node) = state.nodes.get_mut(id) {
            node.parent_id = Some(destination.parent_id.clone());
        }
        let index = state.attach(id, &destination.parent_id, destination.index);

        let moved = state.node(id)?.clone();
        state.emit(HostEvent::Moved {
            id: id.to_string(),
            old_parent_id: old_parent,
            old_index,
            parent_id: destination.parent_id,
            index,
        });
        Ok(moved)
    }

    async fn remove(&self, id: &str) -> Result<(), HostError> {
        {
            let state = self.lock()?;
            state.mutable(id)?;
            if state.children.get(id).is_some_and(|kids| !kids.is_empty()) {
                return Err(HostError::Rejected(format!("folder {} is not empty", id)));
            }
        }
        self.remove_subtree(id).await
    }

    async fn remove_subtree(&self, id: &str) -> Result<(), HostError> {
        let mut state = self.lock()?;
        let node = state.mutable(id)?;
        let parent = node.parent_id.clone().unwrap_or_default();
        let index = node.index;

        let mut doomed = Vec::new();
        state.walk(id, &mut doomed);
        state.detach(id, &parent);
        for gone in &doomed {
            state.nodes.remove(&gone.id);
            state.children.remove(&gone.id);
        }

        state.emit(HostEvent::Removed {
            id: id.to_string(),
            parent_id: parent,
            index,
        });
        Ok(())
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<HostEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().ok()?.subscribers.push(tx);
        Some(rx)
    }
}
