//! The authoritative tree host seam.
//!
//! The host owns the real bookmark tree; its API calls are the only way to
//! durably change it. The engine mirrors it, diffs against it and replays
//! operations through this trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::errors::HostError;
use crate::types::host::{CreateRequest, Destination, HostEvent, NodeChanges};
use crate::types::node::Node;

#[async_trait]
pub trait TreeHost: Send + Sync {
    /// Full snapshot, every node with its current parent and index.
    async fn get_tree(&self) -> Result<Vec<Node>, HostError>;

    async fn create(&self, request: CreateRequest) -> Result<Node, HostError>;

    async fn update(&self, id: &str, changes: NodeChanges) -> Result<Node, HostError>;

    /// Moves a node. `destination.index` is the node's final index among its
    /// new siblings.
    async fn move_node(&self, id: &str, destination: Destination) -> Result<Node, HostError>;

    /// Removes a bookmark or an empty folder.
    async fn remove(&self, id: &str) -> Result<(), HostError>;

    /// Removes a folder with everything below it.
    async fn remove_subtree(&self, id: &str) -> Result<(), HostError>;

    /// Registers for change notifications. Hosts without notifications return `None`.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<HostEvent>> {
        None
    }
}
