use serde::{Deserialize, Serialize};

use super::node::Node;

/// A change notification emitted by the tree host.
///
/// Each variant carries enough identity and position data for the store to
/// patch its mirror without a full reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Created {
        node: Node,
    },
    Removed {
        id: String,
        parent_id: String,
        index: u32,
    },
    Changed {
        id: String,
        title: String,
        url: Option<String>,
    },
    Moved {
        id: String,
        old_parent_id: String,
        old_index: u32,
        parent_id: String,
        index: u32,
    },
    ChildrenReordered {
        parent_id: String,
        child_ids: Vec<String>,
    },
}

impl HostEvent {
    /// The id of the node the event is about (the parent for reorders).
    pub fn subject_id(&self) -> &str {
        match self {
            HostEvent::Created { node } => &node.id,
            HostEvent::Removed { id, .. }
            | HostEvent::Changed { id, .. }
            | HostEvent::Moved { id, .. } => id,
            HostEvent::ChildrenReordered { parent_id, .. } => parent_id,
        }
    }
}

/// Arguments of a host `create` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub parent_id: String,
    pub title: String,
    pub url: Option<String>,
    /// Insert position; `None` appends.
    pub index: Option<u32>,
}

/// Arguments of a host `update` call. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChanges {
    pub title: Option<String>,
    pub url: Option<String>,
}

/// Arguments of a host `move` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub parent_id: String,
    /// Final position among the new siblings; `None` appends.
    pub index: Option<u32>,
}
