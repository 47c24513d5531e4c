//! Reconciliation Executor.
//!
//! Replays diff operations against the tree host. Operations are expanded into
//! an execution plan whose order makes the host end up with the intended
//! parents and sibling order no matter how the operations were listed:
//!
//! 1. creates (parents before children), then cross-parent moves appended to their
//!    new parent (shallowest target first, so nothing is moved into its own
//!    subtree)
//! 2. deletes
//! 3. same-parent moves parked at the end of their parent
//! 4. every created or moved node placed at its final index, ascending per parent
//! 5. title/URL updates
//!
//! The usual delete, move, update, create dispatch order cannot place a node
//! next to a sibling created later in the same apply, and it deletes folders
//! before their surviving children are moved out. Running creates and
//! relocations first, then deletes, then placements fixes both.
//!
//! Progress is counted in operations: each one is reported once, after its
//! last step or its first failure, and the executor yields after every
//! `batch_size` reported operations. A failing step records its operation
//! once and skips the operation's remaining steps; everything else keeps
//! going. After the last step the store is reloaded from the host.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::proposal_tree::is_temp_id;
use super::tree_host::TreeHost;
use crate::managers::mirror::{self, MirrorReloader};
use crate::managers::store_handle::StoreHandle;
use crate::types::errors::StoreError;
use crate::types::host::{CreateRequest, Destination, NodeChanges};
use crate::types::node::Node;
use crate::types::operation::{ChangeField, Operation, OperationKind, OperationType};
use crate::types::settings::ReconcileSettings;

/// Reported once per operation, when its last step has run or it has failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyProgress {
    pub current: usize,
    pub total: usize,
    pub description: String,
}

/// An operation the host refused, with enough detail to retry it alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationFailure {
    pub operation: Operation,
    pub node_id: String,
    pub kind: OperationType,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub success: bool,
    pub errors: Vec<OperationFailure>,
    /// Temporary (or caller-chosen) ids of created nodes mapped to host ids.
    pub id_map: BTreeMap<String, String>,
    pub steps: usize,
    pub reloaded: bool,
    pub reload_error: Option<String>,
}

/// One host call of the execution plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Create {
        node_id: String,
        parent_id: String,
        title: String,
        url: Option<String>,
    },
    /// Move to the end of `parent_id`.
    Append { node_id: String, parent_id: String },
    Delete { node_id: String, subtree: bool },
    Place {
        node_id: String,
        parent_id: String,
        index: u32,
    },
    Update { node_id: String, changes: NodeChanges },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    /// Index into the operation list this step belongs to.
    pub operation: usize,
    pub action: StepAction,
}

/// Depth of every node in the tree the operations are heading for.
struct TargetDepths {
    parent_of: HashMap<String, String>,
}

impl TargetDepths {
    fn new(host_nodes: &[Node], operations: &[Operation]) -> Self {
        let mut parent_of: HashMap<String, String> = host_nodes
            .iter()
            .filter_map(|n| n.parent_id.clone().map(|p| (n.id.clone(), p)))
            .collect();
        for op in operations {
            match &op.kind {
                OperationKind::Create { node, parent_id, .. } => {
                    parent_of.insert(node.id.clone(), parent_id.clone());
                }
                OperationKind::Move { node_id, to, .. } => {
                    parent_of.insert(node_id.clone(), to.parent_id.clone());
                }
                OperationKind::Delete { .. } | OperationKind::Update { .. } => {}
            }
        }
        Self { parent_of }
    }

    fn depth(&self, id: &str) -> usize {
        let mut depth = 0;
        let mut cursor = id;
        while let Some(parent) = self.parent_of.get(cursor) {
            depth += 1;
            cursor = parent;
            if depth > self.parent_of.len() {
                break;
            }
        }
        depth
    }
}

/// How many created folders lie above each created node at creation time.
/// Creating in that order guarantees every parent exists first.
fn creation_depths(operations: &[Operation]) -> HashMap<&str, usize> {
    let created_in: HashMap<&str, &str> = operations
        .iter()
        .filter_map(|op| match &op.kind {
            OperationKind::Create { node, parent_id, .. } => Some((node.id.as_str(), parent_id.as_str())),
            _ => None,
        })
        .collect();
    created_in
        .keys()
        .map(|id| {
            let mut depth = 0;
            let mut cursor = *id;
            while let Some(parent) = created_in.get(cursor) {
                depth += 1;
                cursor = parent;
                if depth > created_in.len() {
                    break;
                }
            }
            (*id, depth)
        })
        .collect()
}

/// Expands operations into ordered host calls.
///
/// `host_nodes` is the host's current tree; it only supplies depths for
/// parents the operations do not mention and may be empty.
pub fn plan(operations: &[Operation], host_nodes: &[Node]) -> Vec<PlannedStep> {
    let depths = TargetDepths::new(host_nodes, operations);
    let creation = creation_depths(operations);

    let mut creates = Vec::new();
    let mut relocations = Vec::new();
    let mut deletes = Vec::new();
    let mut parks = Vec::new();
    let mut updates = Vec::new();
    // node id -> (operation, parent, index); moves override creates
    let mut finals: HashMap<&str, (usize, &str, u32)> = HashMap::new();
    let mut final_order: Vec<&str> = Vec::new();

    for (i, op) in operations.iter().enumerate() {
        match &op.kind {
            OperationKind::Create { node, parent_id, index } => {
                creates.push((creation.get(node.id.as_str()).copied().unwrap_or(0), PlannedStep {
                    operation: i,
                    action: StepAction::Create {
                        node_id: node.id.clone(),
                        parent_id: parent_id.clone(),
                        title: node.title.clone(),
                        url: node.url.clone(),
                    },
                }));
                if finals.insert(node.id.as_str(), (i, parent_id.as_str(), *index)).is_none() {
                    final_order.push(node.id.as_str());
                }
            }
            OperationKind::Move { node_id, from, to } => {
                let step = PlannedStep {
                    operation: i,
                    action: StepAction::Append {
                        node_id: node_id.clone(),
                        parent_id: to.parent_id.clone(),
                    },
                };
                if from.parent_id == to.parent_id {
                    parks.push(step);
                } else {
                    relocations.push((depths.depth(&to.parent_id), step));
                }
                if finals.insert(node_id.as_str(), (i, to.parent_id.as_str(), to.index)).is_none() {
                    final_order.push(node_id.as_str());
                }
            }
            OperationKind::Delete { node, .. } => deletes.push(PlannedStep {
                operation: i,
                action: StepAction::Delete {
                    node_id: node.id.clone(),
                    subtree: node.is_folder(),
                },
            }),
            OperationKind::Update { node_id, changes } => {
                let mut node_changes = NodeChanges::default();
                for change in changes {
                    match change.field {
                        ChangeField::Title => node_changes.title = change.new_value.clone(),
                        ChangeField::Url => node_changes.url = change.new_value.clone(),
                    }
                }
                updates.push(PlannedStep {
                    operation: i,
                    action: StepAction::Update {
                        node_id: node_id.clone(),
                        changes: node_changes,
                    },
                });
            }
        }
    }

    creates.sort_by_key(|(depth, _)| *depth);
    relocations.sort_by_key(|(depth, _)| *depth);

    let mut places: Vec<(usize, &str, u32, PlannedStep)> = final_order
        .iter()
        .filter_map(|id| finals.get(id).map(|f| (id, *f)))
        .map(|(id, (op, parent, index))| {
            (
                depths.depth(parent),
                parent,
                index,
                PlannedStep {
                    operation: op,
                    action: StepAction::Place {
                        node_id: id.to_string(),
                        parent_id: parent.to_string(),
                        index,
                    },
                },
            )
        })
        .collect();
    places.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)).then_with(|| a.2.cmp(&b.2)));

    creates
        .into_iter()
        .map(|(_, step)| step)
        .chain(relocations.into_iter().map(|(_, step)| step))
        .chain(deletes)
        .chain(parks)
        .chain(places.into_iter().map(|(_, _, _, step)| step))
        .chain(updates)
        .collect()
}

fn resolve(id: &str, id_map: &BTreeMap<String, String>) -> Result<String, String> {
    match id_map.get(id) {
        Some(real) => Ok(real.clone()),
        None if is_temp_id(id) => Err(format!("temporary id {} was never created on the host", id)),
        None => Ok(id.to_string()),
    }
}

pub struct Reconciler {
    host: Arc<dyn TreeHost>,
    store: Arc<StoreHandle>,
    settings: ReconcileSettings,
    self_change: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
    mirror: std::sync::Mutex<Option<MirrorReloader>>,
}

impl Reconciler {
    pub fn new(host: Arc<dyn TreeHost>, store: Arc<StoreHandle>, settings: ReconcileSettings) -> Self {
        Self {
            host,
            store,
            settings,
            self_change: Arc::new(AtomicBool::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
            mirror: std::sync::Mutex::new(None),
        }
    }

    /// Routes reloads through a running mirror loop so queued host events are
    /// applied before the snapshot replaces the store, never after it.
    pub fn attach_mirror(&self, reloader: MirrorReloader) {
        if let Ok(mut mirror) = self.mirror.lock() {
            *mirror = Some(reloader);
        }
    }

    pub fn detach_mirror(&self) {
        if let Ok(mut mirror) = self.mirror.lock() {
            mirror.take();
        }
    }

    /// Raised while an apply runs and for a short while after it.
    pub fn self_change_flag(&self) -> Arc<AtomicBool> {
        self.self_change.clone()
    }

    pub fn is_applying(&self) -> bool {
        self.self_change.load(Ordering::SeqCst)
    }

    pub fn host(&self) -> &Arc<dyn TreeHost> {
        &self.host
    }

    pub async fn apply(&self, operations: &[Operation]) -> ApplyReport {
        self.apply_with_progress(operations, |_| {}).await
    }

    pub async fn apply_with_progress<F>(&self, operations: &[Operation], mut on_progress: F) -> ApplyReport
    where
        F: FnMut(&ApplyProgress) + Send,
    {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.self_change.store(true, Ordering::SeqCst);

        let host_nodes = match self.host.get_tree().await {
            Ok(nodes) => nodes,
            Err(err) => {
                warn!(error = %err, "host snapshot unavailable, planning from operations only");
                Vec::new()
            }
        };
        let steps = plan(operations, &host_nodes);
        let total = operations.len();
        info!(operations = total, steps = steps.len(), "applying operations");

        let mut report = ApplyReport {
            steps: steps.len(),
            ..ApplyReport::default()
        };
        // Steps left per operation; an operation is reported once its last
        // step has run or one of its steps has failed.
        let mut remaining = vec![0usize; total];
        for step in &steps {
            remaining[step.operation] += 1;
        }
        let mut failed: HashSet<usize> = HashSet::new();
        let mut finished = 0;
        let batch_size = self.settings.batch_size.max(1);

        for step in &steps {
            if failed.contains(&step.operation) {
                continue;
            }
            let operation = &operations[step.operation];
            let outcome = self.run_step(&step.action, &mut report.id_map).await;
            remaining[step.operation] -= 1;
            if let Err(message) = outcome {
                warn!(node = operation.node_id(), kind = %operation.op_type(), %message, "operation failed");
                failed.insert(step.operation);
                report.errors.push(OperationFailure {
                    operation: operation.clone(),
                    node_id: operation.node_id().to_string(),
                    kind: operation.op_type(),
                    message,
                });
            } else if remaining[step.operation] > 0 {
                continue;
            }

            finished += 1;
            on_progress(&ApplyProgress {
                current: finished,
                total,
                description: operation.describe(),
            });
            if finished % batch_size == 0 && finished < total {
                tokio::task::yield_now().await;
            }
        }

        if !self.settings.settle_delay().is_zero() {
            tokio::time::sleep(self.settings.settle_delay()).await;
        }
        match self.reload().await {
            Ok(records) => {
                report.reloaded = true;
                debug!(records, "store reloaded after apply");
            }
            Err(err) => {
                warn!(error = %err, "reload after apply failed");
                report.reload_error = Some(err.to_string());
            }
        }

        report.success = report.errors.is_empty();
        self.release_self_change(epoch);
        info!(success = report.success, failed = report.errors.len(), "apply finished");
        report
    }

    async fn run_step(&self, action: &StepAction, id_map: &mut BTreeMap<String, String>) -> Result<(), String> {
        match action {
            StepAction::Create {
                node_id,
                parent_id,
                title,
                url,
            } => {
                let created = self
                    .host
                    .create(CreateRequest {
                        parent_id: resolve(parent_id, id_map)?,
                        title: title.clone(),
                        url: url.clone(),
                        index: None,
                    })
                    .await
                    .map_err(|e| e.to_string())?;
                id_map.insert(node_id.clone(), created.id);
            }
            StepAction::Append { node_id, parent_id } => {
                self.host
                    .move_node(
                        &resolve(node_id, id_map)?,
                        Destination {
                            parent_id: resolve(parent_id, id_map)?,
                            index: None,
                        },
                    )
                    .await
                    .map_err(|e| e.to_string())?;
            }
            StepAction::Delete { node_id, subtree } => {
                let id = resolve(node_id, id_map)?;
                let outcome = if *subtree {
                    self.host.remove_subtree(&id).await
                } else {
                    self.host.remove(&id).await
                };
                outcome.map_err(|e| e.to_string())?;
            }
            StepAction::Place {
                node_id,
                parent_id,
                index,
            } => {
                self.host
                    .move_node(
                        &resolve(node_id, id_map)?,
                        Destination {
                            parent_id: resolve(parent_id, id_map)?,
                            index: Some(*index),
                        },
                    )
                    .await
                    .map_err(|e| e.to_string())?;
            }
            StepAction::Update { node_id, changes } => {
                self.host
                    .update(&resolve(node_id, id_map)?, changes.clone())
                    .await
                    .map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }

    /// Lowers the self-change flag after the configured delay, unless another
    /// apply started meanwhile.
    fn release_self_change(&self, epoch: u64) {
        let delay = self.settings.self_change_clear();
        if delay.is_zero() {
            if self.epoch.load(Ordering::SeqCst) == epoch {
                self.self_change.store(false, Ordering::SeqCst);
            }
            return;
        }
        let flag = self.self_change.clone();
        let current = self.epoch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if current.load(Ordering::SeqCst) == epoch {
                flag.store(false, Ordering::SeqCst);
            }
        });
    }

    /// Replaces the store contents with a fresh host snapshot.
    pub async fn reload(&self) -> Result<usize, StoreError> {
        let reloader = self.mirror.lock().ok().and_then(|mirror| mirror.clone());
        if let Some(reloader) = reloader {
            if let Some(outcome) = reloader.reload(self.host.clone()).await {
                return outcome;
            }
            debug!("mirror loop stopped, reloading directly");
        }
        mirror::reload_from(self.host.as_ref(), &self.store).await
    }
}
