//! Mirror loop: keeps the store in step with host change notifications.
//!
//! A single task owns every incremental write, so events are applied in the
//! order the host emitted them. Events that arrive while no store is open are
//! dropped; the next full reload covers them.
//!
//! Full reloads go through the loop too ([`MirrorReloader`]): pending events
//! are applied first, then the host snapshot replaces the store, and events
//! emitted after that wait for the reload to finish. A queued event is never
//! replayed on top of a snapshot that already contains it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::store_handle::StoreHandle;
use crate::services::tree_host::TreeHost;
use crate::types::errors::StoreError;
use crate::types::host::HostEvent;

/// Counters reported by the mirror loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    pub applied: u64,
    pub failed: u64,
    /// Events that arrived while no store was open.
    pub skipped: u64,
    /// Events applied while the reconciler's self-change flag was raised.
    pub self_caused: u64,
}

enum Control {
    Event(HostEvent),
    Flush(oneshot::Sender<MirrorStats>),
    Reload {
        host: Arc<dyn TreeHost>,
        reply: oneshot::Sender<Result<usize, StoreError>>,
    },
    Shutdown,
}

/// Handle to a running mirror loop.
pub struct MirrorHandle {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<MirrorStats>,
}

impl MirrorHandle {
    /// Queues an event directly. Returns false once the loop has stopped.
    pub fn send(&self, event: HostEvent) -> bool {
        self.control.send(Control::Event(event)).is_ok()
    }

    /// Waits until every event queued before this call has been applied.
    pub async fn flush(&self) -> Option<MirrorStats> {
        let (reply, rx) = oneshot::channel();
        self.control.send(Control::Flush(reply)).ok()?;
        rx.await.ok()
    }

    /// A cloneable handle that routes full reloads through the loop.
    pub fn reloader(&self) -> MirrorReloader {
        MirrorReloader {
            control: self.control.clone(),
        }
    }

    /// Drains pending events, stops the loop and returns its final counters.
    pub async fn shutdown(self) -> MirrorStats {
        let _ = self.control.send(Control::Shutdown);
        self.task.await.unwrap_or_default()
    }
}

/// Requests full reloads from a running mirror loop.
#[derive(Clone)]
pub struct MirrorReloader {
    control: mpsc::UnboundedSender<Control>,
}

impl MirrorReloader {
    /// Applies every pending event, then replaces the store with `host`'s tree.
    ///
    /// Returns `None` when the loop has stopped; the caller reloads directly.
    pub async fn reload(&self, host: Arc<dyn TreeHost>) -> Option<Result<usize, StoreError>> {
        let (reply, rx) = oneshot::channel();
        self.control.send(Control::Reload { host, reply }).ok()?;
        rx.await.ok()
    }
}

/// Replaces the store contents with a fresh snapshot of `host`.
pub async fn reload_from(host: &dyn TreeHost, store: &StoreHandle) -> Result<usize, StoreError> {
    let store = store.current()?;
    let nodes = host
        .get_tree()
        .await
        .map_err(|e| StoreError::Unavailable(format!("host snapshot failed: {}", e)))?;
    tokio::task::spawn_blocking(move || store.replace_all(&nodes))
        .await
        .map_err(|e| StoreError::Unavailable(format!("reload task failed: {}", e)))?
}

pub struct Mirror {
    store: Arc<StoreHandle>,
    self_change: Arc<AtomicBool>,
    stats: MirrorStats,
}

impl Mirror {
    /// Starts the loop on the current tokio runtime.
    pub fn spawn(
        store: Arc<StoreHandle>,
        events: mpsc::UnboundedReceiver<HostEvent>,
        self_change: Arc<AtomicBool>,
    ) -> MirrorHandle {
        let (control, control_rx) = mpsc::unbounded_channel();
        let mirror = Mirror {
            store,
            self_change,
            stats: MirrorStats::default(),
        };
        let task = tokio::spawn(mirror.run(events, control_rx));
        MirrorHandle { control, task }
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<HostEvent>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) -> MirrorStats {
        let mut host_open = true;
        loop {
            tokio::select! {
                biased;
                event = events.recv(), if host_open => match event {
                    Some(event) => self.apply(event).await,
                    None => host_open = false,
                },
                message = control.recv() => match message {
                    Some(Control::Event(event)) => self.apply(event).await,
                    Some(Control::Flush(reply)) => {
                        self.drain(&mut events).await;
                        let _ = reply.send(self.stats.clone());
                    }
                    Some(Control::Reload { host, reply }) => {
                        self.drain(&mut events).await;
                        let outcome = reload_from(host.as_ref(), &self.store).await;
                        debug!(ok = outcome.is_ok(), "store reloaded by mirror loop");
                        let _ = reply.send(outcome);
                    }
                    Some(Control::Shutdown) | None => {
                        self.drain(&mut events).await;
                        break;
                    }
                },
            }
        }
        debug!(?self.stats, "mirror loop stopped");
        self.stats
    }

    async fn drain(&mut self, events: &mut mpsc::UnboundedReceiver<HostEvent>) {
        while let Ok(event) = events.try_recv() {
            self.apply(event).await;
        }
    }

    async fn apply(&mut self, event: HostEvent) {
        let store = match self.store.current() {
            Ok(store) => store,
            Err(_) => {
                self.stats.skipped += 1;
                debug!(subject = event.subject_id(), "store not open, event skipped");
                return;
            }
        };
        let self_caused = self.self_change.load(Ordering::SeqCst);
        let subject = event.subject_id().to_string();

        let outcome = tokio::task::spawn_blocking(move || store.apply_event(&event)).await;
        match outcome {
            Ok(Ok(())) => {
                self.stats.applied += 1;
                if self_caused {
                    self.stats.self_caused += 1;
                }
                debug!(subject, self_caused, "host event mirrored");
            }
            Ok(Err(err)) => {
                self.stats.failed += 1;
                warn!(subject, self_caused, error = %err, "host event could not be mirrored");
            }
            Err(join) => {
                self.stats.failed += 1;
                warn!(subject, error = %join, "mirror task panicked");
            }
        }
    }
}
