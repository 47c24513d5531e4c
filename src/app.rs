//! Engine core for Tidymarks.
//!
//! Central struct wiring the store handle, search engine, reconciler and the
//! host mirror together, managing their lifecycle.

use std::sync::Arc;

use tracing::{info, warn};

use crate::database::connection::DatabaseLocation;
use crate::managers::mirror::{Mirror, MirrorHandle, MirrorStats};
use crate::managers::store_handle::{InitReport, StoreHandle};
use crate::services::reconciler::{ApplyProgress, ApplyReport, Reconciler};
use crate::services::search_engine::{SearchEngine, SearchEngineTrait};
use crate::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use crate::services::tree_diff::{self, DiffOptions};
use crate::services::tree_host::TreeHost;
use crate::types::errors::{SearchError, StoreError, TreeError};
use crate::types::operation::{DiffResult, Operation};
use crate::types::search::{SearchOptions, SearchResult};

/// Central engine struct holding every component.
///
/// Components are built from the settings held by the settings engine at
/// construction time; later `set_value` calls take effect on the next `Engine`.
pub struct Engine {
    pub settings_engine: SettingsEngine,
    store: Arc<StoreHandle>,
    search: Arc<SearchEngine>,
    reconciler: Reconciler,
    host: Arc<dyn TreeHost>,
    mirror: Option<MirrorHandle>,
}

impl Engine {
    /// Creates the engine without touching storage. Call [`Engine::startup`] next.
    pub fn new(location: DatabaseLocation, settings_engine: SettingsEngine, host: Arc<dyn TreeHost>) -> Self {
        let settings = settings_engine.get_settings().clone();
        let store = Arc::new(StoreHandle::new(location, settings.storage.clone()));
        let search = Arc::new(SearchEngine::new(store.clone(), settings.search.clone()));
        let reconciler = Reconciler::new(host.clone(), store.clone(), settings.reconcile.clone());
        Self {
            settings_engine,
            store,
            search,
            reconciler,
            host,
            mirror: None,
        }
    }

    /// Startup sequence: open the store, load it from the host, start mirroring.
    ///
    /// A failed initial load leaves the store open but empty; the error is
    /// logged and a later `reload` can fill it.
    pub async fn startup(&mut self) -> Result<InitReport, StoreError> {
        self.store.initialize().await?;
        let report = self.store.last_init().unwrap_or(InitReport {
            recovered: false,
            schema_version: 0,
            elapsed_ms: 0,
        });

        match self.reconciler.reload().await {
            Ok(records) => info!(records, recovered = report.recovered, "engine started"),
            Err(err) => warn!(error = %err, "initial load from host failed"),
        }

        if self.mirror.is_none() {
            if let Some(events) = self.host.subscribe() {
                let mirror = Mirror::spawn(self.store.clone(), events, self.reconciler.self_change_flag());
                self.reconciler.attach_mirror(mirror.reloader());
                self.mirror = Some(mirror);
            }
        }
        Ok(report)
    }

    /// Shutdown sequence: stop the mirror, then close the store.
    pub async fn shutdown(&mut self) -> Option<MirrorStats> {
        self.reconciler.detach_mirror();
        let stats = match self.mirror.take() {
            Some(mirror) => Some(mirror.shutdown().await),
            None => None,
        };
        self.store.close().await;
        info!("engine stopped");
        stats
    }

    pub fn store(&self) -> &Arc<StoreHandle> {
        &self.store
    }

    pub fn search_engine(&self) -> &Arc<SearchEngine> {
        &self.search
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn host(&self) -> &Arc<dyn TreeHost> {
        &self.host
    }

    /// Waits until every host event received so far has reached the store.
    pub async fn flush_mirror(&self) -> Option<MirrorStats> {
        match &self.mirror {
            Some(mirror) => mirror.flush().await,
            None => None,
        }
    }

    /// Runs a search off the async threads and records it in the search history.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchResult>, SearchError> {
        let engine = self.search.clone();
        let owned = query.to_string();
        let results = tokio::task::spawn_blocking(move || engine.search(&owned, &options))
            .await
            .map_err(|e| SearchError::Store(StoreError::Unavailable(format!("search task failed: {}", e))))??;

        if let Ok(store) = self.store.current() {
            if let Err(err) = store.record_search(query.trim(), results.len()) {
                warn!(error = %err, "failed to record search history");
            }
        }
        Ok(results)
    }

    /// Diffs the host's current tree against a proposed one.
    pub async fn diff_against_host(&self, proposed: &[crate::types::node::Node]) -> Result<DiffResult, TreeError> {
        let current = self
            .host
            .get_tree()
            .await
            .map_err(|e| TreeError::InvalidEdit(format!("host snapshot failed: {}", e)))?;
        tree_diff::diff_nodes(&current, proposed, DiffOptions::default())
    }

    pub async fn apply(&self, operations: &[Operation]) -> ApplyReport {
        self.reconciler.apply(operations).await
    }

    pub async fn apply_with_progress<F>(&self, operations: &[Operation], on_progress: F) -> ApplyReport
    where
        F: FnMut(&ApplyProgress) + Send,
    {
        self.reconciler.apply_with_progress(operations, on_progress).await
    }

    /// Replaces the store contents with the host's current tree.
    pub async fn reload(&self) -> Result<usize, StoreError> {
        let records = self.reconciler.reload().await?;
        self.search.clear_cache();
        Ok(records)
    }
}
