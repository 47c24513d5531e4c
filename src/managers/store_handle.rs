//! Store lifecycle for Tidymarks.
//!
//! `StoreHandle` owns the single open [`BookmarkStore`]. Concurrent callers of
//! [`StoreHandle::initialize`] share one open attempt; the attempt is bounded
//! by a timeout and falls back to a single destroy-and-recreate when the file
//! is corrupted or the open hangs. A file locked by another consumer is never
//! recreated: the lock wait is shorter than the timeout, so the open fails
//! with `MigrationBlocked` first.

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::bookmark_store::BookmarkStore;
use crate::database::connection::{Database, DatabaseLocation};
use crate::types::errors::StoreError;
use crate::types::settings::StorageSettings;

/// What happened during the last successful initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    /// True when the database was destroyed and recreated.
    pub recovered: bool,
    pub schema_version: i32,
    pub elapsed_ms: u64,
}

/// Injectable owner of the open store.
pub struct StoreHandle {
    location: DatabaseLocation,
    settings: StorageSettings,
    current: RwLock<Option<Arc<BookmarkStore>>>,
    init_gate: tokio::sync::Mutex<()>,
    last_init: Mutex<Option<InitReport>>,
}

impl StoreHandle {
    pub fn new(location: DatabaseLocation, settings: StorageSettings) -> Self {
        Self {
            location,
            settings,
            current: RwLock::new(None),
            init_gate: tokio::sync::Mutex::new(()),
            last_init: Mutex::new(None),
        }
    }

    /// A handle over a private in-memory database.
    pub fn in_memory(settings: StorageSettings) -> Self {
        Self::new(DatabaseLocation::Memory, settings)
    }

    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    /// The open store.
    ///
    /// # Errors
    /// `StoreError::Uninitialized` before `initialize()` succeeds or after `close()`.
    pub fn current(&self) -> Result<Arc<BookmarkStore>, StoreError> {
        let guard = self
            .current
            .read()
            .map_err(|_| StoreError::Unavailable("store handle lock poisoned".to_string()))?;
        guard.clone().ok_or(StoreError::Uninitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_ok()
    }

    pub fn last_init(&self) -> Option<InitReport> {
        self.last_init.lock().ok().and_then(|report| report.clone())
    }

    /// Opens the store, or returns the one already open.
    ///
    /// Callers that arrive while an attempt is running wait for it and receive
    /// its store. A failed attempt leaves the handle uninitialized so a later
    /// call can try again.
    pub async fn initialize(&self) -> Result<Arc<BookmarkStore>, StoreError> {
        let _gate = self.init_gate.lock().await;
        if let Ok(store) = self.current() {
            return Ok(store);
        }

        let started = Instant::now();
        let timeout = self.settings.init_timeout();
        let (db, recovered) = match self.open(false, timeout).await {
            Ok(opened) => opened,
            Err(StoreError::Timeout(_)) => {
                warn!(?timeout, location = ?self.location, "store open timed out, recreating");
                let db = self.open(true, timeout).await.map_err(|e| match e {
                    StoreError::Timeout(_) => StoreError::Timeout(timeout),
                    other => StoreError::RepairFailed(other.to_string()),
                })?;
                (db.0, true)
            }
            Err(err) => {
                error!(error = %err, location = ?self.location, "store initialization failed");
                return Err(err);
            }
        };

        let report = InitReport {
            recovered,
            schema_version: db.schema_version(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        let store = Arc::new(BookmarkStore::new(db, self.settings.clone()));
        {
            let mut current = self
                .current
                .write()
                .map_err(|_| StoreError::Unavailable("store handle lock poisoned".to_string()))?;
            *current = Some(store.clone());
        }
        if let Ok(mut last) = self.last_init.lock() {
            *last = Some(report.clone());
        }
        info!(
            recovered = report.recovered,
            schema_version = report.schema_version,
            elapsed_ms = report.elapsed_ms,
            "store initialized"
        );
        Ok(store)
    }

    /// Runs one blocking open on the blocking pool, bounded by `timeout`.
    ///
    /// A timed-out open keeps running on its blocking thread; its result is dropped.
    async fn open(&self, recreate: bool, timeout: Duration) -> Result<(Database, bool), StoreError> {
        let location = self.location.clone();
        let busy_timeout = self.settings.open_busy_timeout();
        let task = tokio::task::spawn_blocking(move || {
            if recreate {
                Database::recreate(&location, busy_timeout).map(|db| (db, true))
            } else {
                Database::open_with_recovery(&location, busy_timeout)
            }
        });
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StoreError::Unavailable(format!("open task failed: {}", join))),
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }

    /// Drops the handle's reference to the store. Outstanding `Arc`s stay usable
    /// until they are dropped; new `current()` calls fail with `Uninitialized`.
    pub async fn close(&self) {
        let _gate = self.init_gate.lock().await;
        if let Ok(mut current) = self.current.write() {
            if current.take().is_some() {
                info!(location = ?self.location, "store closed");
            }
        }
    }
}
