use std::time::Duration;

use rusqlite::ErrorCode;
use thiserror::Error;

// === StoreError ===

/// Errors raised by the persistent store and its lifecycle handle.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store has not been initialized (or was closed).
    #[error("Storage is not initialized: call initialize() first")]
    Uninitialized,
    /// The store cannot be used; no automatic repair applies.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    /// The database was corrupted and the destroy-and-recreate repair also failed.
    #[error("Storage was corrupted and automatic repair failed: {0}")]
    RepairFailed(String),
    /// A schema upgrade could not take the write lock.
    #[error("Schema upgrade blocked by another connection ({0}); close other consumers and retry")]
    MigrationBlocked(String),
    /// Opening the store did not finish in time, even after recovery.
    #[error("Storage initialization timed out after {0:?}")]
    Timeout(Duration),
    /// A batch kept failing after every retry.
    #[error("Batch write failed after {attempts} attempts: {message}")]
    TransientWrite { attempts: u32, message: String },
    /// Caller supplied something the store cannot accept.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Record with the given ID was not found.
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the underlying SQLite error carries the corruption signature.
    pub fn is_corruption(&self) -> bool {
        match self {
            StoreError::Database(err) => is_corruption_error(err),
            _ => false,
        }
    }

    /// True for errors a batch retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_)) && !self.is_corruption()
    }

    /// A message telling the user what to do next.
    pub fn user_message(&self) -> String {
        match self {
            StoreError::Uninitialized => {
                "The bookmark database is not open yet. Retry in a moment.".to_string()
            }
            StoreError::RepairFailed(_) => {
                "The bookmark database was damaged. An automatic repair was attempted and failed; \
                 restart the application or remove the database file."
                    .to_string()
            }
            StoreError::MigrationBlocked(_) => {
                "The bookmark database is being upgraded but another window holds it open. \
                 Close other consumers and retry."
                    .to_string()
            }
            StoreError::Timeout(_) => {
                "Opening the bookmark database took too long. Retry.".to_string()
            }
            other => format!("Bookmark storage error: {}. Retry.", other),
        }
    }
}

/// Matches the SQLite codes that mean the file itself is damaged.
pub fn is_corruption_error(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase)
    )
}

/// Matches the SQLite codes that mean another connection holds a lock.
pub fn is_lock_error(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

// === SearchError ===

/// Errors related to search queries.
#[derive(Debug, Error)]
pub enum SearchError {
    /// No store is available to search.
    #[error("Search unavailable: storage is not initialized")]
    Uninitialized,
    /// The query or its options are malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SearchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Uninitialized => SearchError::Uninitialized,
            other => SearchError::Store(other),
        }
    }
}

// === TreeError ===

/// Errors related to in-memory tree snapshots and proposal edits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Not a folder: {0}")]
    NotAFolder(String),
    #[error("Invalid move: {0}")]
    InvalidMove(String),
    #[error("Invalid edit: {0}")]
    InvalidEdit(String),
    #[error("Root folders cannot be changed: {0}")]
    RootNode(String),
    #[error("Duplicate node id: {0}")]
    DuplicateId(String),
    #[error("Node {id} references missing parent {parent_id}")]
    OrphanNode { id: String, parent_id: String },
}

// === HostError ===

/// Errors returned by the authoritative tree host.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// The id does not exist on the host (stale or never created).
    #[error("Host node not found: {0}")]
    NotFound(String),
    /// The host refused the change.
    #[error("Host rejected the request: {0}")]
    Rejected(String),
    /// The host could not be reached.
    #[error("Host unavailable: {0}")]
    Unavailable(String),
}

// === SettingsError ===

/// Errors related to settings management.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read or write the settings file.
    #[error("Settings I/O error: {0}")]
    IoError(String),
    /// Failed to serialize or deserialize settings.
    #[error("Settings serialization error: {0}")]
    SerializationError(String),
    /// The requested settings key does not exist.
    #[error("Invalid settings key: {0}")]
    InvalidKey(String),
    /// The provided value is invalid for the given key.
    #[error("Invalid settings value: {0}")]
    InvalidValue(String),
}
