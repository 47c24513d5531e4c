//! SQLite database connection management for Tidymarks.
//!
//! Provides the [`Database`] struct that wraps a `rusqlite::Connection`,
//! automatically runs schema migrations on open, and knows how to destroy
//! and recreate a damaged database file.

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::migrations;
use crate::types::errors::{is_lock_error, StoreError};

/// Where a database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    /// A private in-memory database; every open starts empty.
    Memory,
}

/// Core database wrapper providing SQLite connection management.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    location: DatabaseLocation,
    schema_version: i32,
}

impl Database {
    /// Opens (or creates) a SQLite database at the given file path and runs migrations.
    ///
    /// # Errors
    /// Returns `StoreError` if the connection cannot be established or migrations fail.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_location(
            &DatabaseLocation::File(path.as_ref().to_path_buf()),
            Duration::from_secs(2),
        )
    }

    /// Opens an in-memory SQLite database and runs migrations.
    ///
    /// Useful for testing. The database is discarded when the `Database` is dropped.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open_location(&DatabaseLocation::Memory, Duration::from_secs(2))
    }

    /// Opens the database at `location`, waiting up to `busy_timeout` for locks.
    pub fn open_location(location: &DatabaseLocation, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = match location {
            DatabaseLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent).map_err(|e| {
                            StoreError::Unavailable(format!(
                                "cannot create database directory {}: {}",
                                parent.display(),
                                e
                            ))
                        })?;
                    }
                }
                Connection::open(path)?
            }
            DatabaseLocation::Memory => Connection::open_in_memory()?,
        };
        conn.busy_timeout(busy_timeout).map_err(open_error)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .map_err(open_error)?;

        let mut db = Self {
            conn,
            location: location.clone(),
            schema_version: 0,
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Opens the database, destroying and recreating it once if it is corrupted.
    ///
    /// Returns the database and whether the repair path was taken.
    ///
    /// # Errors
    /// `StoreError::RepairFailed` when the recreated database cannot be opened either.
    pub fn open_with_recovery(location: &DatabaseLocation, busy_timeout: Duration) -> Result<(Self, bool), StoreError> {
        match Self::open_location(location, busy_timeout) {
            Ok(db) => Ok((db, false)),
            Err(err) if err.is_corruption() => {
                warn!(error = %err, ?location, "database corrupted, recreating");
                let db = Self::recreate(location, busy_timeout)?;
                Ok((db, true))
            }
            Err(err) => Err(err),
        }
    }

    /// Destroys whatever is at `location` and opens a fresh database there.
    pub fn recreate(location: &DatabaseLocation, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let DatabaseLocation::File(path) = location {
            Self::destroy(path).map_err(|e| StoreError::RepairFailed(e.to_string()))?;
        }
        let db = Self::open_location(location, busy_timeout)
            .map_err(|e| StoreError::RepairFailed(e.to_string()))?;
        info!(?location, "database recreated");
        Ok(db)
    }

    /// Removes a database file together with its WAL and shared-memory siblings.
    pub fn destroy(path: &Path) -> std::io::Result<()> {
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut name = path.as_os_str().to_owned();
            name.push(suffix);
            match fs::remove_file(PathBuf::from(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Runs all schema migrations.
    fn run_migrations(&mut self) -> Result<(), StoreError> {
        match migrations::run_all(&self.conn) {
            Ok(_) => {
                self.schema_version = migrations::get_schema_version(&self.conn);
                Ok(())
            }
            Err(err) => Err(open_error(err)),
        }
    }

    /// Returns a reference to the underlying `rusqlite::Connection`.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access, needed to open transactions.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    /// Schema version recorded after the last migration run.
    pub fn schema_version(&self) -> i32 {
        self.schema_version
    }
}

/// Classifies a failure of an open-time statement. Another connection holding
/// the file means the schema cannot be checked or upgraded.
fn open_error(err: rusqlite::Error) -> StoreError {
    if is_lock_error(&err) {
        StoreError::MigrationBlocked(err.to_string())
    } else {
        StoreError::Database(err)
    }
}
