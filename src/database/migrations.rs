//! Schema migrations for the Tidymarks SQLite database.
//!
//! Every revision declares the tables and indexes it owns. A revision runs
//! when any of those objects is missing, whatever the `schema_version` table
//! claims, and is recorded there once. All DDL uses `IF NOT EXISTS`, so a
//! revision that is re-run over a partially migrated file only fills the gaps.

use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

/// Current schema version. Bump this when adding a new migration.
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Name of the composite `(parent_id, position)` index used for ordered child listings.
pub const CHILDREN_INDEX: &str = "idx_bookmarks_parent_position";

/// One schema revision.
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub tables: &'static [&'static str],
    pub indexes: &'static [&'static str],
    apply: fn(&Connection) -> Result<(), rusqlite::Error>,
}

impl Migration {
    /// True when every table and index this revision creates already exists.
    pub fn is_present(&self, conn: &Connection) -> Result<bool, rusqlite::Error> {
        for table in self.tables {
            if !table_exists(conn, table)? {
                return Ok(false);
            }
        }
        for index in self.indexes {
            if !index_exists(conn, index)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// All revisions, oldest first.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Core collections: bookmarks, global_stats, settings",
        tables: &["bookmarks", "global_stats", "settings"],
        indexes: &[
            "idx_bookmarks_parent",
            "idx_bookmarks_title_lower",
            "idx_bookmarks_url_lower",
            "idx_bookmarks_domain",
        ],
        apply: migration_v1,
    },
    Migration {
        version: 2,
        description: "Composite (parent_id, position) index for ordered children",
        tables: &[],
        indexes: &[CHILDREN_INDEX],
        apply: migration_v2,
    },
    Migration {
        version: 3,
        description: "search_history, favicon_cache, crawl_metadata, keyword index",
        tables: &["search_history", "favicon_cache", "crawl_metadata", "bookmark_keywords"],
        indexes: &["idx_search_history_timestamp", "idx_bookmark_keywords_bookmark"],
        apply: migration_v3,
    },
];

/// Every table a fully migrated database is expected to contain.
pub fn expected_tables() -> Vec<&'static str> {
    let mut tables = vec!["schema_version"];
    tables.extend(MIGRATIONS.iter().flat_map(|m| m.tables.iter().copied()));
    tables
}

/// Every named index a fully migrated database is expected to contain.
pub fn expected_indexes() -> Vec<&'static str> {
    MIGRATIONS
        .iter()
        .flat_map(|m| m.indexes.iter().copied())
        .collect()
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )
}

pub fn index_exists(conn: &Connection, name: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'index' AND name = ?1",
        params![name],
        |row| row.get(0),
    )
}

/// Returns the highest recorded schema version (0 if nothing is recorded).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Runs all pending schema migrations against the provided connection.
///
/// Returns the versions that were applied or re-applied. Pending work runs in
/// one `IMMEDIATE` transaction, so another writer holding the database makes
/// this fail with a busy/locked error instead of interleaving DDL.
///
/// # Errors
/// Returns `rusqlite::Error` if any SQL statement fails.
pub fn run_all(conn: &Connection) -> Result<Vec<i32>, rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY,
             applied_at INTEGER NOT NULL,
             description TEXT NOT NULL
         );",
    )?;

    let recorded = get_schema_version(conn);
    let mut pending = Vec::new();
    for migration in MIGRATIONS {
        let present = migration.is_present(conn)?;
        if !present || recorded < migration.version {
            pending.push((migration, present));
        }
    }
    if pending.is_empty() {
        return Ok(Vec::new());
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut applied = Vec::new();
    for (migration, present) in pending {
        if !present {
            (migration.apply)(&tx)?;
            debug!(version = migration.version, "applied schema revision");
        }
        record_version(&tx, migration.version, migration.description)?;
        applied.push(migration.version);
    }
    tx.commit()?;

    info!(?applied, "schema migrated to version {}", CURRENT_SCHEMA_VERSION);
    Ok(applied)
}

fn record_version(conn: &Connection, version: i32, description: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
        params![version, chrono::Utc::now().timestamp_millis(), description],
    )?;
    Ok(())
}

/// V1: bookmarks with its single-column indexes, global stats and settings.
fn migration_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS bookmarks (
            id TEXT PRIMARY KEY,
            parent_id TEXT,
            position INTEGER NOT NULL DEFAULT 0,
            title TEXT NOT NULL,
            url TEXT,
            date_added INTEGER NOT NULL,
            date_modified INTEGER,
            title_lower TEXT NOT NULL,
            url_lower TEXT,
            domain TEXT,
            keywords TEXT NOT NULL DEFAULT '[]',
            tags TEXT NOT NULL DEFAULT '[]',
            path TEXT,
            children_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_bookmarks_parent ON bookmarks(parent_id);
        CREATE INDEX IF NOT EXISTS idx_bookmarks_title_lower ON bookmarks(title_lower);
        CREATE INDEX IF NOT EXISTS idx_bookmarks_url_lower ON bookmarks(url_lower);
        CREATE INDEX IF NOT EXISTS idx_bookmarks_domain ON bookmarks(domain);

        CREATE TABLE IF NOT EXISTS global_stats (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        ",
    )
}

/// V2: ordered children listing without an in-memory sort.
fn migration_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_bookmarks_parent_position ON bookmarks(parent_id, position);",
    )
}

/// V3: side collections and the inverted keyword index.
fn migration_v3(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS search_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            query TEXT NOT NULL,
            result_count INTEGER NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_search_history_timestamp ON search_history(timestamp);

        CREATE TABLE IF NOT EXISTS favicon_cache (
            domain TEXT PRIMARY KEY,
            data BLOB NOT NULL,
            mime_type TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS crawl_metadata (
            bookmark_id TEXT PRIMARY KEY,
            title TEXT,
            description TEXT,
            keywords TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'success',
            crawled_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bookmark_keywords (
            keyword TEXT NOT NULL,
            bookmark_id TEXT NOT NULL,
            PRIMARY KEY (keyword, bookmark_id)
        ) WITHOUT ROWID;

        CREATE INDEX IF NOT EXISTS idx_bookmark_keywords_bookmark ON bookmark_keywords(bookmark_id);
        ",
    )
}
