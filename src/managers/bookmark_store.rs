//! Bookmark Store for Tidymarks.
//!
//! The persistent mirror of the host's bookmark tree: batched writes with
//! per-batch retry, ordered child listings over the `(parent_id, position)`
//! index, prefix lookups over the title/URL/domain/keyword indexes, targeted
//! patches from host change events, and the side collections (settings,
//! search history, favicon cache, crawl metadata).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::database::connection::Database;
use crate::database::health::{self, HealthReport};
use crate::database::migrations;
use crate::platform;
use crate::types::errors::StoreError;
use crate::types::host::HostEvent;
use crate::types::node::{BookmarkRecord, Node};
use crate::types::search::{CrawlMetadata, CrawlStatus, FaviconEntry, SearchHistoryEntry};
use crate::types::settings::StorageSettings;

/// Appended to a prefix to form the exclusive upper bound of a range scan.
pub const MAX_SUFFIX: char = '\u{10FFFF}';

/// Rough in-memory footprint of one record while a batch is being written.
const ESTIMATED_RECORD_BYTES: u64 = 2 * 1024;
const MIN_BATCH_SIZE: usize = 50;
const MAX_BATCH_SIZE: usize = 1_000;
const FALLBACK_MEMORY_BUDGET: u64 = 256 * 1024 * 1024;

const COLUMNS: &str = "id, parent_id, position, title, url, date_added, date_modified, \
                       title_lower, url_lower, domain, keywords, tags, path, children_count";

/// Picks a batch size from the number of records and the memory available.
///
/// Very large inputs get smaller batches so a single transaction never holds
/// the writer for long.
pub fn choose_batch_size(total: usize, available_memory: Option<u64>) -> usize {
    let by_count = if total < 10_000 {
        MAX_BATCH_SIZE
    } else if total < 50_000 {
        500
    } else {
        250
    };
    let memory = available_memory.unwrap_or(FALLBACK_MEMORY_BUDGET);
    let by_memory = (memory / 8 / ESTIMATED_RECORD_BYTES).min(MAX_BATCH_SIZE as u64) as usize;
    by_count.min(by_memory).clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

/// A page of an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { offset: 0, limit: 100 }
    }
}

/// Secondary indexes usable for prefix range lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexField {
    Title,
    Url,
    Domain,
}

impl IndexField {
    fn column(&self) -> &'static str {
        match self {
            IndexField::Title => "title_lower",
            IndexField::Url => "url_lower",
            IndexField::Domain => "domain",
        }
    }
}

/// Progress after each batch of a batched write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    pub batch_index: usize,
    pub batches: usize,
    pub processed: usize,
    pub total: usize,
    pub failed_batches: usize,
}

/// A batch that could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub ids: Vec<String>,
    pub attempts: u32,
    pub message: String,
}

/// Outcome of a batched write. Failed batches do not affect the others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub written: usize,
    pub batch_size: usize,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Converts a report with failures into `StoreError::TransientWrite`.
    pub fn into_result(self) -> Result<Self, StoreError> {
        match self.failed.first() {
            None => Ok(self),
            Some(first) => Err(StoreError::TransientWrite {
                attempts: first.attempts,
                message: format!(
                    "{} of {} batches failed: {}",
                    self.failed.len(),
                    self.total.div_ceil(self.batch_size.max(1)),
                    first.message
                ),
            }),
        }
    }
}

/// Options for a batched write.
#[derive(Default)]
pub struct BatchOptions<'a> {
    pub batch_size: Option<usize>,
    pub on_progress: Option<&'a mut dyn FnMut(&BatchProgress)>,
}

/// Counters kept in the `global_stats` collection plus live counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub bookmarks: usize,
    pub folders: usize,
    pub last_full_reload: Option<i64>,
    pub full_reloads: i64,
}

/// Bookmark store backed by a SQLite database.
#[derive(Debug)]
pub struct BookmarkStore {
    db: Mutex<Database>,
    settings: StorageSettings,
    generation: AtomicU64,
}

impl BookmarkStore {
    /// Creates a store over an already migrated database.
    pub fn new(db: Database, settings: StorageSettings) -> Self {
        Self {
            db: Mutex::new(db),
            settings,
            generation: AtomicU64::new(0),
        }
    }

    /// Opens a private in-memory store with default settings.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?, StorageSettings::default()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>, StoreError> {
        self.db
            .lock()
            .map_err(|_| StoreError::Unavailable("database lock poisoned".to_string()))
    }

    /// Runs `f` against the raw connection.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let db = self.lock()?;
        Ok(f(db.connection())?)
    }

    /// Incremented by every committed write; lets readers detect staleness.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    pub fn schema_version(&self) -> Result<i32, StoreError> {
        Ok(self.lock()?.schema_version())
    }

    /// Reports missing or unexpected collections and indexes. Never fails.
    pub fn check_health(&self) -> HealthReport {
        match self.lock() {
            Ok(db) => health::check_health(db.connection()),
            Err(e) => HealthReport {
                healthy: false,
                error: Some(e.to_string()),
                ..HealthReport::default()
            },
        }
    }

    // ─── Batched writes ───

    /// Inserts (or replaces) records in sequential batches, one transaction each.
    pub fn insert_batch(
        &self,
        records: &[BookmarkRecord],
        options: BatchOptions<'_>,
    ) -> Result<BatchReport, StoreError> {
        self.run_batches(records, |r| r.id.clone(), options, |conn, batch| {
            for record in batch {
                write_record(conn, record)?;
            }
            let touched = batch
                .iter()
                .flat_map(|r| std::iter::once(r.id.as_str()).chain(r.parent_id.as_deref()));
            refresh_children_counts(conn, touched)?;
            Ok(())
        })
    }

    /// Updates existing records in batches. A missing id fails its whole batch.
    pub fn update_batch(
        &self,
        records: &[BookmarkRecord],
        options: BatchOptions<'_>,
    ) -> Result<BatchReport, StoreError> {
        self.run_batches(records, |r| r.id.clone(), options, |conn, batch| {
            let mut touched: Vec<String> = Vec::new();
            for record in batch {
                let previous_parent = existing_parent(conn, &record.id)?
                    .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
                write_record(conn, record)?;
                invalidate_subtree_paths(conn, &record.id)?;
                touched.extend(previous_parent);
                touched.extend(record.parent_id.clone());
            }
            refresh_children_counts(conn, touched.iter().map(String::as_str))?;
            Ok(())
        })
    }

    /// Deletes records (and their descendants) in batches.
    pub fn delete_batch(&self, ids: &[String], options: BatchOptions<'_>) -> Result<BatchReport, StoreError> {
        self.run_batches(ids, |id| id.clone(), options, |conn, batch| {
            let mut parents = Vec::new();
            for id in batch {
                if let Some(parent) = existing_parent(conn, id)? {
                    parents.extend(parent);
                }
                delete_subtree(conn, id)?;
            }
            refresh_children_counts(conn, parents.iter().map(String::as_str))?;
            Ok(())
        })
    }

    /// Updates a single record.
    ///
    /// # Errors
    /// `StoreError::NotFound` when no record has the record's id.
    pub fn update(&self, record: &BookmarkRecord) -> Result<(), StoreError> {
        self.update_batch(std::slice::from_ref(record), BatchOptions::default())?
            .into_result()
            .map(|_| ())
            .map_err(|e| match existing_id(self, &record.id) {
                Ok(false) => StoreError::NotFound(record.id.clone()),
                _ => e,
            })
    }

    /// Deletes a single record and its descendants.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        if !existing_id(self, id)? {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.delete_batch(&[id.to_string()], BatchOptions::default())?
            .into_result()
            .map(|_| ())
    }

    /// Shared batching loop: sequential batches, each retried on retryable errors.
    fn run_batches<T>(
        &self,
        items: &[T],
        id_of: impl Fn(&T) -> String,
        options: BatchOptions<'_>,
        write: impl Fn(&Connection, &[T]) -> Result<(), StoreError>,
    ) -> Result<BatchReport, StoreError> {
        let BatchOptions {
            batch_size,
            mut on_progress,
        } = options;
        let batch_size = batch_size
            .or(self.settings.batch_size)
            .unwrap_or_else(|| {
                let memory = self
                    .settings
                    .memory_budget_bytes
                    .or_else(platform::available_memory_bytes);
                choose_batch_size(items.len(), memory)
            })
            .max(1);

        let batches = items.len().div_ceil(batch_size);
        let mut report = BatchReport {
            total: items.len(),
            batch_size,
            ..BatchReport::default()
        };
        let max_attempts = self.settings.write_retries + 1;

        for (batch_index, batch) in items.chunks(batch_size).enumerate() {
            let mut attempt = 0;
            loop {
                attempt += 1;
                let outcome = {
                    let mut db = self.lock()?;
                    write_in_transaction(db.connection_mut(), |conn| write(conn, batch))
                };
                match outcome {
                    Ok(()) => {
                        report.written += batch.len();
                        self.bump_generation();
                        debug!(batch_index, size = batch.len(), attempt, "batch committed");
                        break;
                    }
                    Err(err) if err.is_retryable() && attempt < max_attempts => {
                        warn!(batch_index, attempt, error = %err, "batch write failed, retrying");
                        thread::sleep(self.settings.retry_backoff() * attempt);
                    }
                    Err(err) => {
                        warn!(batch_index, attempt, error = %err, "batch write abandoned");
                        report.failed.push(BatchFailure {
                            batch_index,
                            ids: batch.iter().map(&id_of).collect(),
                            attempts: attempt,
                            message: err.to_string(),
                        });
                        break;
                    }
                }
            }

            if let Some(callback) = on_progress.as_deref_mut() {
                callback(&BatchProgress {
                    batch_index,
                    batches,
                    processed: ((batch_index + 1) * batch_size).min(items.len()),
                    total: items.len(),
                    failed_batches: report.failed.len(),
                });
            }
        }
        Ok(report)
    }

    /// Replaces the whole mirror with a fresh host snapshot.
    ///
    /// # Errors
    /// `StoreError::TransientWrite` when a batch still fails after its retries.
    /// Records of the other batches are kept.
    pub fn replace_all(&self, nodes: &[Node]) -> Result<usize, StoreError> {
        self.replace_all_with(nodes, BatchOptions::default())?
            .into_result()
            .map(|report| report.written)
    }

    /// Clears the mirror in one transaction, then writes the snapshot through
    /// the batched path. Paths and child counts come from the snapshot itself.
    pub fn replace_all_with(&self, nodes: &[Node], options: BatchOptions<'_>) -> Result<BatchReport, StoreError> {
        let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut child_counts: HashMap<&str, u32> = HashMap::new();
        for node in nodes {
            if let Some(parent) = node.parent_id.as_deref() {
                *child_counts.entry(parent).or_insert(0) += 1;
            }
        }

        let records: Vec<BookmarkRecord> = nodes
            .iter()
            .map(|node| {
                let mut record = BookmarkRecord::from_node(node);
                record.children_count = child_counts.get(node.id.as_str()).copied().unwrap_or(0);
                record.path = Some(ancestor_titles(node, &by_id));
                record
            })
            .collect();

        self.clear()?;
        let report = self.run_batches(&records, |r| r.id.clone(), options, |conn, batch| {
            for record in batch {
                write_record(conn, record)?;
            }
            Ok(())
        })?;

        let now = chrono::Utc::now().timestamp_millis();
        let mut db = self.lock()?;
        write_in_transaction(db.connection_mut(), |conn| {
            conn.execute(
                "DELETE FROM crawl_metadata WHERE bookmark_id NOT IN (SELECT id FROM bookmarks)",
                [],
            )?;
            put_stat(conn, "last_full_reload", now)?;
            conn.execute(
                "INSERT INTO global_stats (key, value, updated_at) VALUES ('full_reloads', 1, ?1)
                 ON CONFLICT(key) DO UPDATE SET value = value + 1, updated_at = ?1",
                params![now],
            )?;
            Ok(())
        })?;
        drop(db);
        self.bump_generation();
        debug!(
            records = report.written,
            failed_batches = report.failed.len(),
            "mirror replaced from host snapshot"
        );
        Ok(report)
    }

    /// Removes every bookmark record.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut db = self.lock()?;
        write_in_transaction(db.connection_mut(), |conn| {
            conn.execute_batch("DELETE FROM bookmarks; DELETE FROM bookmark_keywords;")?;
            Ok(())
        })?;
        drop(db);
        self.bump_generation();
        Ok(())
    }

    // ─── Mirror patches ───

    /// Applies one host change notification as a targeted patch.
    pub fn apply_event(&self, event: &HostEvent) -> Result<(), StoreError> {
        let mut db = self.lock()?;
        write_in_transaction(db.connection_mut(), |conn| match event {
            HostEvent::Created { node } => {
                let parent = node
                    .parent_id
                    .as_deref()
                    .ok_or_else(|| StoreError::InvalidInput(format!("created node {} has no parent", node.id)))?;
                conn.execute(
                    "UPDATE bookmarks SET position = position + 1 WHERE parent_id = ?1 AND position >= ?2",
                    params![parent, node.index],
                )?;
                write_record(conn, &BookmarkRecord::from_node(node))?;
                refresh_children_counts(conn, [parent, node.id.as_str()])?;
                Ok(())
            }
            HostEvent::Removed { id, parent_id, index } => {
                delete_subtree(conn, id)?;
                conn.execute(
                    "UPDATE bookmarks SET position = position - 1 WHERE parent_id = ?1 AND position > ?2",
                    params![parent_id, index],
                )?;
                refresh_children_counts(conn, [parent_id.as_str()])?;
                Ok(())
            }
            HostEvent::Changed { id, title, url } => {
                let mut record =
                    read_record(conn, id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
                let title_changed = record.title != *title;
                record.title = title.clone();
                record.url = url.clone();
                record.date_modified = Some(chrono::Utc::now().timestamp_millis());
                record.refresh_derived();
                write_record(conn, &record)?;
                if title_changed && !record.is_bookmark() {
                    invalidate_subtree_paths(conn, id)?;
                }
                Ok(())
            }
            HostEvent::Moved {
                id,
                old_parent_id,
                old_index,
                parent_id,
                index,
            } => {
                if existing_parent(conn, id)?.is_none() {
                    return Err(StoreError::NotFound(id.clone()));
                }
                conn.execute(
                    "UPDATE bookmarks SET position = position - 1
                     WHERE parent_id = ?1 AND position > ?2 AND id != ?3",
                    params![old_parent_id, old_index, id],
                )?;
                conn.execute(
                    "UPDATE bookmarks SET position = position + 1
                     WHERE parent_id = ?1 AND position >= ?2 AND id != ?3",
                    params![parent_id, index, id],
                )?;
                conn.execute(
                    "UPDATE bookmarks SET parent_id = ?1, position = ?2 WHERE id = ?3",
                    params![parent_id, index, id],
                )?;
                invalidate_subtree_paths(conn, id)?;
                refresh_children_counts(conn, [old_parent_id.as_str(), parent_id.as_str()])?;
                Ok(())
            }
            HostEvent::ChildrenReordered { parent_id, child_ids } => {
                for (position, child) in child_ids.iter().enumerate() {
                    conn.execute(
                        "UPDATE bookmarks SET position = ?1 WHERE id = ?2 AND parent_id = ?3",
                        params![position, child, parent_id],
                    )?;
                }
                Ok(())
            }
        })?;
        drop(db);
        self.bump_generation();
        Ok(())
    }

    // ─── Reads ───

    pub fn get_by_id(&self, id: &str) -> Result<Option<BookmarkRecord>, StoreError> {
        let db = self.lock()?;
        read_record(db.connection(), id)
    }

    /// Lists the children of `parent_id` ordered by index.
    ///
    /// Uses the composite `(parent_id, position)` index when the schema has it;
    /// otherwise scans the parent's rows and sorts them in memory.
    pub fn get_children(&self, parent_id: &str, page: Page) -> Result<Vec<BookmarkRecord>, StoreError> {
        let db = self.lock()?;
        let conn = db.connection();
        if migrations::index_exists(conn, migrations::CHILDREN_INDEX)? {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {COLUMNS} FROM bookmarks INDEXED BY {} \
                 WHERE parent_id = ?1 ORDER BY position LIMIT ?2 OFFSET ?3",
                migrations::CHILDREN_INDEX
            ))?;
            let rows = stmt.query_map(params![parent_id, page.limit, page.offset], row_to_record)?;
            collect_records(rows)
        } else {
            debug!(parent_id, "composite children index missing, sorting in memory");
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM bookmarks WHERE parent_id = ?1"))?;
            let rows = stmt.query_map(params![parent_id], row_to_record)?;
            let mut children = collect_records(rows)?;
            children.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.id.cmp(&b.id)));
            Ok(children.into_iter().skip(page.offset).take(page.limit).collect())
        }
    }

    /// Records without a parent.
    pub fn get_roots(&self) -> Result<Vec<BookmarkRecord>, StoreError> {
        let db = self.lock()?;
        let mut stmt = db
            .connection()
            .prepare(&format!("SELECT {COLUMNS} FROM bookmarks WHERE parent_id IS NULL ORDER BY position, id"))?;
        let rows = stmt.query_map([], row_to_record)?;
        collect_records(rows)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let db = self.lock()?;
        Ok(db
            .connection()
            .query_row("SELECT COUNT(*) FROM bookmarks", [], |row| row.get(0))?)
    }

    pub fn all_ids(&self) -> Result<Vec<String>, StoreError> {
        let db = self.lock()?;
        let mut stmt = db.connection().prepare("SELECT id FROM bookmarks ORDER BY id")?;
        let ids = stmt.query_map([], |row| row.get(0))?;
        Ok(ids.collect::<Result<Vec<String>, _>>()?)
    }

    /// Range lookup `[term, term + MAX_SUFFIX)` over one of the secondary indexes.
    pub fn prefix_lookup(&self, field: IndexField, term: &str, limit: usize) -> Result<Vec<BookmarkRecord>, StoreError> {
        let upper = format!("{term}{MAX_SUFFIX}");
        let column = field.column();
        let db = self.lock()?;
        let mut stmt = db.connection().prepare_cached(&format!(
            "SELECT {COLUMNS} FROM bookmarks WHERE {column} >= ?1 AND {column} < ?2 ORDER BY {column} LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![term, upper, limit], row_to_record)?;
        collect_records(rows)
    }

    /// Range lookup over the inverted keyword index.
    pub fn keyword_lookup(&self, term: &str, limit: usize) -> Result<Vec<BookmarkRecord>, StoreError> {
        let upper = format!("{term}{MAX_SUFFIX}");
        let db = self.lock()?;
        let mut stmt = db.connection().prepare_cached(&format!(
            "SELECT {COLUMNS} FROM bookmarks WHERE id IN (
                 SELECT DISTINCT bookmark_id FROM bookmark_keywords
                 WHERE keyword >= ?1 AND keyword < ?2 LIMIT ?3
             )"
        ))?;
        let rows = stmt.query_map(params![term, upper, limit], row_to_record)?;
        collect_records(rows)
    }

    /// Walks every record in storage order until `visit` returns false.
    pub fn scan(&self, mut visit: impl FnMut(BookmarkRecord) -> bool) -> Result<(), StoreError> {
        let db = self.lock()?;
        let mut stmt = db
            .connection()
            .prepare(&format!("SELECT {COLUMNS} FROM bookmarks ORDER BY rowid"))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if !visit(row_to_record(row)?) {
                break;
            }
        }
        Ok(())
    }

    /// Every record, unordered. Meant for tree reconstruction, not for paging.
    pub fn all_records(&self) -> Result<Vec<BookmarkRecord>, StoreError> {
        let mut records = Vec::new();
        self.scan(|record| {
            records.push(record);
            true
        })?;
        Ok(records)
    }

    /// Returns the materialized ancestor titles of `id`, computing and caching
    /// them when missing.
    pub fn path_of(&self, id: &str) -> Result<Vec<String>, StoreError> {
        let db = self.lock()?;
        let conn = db.connection();
        let record = read_record(conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Some(path) = record.path {
            return Ok(path);
        }

        let mut titles = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = record.parent_id.clone();
        while let Some(parent_id) = cursor {
            if !seen.insert(parent_id.clone()) {
                break;
            }
            match read_record(conn, &parent_id)? {
                Some(parent) => {
                    if !parent.title.is_empty() {
                        titles.push(parent.title.clone());
                    }
                    cursor = parent.parent_id;
                }
                None => break,
            }
        }
        titles.reverse();
        conn.execute(
            "UPDATE bookmarks SET path = ?1 WHERE id = ?2",
            params![serde_json::to_string(&titles)?, id],
        )?;
        Ok(titles)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let db = self.lock()?;
        let conn = db.connection();
        let (bookmarks, folders): (usize, usize) = conn.query_row(
            "SELECT COALESCE(SUM(url IS NOT NULL), 0), COALESCE(SUM(url IS NULL), 0) FROM bookmarks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(StoreStats {
            bookmarks,
            folders,
            last_full_reload: get_stat(conn, "last_full_reload")?,
            full_reloads: get_stat(conn, "full_reloads")?.unwrap_or(0),
        })
    }

    // ─── Settings ───

    pub fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let db = self.lock()?;
        let raw: Option<String> = db
            .connection()
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(raw.map(|v| serde_json::from_str(&v)).transpose()?)
    }

    pub fn put_setting(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidInput("setting key cannot be empty".to_string()));
        }
        let db = self.lock()?;
        db.connection().execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, serde_json::to_string(value)?, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool, StoreError> {
        let db = self.lock()?;
        let affected = db
            .connection()
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }

    // ─── Search history ───

    pub fn record_search(&self, query: &str, result_count: usize) -> Result<i64, StoreError> {
        let db = self.lock()?;
        db.connection().execute(
            "INSERT INTO search_history (query, result_count, timestamp) VALUES (?1, ?2, ?3)",
            params![query, result_count, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(db.connection().last_insert_rowid())
    }

    /// Most recent searches first.
    pub fn recent_searches(&self, limit: usize) -> Result<Vec<SearchHistoryEntry>, StoreError> {
        let db = self.lock()?;
        let mut stmt = db.connection().prepare(
            "SELECT id, query, result_count, timestamp FROM search_history
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(SearchHistoryEntry {
                id: row.get(0)?,
                query: row.get(1)?,
                result_count: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn clear_search_history(&self) -> Result<(), StoreError> {
        let db = self.lock()?;
        db.connection().execute("DELETE FROM search_history", [])?;
        Ok(())
    }

    // ─── Favicon cache ───

    pub fn put_favicon(&self, entry: &FaviconEntry) -> Result<(), StoreError> {
        let db = self.lock()?;
        db.connection().execute(
            "INSERT OR REPLACE INTO favicon_cache (domain, data, mime_type, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![entry.domain, entry.data, entry.mime_type, entry.updated_at],
        )?;
        Ok(())
    }

    pub fn get_favicon(&self, domain: &str) -> Result<Option<FaviconEntry>, StoreError> {
        let db = self.lock()?;
        Ok(db
            .connection()
            .query_row(
                "SELECT domain, data, mime_type, updated_at FROM favicon_cache WHERE domain = ?1",
                params![domain],
                |row| {
                    Ok(FaviconEntry {
                        domain: row.get(0)?,
                        data: row.get(1)?,
                        mime_type: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    // ─── Crawl metadata ───

    pub fn put_crawl_metadata(&self, meta: &CrawlMetadata) -> Result<(), StoreError> {
        let db = self.lock()?;
        db.connection().execute(
            "INSERT OR REPLACE INTO crawl_metadata (bookmark_id, title, description, keywords, status, crawled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                meta.bookmark_id,
                meta.title,
                meta.description,
                serde_json::to_string(&meta.keywords)?,
                meta.status.as_str(),
                meta.crawled_at
            ],
        )?;
        drop(db);
        self.bump_generation();
        Ok(())
    }

    pub fn get_crawl_metadata(&self, bookmark_id: &str) -> Result<Option<CrawlMetadata>, StoreError> {
        Ok(self
            .crawl_metadata_for(&[bookmark_id.to_string()])?
            .remove(bookmark_id))
    }

    /// Loads crawl metadata for a set of ids in one query.
    pub fn crawl_metadata_for(&self, ids: &[String]) -> Result<HashMap<String, CrawlMetadata>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let db = self.lock()?;
        let conn = db.connection();
        let mut found = HashMap::new();
        // SQLite caps bound parameters; 500 stays well below every default.
        for chunk in ids.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT bookmark_id, title, description, keywords, status, crawled_at
                 FROM crawl_metadata WHERE bookmark_id IN ({placeholders})"
            ))?;
            let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                let status: String = row.get(4)?;
                Ok(CrawlMetadata {
                    bookmark_id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    keywords: json_list(row, 3)?,
                    status: CrawlStatus::parse(&status),
                    crawled_at: row.get(5)?,
                })
            })?;
            for meta in rows {
                let meta = meta?;
                found.insert(meta.bookmark_id.clone(), meta);
            }
        }
        Ok(found)
    }
}

// ─── Row helpers ───

fn write_in_transaction(
    conn: &mut Connection,
    f: impl FnOnce(&Connection) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    f(&tx)?;
    tx.commit()?;
    Ok(())
}

fn json_list(row: &Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Reads a single `BookmarkRecord` row into a struct.
fn row_to_record(row: &Row) -> rusqlite::Result<BookmarkRecord> {
    let path: Option<String> = row.get(12)?;
    let path = match path {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(BookmarkRecord {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        index: row.get(2)?,
        title: row.get(3)?,
        url: row.get(4)?,
        date_added: row.get(5)?,
        date_modified: row.get(6)?,
        title_lower: row.get(7)?,
        url_lower: row.get(8)?,
        domain: row.get(9)?,
        keywords: json_list(row, 10)?,
        tags: json_list(row, 11)?,
        path,
        children_count: row.get(13)?,
    })
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<BookmarkRecord>>,
) -> Result<Vec<BookmarkRecord>, StoreError> {
    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

fn read_record(conn: &Connection, id: &str) -> Result<Option<BookmarkRecord>, StoreError> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {COLUMNS} FROM bookmarks WHERE id = ?1"))?;
    Ok(stmt.query_row(params![id], row_to_record).optional()?)
}

/// `Some(parent)` when the record exists (`parent` itself may be `None` for roots).
fn existing_parent(conn: &Connection, id: &str) -> Result<Option<Option<String>>, StoreError> {
    Ok(conn
        .query_row("SELECT parent_id FROM bookmarks WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?)
}

fn existing_id(store: &BookmarkStore, id: &str) -> Result<bool, StoreError> {
    store.with_connection(|conn| {
        conn.query_row("SELECT COUNT(*) > 0 FROM bookmarks WHERE id = ?1", params![id], |row| row.get(0))
    })
}

/// Upserts a record and rewrites its keyword postings.
fn write_record(conn: &Connection, record: &BookmarkRecord) -> Result<(), StoreError> {
    let path = record.path.as_ref().map(serde_json::to_string).transpose()?;
    conn.prepare_cached(&format!(
        "INSERT OR REPLACE INTO bookmarks ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
    ))?
    .execute(params![
        record.id,
        record.parent_id,
        record.index,
        record.title,
        record.url,
        record.date_added,
        record.date_modified,
        record.title_lower,
        record.url_lower,
        record.domain,
        serde_json::to_string(&record.keywords)?,
        serde_json::to_string(&record.tags)?,
        path,
        record.children_count,
    ])?;

    conn.prepare_cached("DELETE FROM bookmark_keywords WHERE bookmark_id = ?1")?
        .execute(params![record.id])?;
    let mut insert = conn.prepare_cached("INSERT OR IGNORE INTO bookmark_keywords (keyword, bookmark_id) VALUES (?1, ?2)")?;
    for keyword in &record.keywords {
        insert.execute(params![keyword, record.id])?;
    }
    Ok(())
}

/// Deletes a record, all of its descendants and their postings.
fn delete_subtree(conn: &Connection, id: &str) -> Result<usize, StoreError> {
    let subtree = "WITH RECURSIVE subtree(id) AS (
                       SELECT ?1
                       UNION SELECT b.id FROM bookmarks b JOIN subtree s ON b.parent_id = s.id
                   )";
    conn.execute(
        &format!("{subtree} DELETE FROM bookmark_keywords WHERE bookmark_id IN (SELECT id FROM subtree)"),
        params![id],
    )?;
    conn.execute(
        &format!("{subtree} DELETE FROM crawl_metadata WHERE bookmark_id IN (SELECT id FROM subtree)"),
        params![id],
    )?;
    Ok(conn.execute(
        &format!("{subtree} DELETE FROM bookmarks WHERE id IN (SELECT id FROM subtree)"),
        params![id],
    )?)
}

/// Clears the cached path of a record and everything below it.
fn invalidate_subtree_paths(conn: &Connection, id: &str) -> Result<(), StoreError> {
    conn.execute(
        "WITH RECURSIVE subtree(id) AS (
             SELECT ?1
             UNION SELECT b.id FROM bookmarks b JOIN subtree s ON b.parent_id = s.id
         )
         UPDATE bookmarks SET path = NULL WHERE id IN (SELECT id FROM subtree)",
        params![id],
    )?;
    Ok(())
}

fn refresh_children_counts<'a>(conn: &Connection, ids: impl IntoIterator<Item = &'a str>) -> Result<(), StoreError> {
    let mut stmt = conn.prepare_cached(
        "UPDATE bookmarks SET children_count =
             (SELECT COUNT(*) FROM bookmarks c WHERE c.parent_id = bookmarks.id)
         WHERE id = ?1",
    )?;
    let mut seen = HashSet::new();
    for id in ids {
        if seen.insert(id) {
            stmt.execute(params![id])?;
        }
    }
    Ok(())
}

fn ancestor_titles(node: &Node, by_id: &HashMap<&str, &Node>) -> Vec<String> {
    let mut titles = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = node.parent_id.as_deref();
    while let Some(parent_id) = cursor {
        if !seen.insert(parent_id) {
            break;
        }
        match by_id.get(parent_id) {
            Some(parent) => {
                if !parent.title.is_empty() {
                    titles.push(parent.title.clone());
                }
                cursor = parent.parent_id.as_deref();
            }
            None => break,
        }
    }
    titles.reverse();
    titles
}

fn put_stat(conn: &Connection, key: &str, value: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO global_stats (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, chrono::Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

fn get_stat(conn: &Connection, key: &str) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .query_row("SELECT value FROM global_stats WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?)
}
