//! Unit tests for the Tidymarks database layer (connection, migrations, health).

use std::time::Duration;

use tidymarks::database::migrations::{self, CHILDREN_INDEX, CURRENT_SCHEMA_VERSION};
use tidymarks::database::{check_health, Database, DatabaseLocation};

#[test]
fn test_open_in_memory_succeeds() {
    let db = Database::open_in_memory();
    assert!(db.is_ok(), "open_in_memory should succeed");
}

#[test]
fn test_migrations_create_all_tables() {
    let db = Database::open_in_memory().expect("open_in_memory failed");
    let conn = db.connection();

    let expected_tables = [
        "schema_version",
        "bookmarks",
        "global_stats",
        "settings",
        "search_history",
        "favicon_cache",
        "crawl_metadata",
        "bookmark_keywords",
    ];

    for table in &expected_tables {
        assert!(
            migrations::table_exists(conn, table).unwrap(),
            "Table '{}' should exist after migrations",
            table
        );
    }
}

#[test]
fn test_migrations_create_indexes() {
    let db = Database::open_in_memory().expect("open_in_memory failed");
    let conn = db.connection();

    for index in migrations::expected_indexes() {
        assert!(
            migrations::index_exists(conn, index).unwrap(),
            "Index '{}' should exist after migrations",
            index
        );
    }
    assert!(migrations::index_exists(conn, CHILDREN_INDEX).unwrap());
}

#[test]
fn test_schema_version_is_current() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(db.schema_version(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn test_migrations_are_idempotent() {
    let db = Database::open_in_memory().unwrap();
    let applied = migrations::run_all(db.connection()).unwrap();
    assert!(applied.is_empty(), "nothing left to apply: {:?}", applied);

    let rows: i64 = db
        .connection()
        .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, CURRENT_SCHEMA_VERSION as i64);
}

#[test]
fn test_dropped_index_is_recreated_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bookmarks.db");
    {
        let db = Database::open(&path).unwrap();
        db.connection()
            .execute_batch(&format!("DROP INDEX {}", CHILDREN_INDEX))
            .unwrap();
        assert!(!check_health(db.connection()).healthy);
    }

    let db = Database::open(&path).unwrap();
    assert!(migrations::index_exists(db.connection(), CHILDREN_INDEX).unwrap());
    assert!(check_health(db.connection()).healthy);
}

#[test]
fn test_health_reports_missing_and_extra_objects() {
    let db = Database::open_in_memory().unwrap();
    db.connection()
        .execute_batch(
            "DROP TABLE favicon_cache;
             CREATE TABLE leftovers (id INTEGER);
             CREATE INDEX idx_leftovers_id ON leftovers(id);",
        )
        .unwrap();

    let report = check_health(db.connection());
    assert!(!report.healthy);
    assert_eq!(report.missing_tables, vec!["favicon_cache".to_string()]);
    assert_eq!(report.extra_tables, vec!["leftovers".to_string()]);
    assert_eq!(report.extra_indexes, vec!["idx_leftovers_id".to_string()]);
    assert!(report.error.is_none());
}

#[test]
fn test_garbage_file_is_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bookmarks.db");
    std::fs::write(&path, b"this is definitely not an sqlite database, just some bytes").unwrap();

    let location = DatabaseLocation::File(path.clone());
    assert!(Database::open_location(&location, Duration::from_millis(200))
        .err()
        .is_some_and(|e| e.is_corruption()));

    let (db, recovered) = Database::open_with_recovery(&location, Duration::from_millis(200)).unwrap();
    assert!(recovered);
    assert!(check_health(db.connection()).healthy);
}

#[test]
fn test_destroy_removes_sidecar_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bookmarks.db");
    {
        let _db = Database::open(&path).unwrap();
    }
    std::fs::write(dir.path().join("bookmarks.db-wal"), b"").unwrap();

    Database::destroy(&path).unwrap();
    assert!(!path.exists());
    assert!(!dir.path().join("bookmarks.db-wal").exists());
    // Missing files are fine
    Database::destroy(&path).unwrap();
}
