//! Schema health check: expected collections and indexes versus what exists.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::migrations;

/// Discrepancies between the expected schema and the database contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub schema_version: i32,
    pub missing_tables: Vec<String>,
    pub missing_indexes: Vec<String>,
    pub extra_tables: Vec<String>,
    pub extra_indexes: Vec<String>,
    /// Set when the schema could not be inspected at all.
    pub error: Option<String>,
}

/// Compares the expected schema against `sqlite_master`. Never fails.
pub fn check_health(conn: &Connection) -> HealthReport {
    let tables = match list_objects(conn, "table") {
        Ok(t) => t,
        Err(e) => return unreadable(e),
    };
    let indexes = match list_objects(conn, "index") {
        Ok(i) => i,
        Err(e) => return unreadable(e),
    };

    let expected_tables = migrations::expected_tables();
    let expected_indexes = migrations::expected_indexes();

    let missing_tables: Vec<String> = expected_tables
        .iter()
        .filter(|t| !tables.iter().any(|have| have == *t))
        .map(|t| t.to_string())
        .collect();
    let missing_indexes: Vec<String> = expected_indexes
        .iter()
        .filter(|i| !indexes.iter().any(|have| have == *i))
        .map(|i| i.to_string())
        .collect();
    let extra_tables: Vec<String> = tables
        .iter()
        .filter(|t| !expected_tables.contains(&t.as_str()))
        .cloned()
        .collect();
    let extra_indexes: Vec<String> = indexes
        .iter()
        .filter(|i| !expected_indexes.contains(&i.as_str()))
        .cloned()
        .collect();

    HealthReport {
        healthy: missing_tables.is_empty() && missing_indexes.is_empty(),
        schema_version: migrations::get_schema_version(conn),
        missing_tables,
        missing_indexes,
        extra_tables,
        extra_indexes,
        error: None,
    }
}

/// Lists user objects of a kind, skipping SQLite's internal ones.
fn list_objects(conn: &Connection, kind: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = ?1 AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([kind], |row| row.get(0))?;
    rows.collect()
}

fn unreadable(err: rusqlite::Error) -> HealthReport {
    HealthReport {
        healthy: false,
        error: Some(err.to_string()),
        ..HealthReport::default()
    }
}
