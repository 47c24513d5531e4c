//! Tidymarks database layer.
//!
//! Provides SQLite connection management, versioned schema migrations and a
//! schema health check.
//!
//! # Usage
//!
//! ```no_run
//! use tidymarks::database::{check_health, Database};
//!
//! // Open a persistent database
//! let db = Database::open("bookmarks.db").expect("failed to open database");
//!
//! // Or use an in-memory database for testing
//! let db = Database::open_in_memory().expect("failed to open in-memory database");
//!
//! // Verify that every collection and index exists
//! assert!(check_health(db.connection()).healthy);
//! ```

pub mod connection;
pub mod health;
pub mod migrations;

pub use connection::{Database, DatabaseLocation};
pub use health::{check_health, HealthReport};
