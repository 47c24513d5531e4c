//! Tidymarks: a local, indexed mirror of a browser bookmark tree with ranked
//! search and reconciliation of proposed tree edits.
//!
//! This library crate exposes all modules for use by the binaries and integration tests.

pub mod app;
pub mod database;
pub mod managers;
pub mod platform;
pub mod services;
pub mod rpc_handler;
pub mod types;
