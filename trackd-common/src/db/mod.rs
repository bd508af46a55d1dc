//! Database access layer
//!
//! Schema creation and connection pool setup for the trackd SQLite store.

pub mod init;

pub use init::{init_database, init_memory_database};
