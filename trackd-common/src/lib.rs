//! Shared types and utilities for trackd
//!
//! Domain model (tasks, projects, models, metric events), the task state
//! machine, error types, configuration, and SQLite schema initialization
//! used by the trackd server.

pub mod config;
pub mod db;
pub mod error;
pub mod time;
pub mod types;

pub use error::{Error, Result};
