//! Common error types for trackd

use crate::types::task::InvalidTransition;
use thiserror::Error;

/// Common result type for trackd operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across trackd crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Illegal task state transition; task state is left unchanged
    #[error("{0}")]
    State(#[from] InvalidTransition),

    /// Transient storage failure surfaced after retries were exhausted.
    /// The caller may retry the whole operation.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Request-scoped computation was cancelled before completion
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
