//! Error types for the database facade

use thiserror::Error;

/// Errors surfaced by a database connection
#[derive(Debug, Error)]
pub enum DbError {
    /// A constraint or validation failure caused by the submitted data
    #[error("validation failed: {0}")]
    Validation(String),

    /// A unique-key violation
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// Lookup of a key that does not exist
    #[error("no such key: {0}")]
    NotFound(String),

    /// The connection to the database was lost
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A transaction primitive was used outside a transaction
    #[error("no transaction in progress")]
    NoTransaction,

    /// A savepoint primitive named a savepoint that does not exist
    #[error("no such savepoint: {0}")]
    NoSavepoint(String),

    /// The backend does not implement nested transactions as savepoints
    #[error("backend does not support savepoints")]
    SavepointsUnsupported,

    /// Any other backend fault
    #[error("database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Whether this error is validation-class: caused by the caller's data
    /// rather than by the database itself.
    pub fn is_validation(&self) -> bool {
        matches!(self, DbError::Validation(_) | DbError::Duplicate(_))
    }
}

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DbError>;
