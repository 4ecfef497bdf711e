//! Error types for the held-transaction core

use holdtx_db::DbError;
use thiserror::Error;

/// Errors surfaced by held transactions and the manager.
#[derive(Debug, Error)]
pub enum HoldError {
    /// Lookup of an id that is not in the registry.
    #[error("transaction not found: {0}")]
    NotFound(String),

    /// The held transaction is past its deadline or already terminated.
    #[error("transaction expired or already terminated: {0}")]
    Expired(String),

    /// The per-process concurrency budget is exhausted.
    #[error("too many concurrent transactions (limit {0})")]
    ConcurrencyLimit(usize),

    /// A submitted database action failed.
    ///
    /// `transaction_rolled_back` is false when the operation's savepoint
    /// rolled back cleanly and the held transaction is still usable, true
    /// when the whole transaction is gone.
    #[error("operation failed: {cause}")]
    Operation {
        cause: DbError,
        transaction_rolled_back: bool,
    },

    /// An update requested a target state other than `committed` or
    /// `rolled_back`.
    #[error("invalid target state \"{0}\": must be \"committed\" or \"rolled_back\"")]
    InvalidStateTransition(String),

    /// Any other internal fault.
    #[error("transaction error: {0}")]
    Internal(String),
}

/// Result type alias for held-transaction operations
pub type Result<T> = std::result::Result<T, HoldError>;
