//! Connection and database traits
//!
//! The held-transaction core only assumes the transaction primitives
//! defined here. A connection is owned exclusively by whoever acquired it;
//! pinning is ownership, not a thread-local convention.

use crate::error::Result;
use serde_json::Value;

/// How an outer transaction should end.
///
/// The worker that owns a held transaction selects one of these at exit
/// instead of signalling rollback through a sentinel error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Commit,
    Rollback,
}

/// A single database connection.
///
/// At most one outer transaction may be open per connection. Savepoints
/// nest inside it with LIFO discipline; rolling back to a savepoint
/// discards it and everything opened after it.
pub trait Connection: Send {
    /// Begin the outer transaction.
    fn begin(&mut self) -> Result<()>;

    /// Commit the outer transaction, publishing its writes.
    fn commit(&mut self) -> Result<()>;

    /// Roll the outer transaction back, discarding its writes.
    fn rollback(&mut self) -> Result<()>;

    /// Open a named savepoint inside the outer transaction.
    fn savepoint(&mut self, name: &str) -> Result<()>;

    /// Release a savepoint, keeping the work done since it was opened.
    fn release_savepoint(&mut self, name: &str) -> Result<()>;

    /// Roll back to a savepoint, undoing the work done since it was opened
    /// without touching the outer transaction.
    fn rollback_to_savepoint(&mut self, name: &str) -> Result<()>;

    /// Whether an outer transaction is currently open.
    fn in_transaction(&self) -> bool;

    /// Store a value under a key. An empty key fails validation.
    fn put(&mut self, key: &str, value: Value) -> Result<()>;

    /// Store a value under a key that must not already exist.
    fn put_unique(&mut self, key: &str, value: Value) -> Result<()>;

    /// Fetch the value under a key.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Delete a key. Returns whether it existed.
    fn delete(&mut self, key: &str) -> Result<bool>;

    /// List `(key, value)` pairs whose key starts with `prefix`, ordered
    /// by key.
    fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>>;
}

/// A handle to the database from which connections are acquired.
pub trait Database: Send + Sync {
    /// Check out a dedicated connection. The caller owns it exclusively
    /// until drop; dropping it with an open transaction rolls back.
    fn acquire(&self) -> Result<Box<dyn Connection>>;

    /// Whether nested transactions are implemented as real savepoints.
    /// Held transactions refuse to run against a backend reporting false.
    fn supports_savepoints(&self) -> bool;
}

/// Run `action` on a fresh connection inside its own short transaction:
/// commit on success, roll back on error.
///
/// This is the non-transactional request path; requests carrying a
/// correlation header go through a held transaction instead.
pub fn autocommit<F>(db: &dyn Database, action: F) -> Result<Value>
where
    F: FnOnce(&mut dyn Connection) -> Result<Value>,
{
    let mut conn = db.acquire()?;
    conn.begin()?;
    match action(conn.as_mut()) {
        Ok(value) => {
            conn.commit()?;
            Ok(value)
        }
        Err(err) => {
            let _ = conn.rollback();
            Err(err)
        }
    }
}
