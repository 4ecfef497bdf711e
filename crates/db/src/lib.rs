//! Database facade for held transactions
//!
//! This crate defines:
//! - The `Database` / `Connection` traits exposing the transaction
//!   primitives the held-transaction core relies on (begin, commit,
//!   rollback, savepoints)
//! - A `DbError` taxonomy that distinguishes validation-class failures
//! - `MemoryDb`, an in-memory engine with real snapshot and savepoint
//!   semantics, used by tests and embeddings without a database server

mod connection;
mod error;
mod memory;

pub use connection::{Connection, Database, TransactionOutcome, autocommit};
pub use error::{DbError, Result};
pub use memory::MemoryDb;
