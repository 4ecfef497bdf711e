//! Held-transaction core
//!
//! A held transaction is a database transaction deliberately kept open
//! across multiple independent requests. Each one is pinned to a dedicated
//! worker that owns the connection and serialises operations against it
//! through a queue; a process-wide `Manager` issues, finds, terminates and
//! reaps them.
//!
//! State lives only in the holding process by design: a crash drops the
//! connection and the database rolls the transaction back.

mod clock;
mod config;
mod error;
mod manager;
mod reaper;
mod transaction;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HoldConfig;
pub use error::{HoldError, Result};
pub use manager::Manager;
pub use transaction::{DbAction, HeldTransaction, TransactionState, TransactionView};
