//! Held transaction implementation
//!
//! A `HeldTransaction` owns one worker task and one pinned database
//! connection. Requests submit database actions onto its queue; the worker
//! executes them one at a time, each inside its own savepoint, so a failed
//! action rolls back cleanly while the outer transaction stays open.

use crate::clock::Clock;
use crate::error::{HoldError, Result};
use chrono::{DateTime, Duration, Utc};
use holdtx_db::{Connection, Database, DbError, TransactionOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// State of a held transaction.
///
/// The only transitions are `Open -> Committed` and `Open -> RolledBack`;
/// both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Open)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Open => "open",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// A database action submitted to a held transaction. It runs on the
/// worker with the pinned connection, inside a savepoint of its own.
pub type DbAction =
    Box<dyn FnOnce(&mut dyn Connection) -> std::result::Result<Value, DbError> + Send>;

/// One entry on the worker queue.
enum Operation {
    /// Round-trip proving the worker has begun the outer transaction.
    ReadyProbe {
        reply: oneshot::Sender<Result<()>>,
    },
    /// Execute a database action inside a savepoint.
    Execute {
        action: DbAction,
        reply: oneshot::Sender<Result<Value>>,
    },
    /// End the outer transaction and exit the worker.
    Terminate {
        target: TransactionState,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Externally visible attributes of a held transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionView {
    pub id: String,
    pub state: TransactionState,
    pub timeout_seconds: u64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A single open database transaction pinned to a dedicated worker.
pub struct HeldTransaction {
    id: String,
    timeout_secs: u64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    state: Arc<Mutex<TransactionState>>,
    queue: mpsc::UnboundedSender<Operation>,
    worker: Mutex<Option<JoinHandle<()>>>,
    clock: Arc<dyn Clock>,
}

impl HeldTransaction {
    /// Open a held transaction: spawn the worker and block until it has
    /// acquired a connection and begun the outer transaction, so any
    /// subsequent `submit` observes an active transaction.
    pub async fn open(
        db: Arc<dyn Database>,
        timeout_secs: u64,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        let id = Uuid::new_v4().to_string();
        let created_at = clock.now();
        let expires_at = created_at + Duration::seconds(timeout_secs as i64);
        let state = Arc::new(Mutex::new(TransactionState::Open));

        let (queue, inbox) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(db, id.clone(), Arc::clone(&state), inbox));

        let txn = Arc::new(Self {
            id,
            timeout_secs,
            created_at,
            expires_at,
            state,
            queue,
            worker: Mutex::new(Some(handle)),
            clock,
        });

        txn.await_ready().await?;
        Ok(txn)
    }

    async fn await_ready(&self) -> Result<()> {
        let (reply, ack) = oneshot::channel();
        self.queue
            .send(Operation::ReadyProbe { reply })
            .map_err(|_| worker_gone(&self.id))?;
        ack.await.map_err(|_| worker_gone(&self.id))?
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_secs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransactionState::Open
    }

    /// True iff the transaction is still open but past its deadline.
    pub fn is_expired(&self) -> bool {
        self.is_open() && self.clock.now() > self.expires_at
    }

    pub fn as_view(&self) -> TransactionView {
        TransactionView {
            id: self.id.clone(),
            state: self.state(),
            timeout_seconds: self.timeout_secs,
            expires_at: self.expires_at,
            created_at: self.created_at,
        }
    }

    /// Execute `action` on the worker while the pinned connection is
    /// current and return its value.
    ///
    /// A failed action rolls back to its savepoint and surfaces as
    /// `Operation { transaction_rolled_back: false }`; the held
    /// transaction stays open and reusable either way.
    pub async fn submit<F>(&self, action: F) -> Result<Value>
    where
        F: FnOnce(&mut dyn Connection) -> std::result::Result<Value, DbError> + Send + 'static,
    {
        if !self.is_open() || self.is_expired() {
            return Err(HoldError::Expired(self.id.clone()));
        }
        let (reply, response) = oneshot::channel();
        self.queue
            .send(Operation::Execute {
                action: Box::new(action),
                reply,
            })
            .map_err(|_| HoldError::Expired(self.id.clone()))?;
        response
            .await
            .map_err(|_| HoldError::Expired(self.id.clone()))?
    }

    /// Transition `Open -> Committed` and have the worker commit the
    /// outer transaction. A transaction that is no longer open fails with
    /// `Expired`.
    pub async fn commit(&self) -> Result<()> {
        self.terminate(TransactionState::Committed).await
    }

    /// Transition `Open -> RolledBack` and have the worker roll the outer
    /// transaction back.
    pub async fn rollback(&self) -> Result<()> {
        self.terminate(TransactionState::RolledBack).await
    }

    async fn terminate(&self, target: TransactionState) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != TransactionState::Open {
                return Err(HoldError::Expired(self.id.clone()));
            }
            *state = target;
        }

        let (reply, ack) = oneshot::channel();
        if self
            .queue
            .send(Operation::Terminate { target, reply })
            .is_err()
        {
            return self.worker_lost(target);
        }
        let result = match ack.await {
            Ok(result) => result,
            Err(_) => self.worker_lost(target),
        };

        // The worker exits right after acknowledging; reap the task so the
        // connection is released by the time this returns.
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        result
    }

    /// The worker died without processing the terminate instruction. The
    /// dropped connection has rolled the transaction back at the database.
    fn worker_lost(&self, target: TransactionState) -> Result<()> {
        *self.state.lock() = TransactionState::RolledBack;
        if target == TransactionState::Committed {
            Err(worker_gone(&self.id))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for HeldTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeldTransaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("timeout_secs", &self.timeout_secs)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn worker_gone(id: &str) -> HoldError {
    HoldError::Internal(format!("held transaction {id} worker terminated unexpectedly"))
}

/// Marks the transaction rolled back if the worker unwinds or exits
/// without reaching a terminal state.
struct RollbackOnDrop {
    id: String,
    state: Arc<Mutex<TransactionState>>,
}

impl Drop for RollbackOnDrop {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if *state == TransactionState::Open {
            *state = TransactionState::RolledBack;
            tracing::error!(
                "held transaction {} worker exited without terminating; marked rolled back",
                self.id
            );
        }
    }
}

/// How a single action inside a savepoint failed.
enum OpFailure {
    /// The savepoint rolled back cleanly; the outer transaction is intact.
    Recovered(DbError),
    /// The connection is unusable; the held transaction is gone.
    Fatal(DbError),
}

/// The worker loop. Owns the pinned connection for the lifetime of the
/// held transaction and serialises all operations against it.
async fn run_worker(
    db: Arc<dyn Database>,
    id: String,
    state: Arc<Mutex<TransactionState>>,
    mut inbox: mpsc::UnboundedReceiver<Operation>,
) {
    // Fires only if this task unwinds before reaching a terminal state.
    let _guard = RollbackOnDrop {
        id: id.clone(),
        state: Arc::clone(&state),
    };

    let mut conn = match open_outer_transaction(db.as_ref()) {
        Ok(conn) => conn,
        Err(cause) => {
            tracing::error!("held transaction {id} failed to start: {cause}");
            *state.lock() = TransactionState::RolledBack;
            // The ready probe is already queued; fail it and exit.
            if let Some(op) = inbox.recv().await {
                fail_operation(op, cause);
            }
            return;
        }
    };

    let mut op_seq: u64 = 0;
    while let Some(op) = inbox.recv().await {
        match op {
            Operation::ReadyProbe { reply } => {
                let _ = reply.send(Ok(()));
            }
            Operation::Execute { action, reply } => {
                op_seq += 1;
                let savepoint = format!("holdtx_op_{op_seq}");
                match execute_in_savepoint(conn.as_mut(), &savepoint, action) {
                    Ok(value) => {
                        let _ = reply.send(Ok(value));
                    }
                    Err(OpFailure::Recovered(cause)) => {
                        tracing::debug!(
                            "held transaction {id} operation {op_seq} rolled back to its savepoint: {cause}"
                        );
                        let _ = reply.send(Err(HoldError::Operation {
                            cause,
                            transaction_rolled_back: false,
                        }));
                    }
                    Err(OpFailure::Fatal(cause)) => {
                        tracing::error!("held transaction {id} lost its connection: {cause}");
                        *state.lock() = TransactionState::RolledBack;
                        let _ = reply.send(Err(HoldError::Operation {
                            cause,
                            transaction_rolled_back: true,
                        }));
                        let _ = conn.rollback();
                        return;
                    }
                }
            }
            Operation::Terminate { target, reply } => {
                let outcome = match target {
                    TransactionState::Committed => TransactionOutcome::Commit,
                    _ => TransactionOutcome::Rollback,
                };
                let result = match outcome {
                    TransactionOutcome::Commit => conn.commit(),
                    TransactionOutcome::Rollback => conn.rollback(),
                };
                match result {
                    Ok(()) => {
                        tracing::debug!("held transaction {id} terminated: {target}");
                        let _ = reply.send(Ok(()));
                    }
                    Err(cause) => {
                        // A failed commit leaves nothing durable; the
                        // database has rolled the transaction back.
                        tracing::error!(
                            "held transaction {id} failed to terminate ({target}): {cause}"
                        );
                        *state.lock() = TransactionState::RolledBack;
                        let _ = reply.send(Err(HoldError::Operation {
                            cause,
                            transaction_rolled_back: true,
                        }));
                    }
                }
                return;
            }
        }
    }

    // Every sender is gone without a terminate instruction: the holder was
    // dropped. Roll back.
    tracing::warn!("held transaction {id} abandoned without termination; rolling back");
    *state.lock() = TransactionState::RolledBack;
    let _ = conn.rollback();
}

fn open_outer_transaction(db: &dyn Database) -> std::result::Result<Box<dyn Connection>, DbError> {
    let mut conn = db.acquire()?;
    conn.begin()?;
    Ok(conn)
}

/// Run one action inside its own savepoint. On action failure the
/// savepoint is rolled back, leaving the outer transaction intact; a
/// savepoint primitive failing is fatal to the whole held transaction.
fn execute_in_savepoint(
    conn: &mut dyn Connection,
    savepoint: &str,
    action: DbAction,
) -> std::result::Result<Value, OpFailure> {
    conn.savepoint(savepoint).map_err(OpFailure::Fatal)?;
    match action(conn) {
        Ok(value) => match conn.release_savepoint(savepoint) {
            Ok(()) => Ok(value),
            Err(release_err) => Err(OpFailure::Fatal(release_err)),
        },
        Err(cause) => match conn.rollback_to_savepoint(savepoint) {
            Ok(()) => Err(OpFailure::Recovered(cause)),
            Err(restore_err) => {
                tracing::error!("failed to restore savepoint {savepoint}: {restore_err}");
                Err(OpFailure::Fatal(cause))
            }
        },
    }
}

/// Fail a queued operation after the worker has already given up.
fn fail_operation(op: Operation, cause: DbError) {
    let error = HoldError::Operation {
        cause,
        transaction_rolled_back: true,
    };
    match op {
        Operation::ReadyProbe { reply } => {
            let _ = reply.send(Err(error));
        }
        Operation::Execute { reply, .. } => {
            let _ = reply.send(Err(error));
        }
        Operation::Terminate { reply, .. } => {
            let _ = reply.send(Err(error));
        }
    }
}
