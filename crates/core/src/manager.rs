//! Held-transaction registry
//!
//! The `Manager` is the single process-wide entry point for held
//! transactions: it creates them, finds them, terminates them, enforces
//! the concurrency budget and runs the reaper. The embedding application
//! constructs one and shares it; being a singleton is a property of the
//! wiring, not of the type.

use crate::clock::{Clock, SystemClock};
use crate::config::HoldConfig;
use crate::error::{HoldError, Result};
use crate::reaper::{self, Registry};
use crate::transaction::{HeldTransaction, TransactionState, TransactionView};
use holdtx_db::Database;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Registry of held transactions.
pub struct Manager {
    db: Arc<dyn Database>,
    config: HoldConfig,
    clock: Arc<dyn Clock>,
    transactions: Arc<Mutex<Registry>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Manager {
    /// Create a manager over `db`. Fails if the backend does not
    /// implement nested transactions as real savepoints: per-operation
    /// isolation inside a held transaction depends on them.
    pub fn new(db: Arc<dyn Database>, config: HoldConfig) -> Result<Self> {
        Self::with_clock(db, config, Arc::new(SystemClock))
    }

    /// Create a manager with an injected clock.
    pub fn with_clock(
        db: Arc<dyn Database>,
        config: HoldConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if !db.supports_savepoints() {
            return Err(HoldError::Internal(
                "database backend does not support savepoints; held transactions cannot \
                 isolate operations"
                    .to_string(),
            ));
        }
        Ok(Self {
            db,
            config,
            clock,
            transactions: Arc::new(Mutex::new(HashMap::new())),
            reaper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &HoldConfig {
        &self.config
    }

    /// Open a new held transaction and block until its worker has begun
    /// the outer transaction. The requested timeout is clamped to
    /// `min(requested ?? default_timeout, max_timeout)`.
    pub async fn create(&self, timeout_secs: Option<u64>) -> Result<Arc<HeldTransaction>> {
        {
            let transactions = self.transactions.lock();
            if transactions.len() >= self.config.max_concurrent {
                return Err(HoldError::ConcurrencyLimit(self.config.max_concurrent));
            }
        }

        // The count can only shrink between the check above and the insert
        // below; entries enter solely through this gate.
        let timeout = self.config.clamp_timeout(timeout_secs);
        let txn =
            HeldTransaction::open(Arc::clone(&self.db), timeout, Arc::clone(&self.clock)).await?;
        self.transactions
            .lock()
            .insert(txn.id().to_string(), Arc::clone(&txn));

        tracing::debug!("opened held transaction {} (timeout {timeout}s)", txn.id());
        Ok(txn)
    }

    /// Look up a held transaction by id.
    pub fn find(&self, id: &str) -> Result<Arc<HeldTransaction>> {
        self.transactions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| HoldError::NotFound(id.to_string()))
    }

    /// Commit a held transaction and remove it from the registry. A
    /// second call for the same id fails with `NotFound`.
    pub async fn commit(&self, id: &str) -> Result<TransactionView> {
        self.terminate(id, TransactionState::Committed).await
    }

    /// Roll a held transaction back and remove it from the registry.
    pub async fn rollback(&self, id: &str) -> Result<TransactionView> {
        self.terminate(id, TransactionState::RolledBack).await
    }

    async fn terminate(&self, id: &str, target: TransactionState) -> Result<TransactionView> {
        let txn = self.find(id)?;
        if !txn.is_open() {
            // Lost a race against the reaper or another caller; the entry
            // is on its way out of the registry.
            self.transactions.lock().remove(id);
            return Err(HoldError::Expired(id.to_string()));
        }

        let result = match target {
            TransactionState::Committed => txn.commit().await,
            _ => txn.rollback().await,
        };
        self.transactions.lock().remove(id);
        result?;

        tracing::info!("held transaction {id} {}", txn.state());
        Ok(txn.as_view())
    }

    /// Snapshot of the held transactions that are still open, oldest
    /// first.
    pub fn active_transactions(&self) -> Vec<Arc<HeldTransaction>> {
        let mut open: Vec<Arc<HeldTransaction>> = self
            .transactions
            .lock()
            .values()
            .filter(|txn| txn.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|txn| txn.created_at());
        open
    }

    /// Number of held transactions that are still open.
    pub fn active_count(&self) -> usize {
        self.transactions
            .lock()
            .values()
            .filter(|txn| txn.is_open())
            .count()
    }

    /// Start the background reaper. Idempotent.
    pub fn start_reaper(&self) {
        let mut reaper = self.reaper.lock();
        if reaper.is_some() {
            return;
        }
        *reaper = Some(reaper::start(
            Arc::clone(&self.transactions),
            self.config.reaper_interval(),
        ));
    }

    /// Stop the background reaper, if running.
    pub fn stop_reaper(&self) {
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
        }
    }

    /// Run one reaper sweep immediately. Returns how many expired
    /// transactions were rolled back.
    pub async fn reap_expired(&self) -> usize {
        reaper::sweep(&self.transactions).await
    }

    /// Roll back and drop every held transaction, leaving the manager
    /// usable.
    pub async fn reset(&self) {
        let remaining: Vec<Arc<HeldTransaction>> = {
            let mut transactions = self.transactions.lock();
            transactions.drain().map(|(_, txn)| txn).collect()
        };
        for txn in remaining {
            if let Err(err) = txn.rollback().await {
                tracing::warn!("failed to roll back held transaction {}: {err}", txn.id());
            }
        }
    }

    /// Stop the reaper and roll back everything still held.
    pub async fn shutdown(&self) {
        self.stop_reaper();
        self.reset().await;
    }
}
