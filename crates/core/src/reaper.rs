//! Expired-transaction reaping

use crate::transaction::HeldTransaction;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub(crate) type Registry = HashMap<String, Arc<HeldTransaction>>;

/// Start the reaper task: every `interval`, roll back and remove every
/// held transaction whose deadline has passed.
pub(crate) fn start(registry: Arc<Mutex<Registry>>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let reaped = sweep(&registry).await;
            if reaped > 0 {
                tracing::info!("reaper rolled back {reaped} expired held transaction(s)");
            }
        }
    })
}

/// One sweep. Returns how many entries were reaped.
///
/// Errors are logged and the entry removed anyway: the point is to free
/// the pinned connection promptly. A user-driven termination racing with
/// the sweep loses cleanly (it observes `Expired` or `NotFound`).
pub(crate) async fn sweep(registry: &Mutex<Registry>) -> usize {
    let expired: Vec<Arc<HeldTransaction>> = registry
        .lock()
        .values()
        .filter(|txn| txn.is_expired())
        .cloned()
        .collect();

    let mut reaped = 0;
    for txn in expired {
        match txn.rollback().await {
            Ok(()) => tracing::info!("reaped expired held transaction {}", txn.id()),
            Err(err) => tracing::warn!(
                "failed to roll back expired held transaction {}: {err}",
                txn.id()
            ),
        }
        registry.lock().remove(txn.id());
        reaped += 1;
    }
    reaped
}
