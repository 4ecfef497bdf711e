//! In-memory database engine
//!
//! This module provides an engine with real transaction and savepoint
//! semantics over an in-process key/value store, so the held-transaction
//! machinery can be exercised end to end without a database server.

use crate::connection::{Connection, Database};
use crate::error::{DbError, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type Store = HashMap<String, Option<Value>>;

/// In-memory database.
///
/// Connections acquired from the same `MemoryDb` share one committed
/// store; uncommitted work is visible only on the connection holding it.
pub struct MemoryDb {
    committed: Arc<Mutex<HashMap<String, Value>>>,
    broken: Arc<AtomicBool>,
}

impl MemoryDb {
    /// Create a new empty database.
    pub fn new() -> Self {
        Self {
            committed: Arc::new(Mutex::new(HashMap::new())),
            broken: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate losing the database: every operation on every connection
    /// fails with `ConnectionLost` until `restore_connections` is called.
    pub fn break_connections(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Undo `break_connections`.
    pub fn restore_connections(&self) {
        self.broken.store(false, Ordering::SeqCst);
    }
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

impl Database for MemoryDb {
    fn acquire(&self) -> Result<Box<dyn Connection>> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(DbError::ConnectionLost(
                "database is unreachable".to_string(),
            ));
        }
        Ok(Box::new(MemoryConnection {
            committed: Arc::clone(&self.committed),
            broken: Arc::clone(&self.broken),
            tx: None,
        }))
    }

    fn supports_savepoints(&self) -> bool {
        true
    }
}

/// Transactional state of one connection: a delta overlay over the
/// committed store plus a stack of named savepoint snapshots.
struct TxState {
    /// Pending writes. `None` marks a deletion.
    working: Store,
    savepoints: Vec<(String, Store)>,
}

/// One connection to a `MemoryDb`.
pub struct MemoryConnection {
    committed: Arc<Mutex<HashMap<String, Value>>>,
    broken: Arc<AtomicBool>,
    tx: Option<TxState>,
}

impl MemoryConnection {
    fn check_alive(&self) -> Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(DbError::ConnectionLost(
                "database connection closed".to_string(),
            ));
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Option<Value> {
        if let Some(tx) = &self.tx {
            if let Some(entry) = tx.working.get(key) {
                return entry.clone();
            }
        }
        self.committed.lock().get(key).cloned()
    }

    fn write(&mut self, key: String, value: Option<Value>) {
        match &mut self.tx {
            Some(tx) => {
                tx.working.insert(key, value);
            }
            // No open transaction: apply directly, one write per statement.
            None => {
                let mut committed = self.committed.lock();
                match value {
                    Some(v) => {
                        committed.insert(key, v);
                    }
                    None => {
                        committed.remove(&key);
                    }
                }
            }
        }
    }
}

impl Connection for MemoryConnection {
    fn begin(&mut self) -> Result<()> {
        self.check_alive()?;
        if self.tx.is_some() {
            return Err(DbError::Internal(
                "transaction already in progress".to_string(),
            ));
        }
        self.tx = Some(TxState {
            working: HashMap::new(),
            savepoints: Vec::new(),
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.check_alive()?;
        let tx = self.tx.take().ok_or(DbError::NoTransaction)?;
        let mut committed = self.committed.lock();
        for (key, value) in tx.working {
            match value {
                Some(v) => {
                    committed.insert(key, v);
                }
                None => {
                    committed.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.check_alive()?;
        self.tx.take().ok_or(DbError::NoTransaction)?;
        Ok(())
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        self.check_alive()?;
        let tx = self.tx.as_mut().ok_or(DbError::NoTransaction)?;
        tx.savepoints.push((name.to_string(), tx.working.clone()));
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.check_alive()?;
        let tx = self.tx.as_mut().ok_or(DbError::NoTransaction)?;
        let idx = tx
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| DbError::NoSavepoint(name.to_string()))?;
        tx.savepoints.remove(idx);
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.check_alive()?;
        let tx = self.tx.as_mut().ok_or(DbError::NoTransaction)?;
        let idx = tx
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| DbError::NoSavepoint(name.to_string()))?;
        let (_, snapshot) = tx.savepoints.remove(idx);
        // The savepoint and everything opened after it are gone.
        tx.savepoints.truncate(idx);
        tx.working = snapshot;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    fn put(&mut self, key: &str, value: Value) -> Result<()> {
        self.check_alive()?;
        if key.is_empty() {
            return Err(DbError::Validation("key must not be empty".to_string()));
        }
        self.write(key.to_string(), Some(value));
        Ok(())
    }

    fn put_unique(&mut self, key: &str, value: Value) -> Result<()> {
        self.check_alive()?;
        if key.is_empty() {
            return Err(DbError::Validation("key must not be empty".to_string()));
        }
        if self.read(key).is_some() {
            return Err(DbError::Duplicate(key.to_string()));
        }
        self.write(key.to_string(), Some(value));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check_alive()?;
        Ok(self.read(key))
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        self.check_alive()?;
        let existed = self.read(key).is_some();
        self.write(key.to_string(), None);
        Ok(existed)
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        self.check_alive()?;
        let mut merged: HashMap<String, Value> = self
            .committed
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(tx) = &self.tx {
            for (key, value) in &tx.working {
                if !key.starts_with(prefix) {
                    continue;
                }
                match value {
                    Some(v) => {
                        merged.insert(key.clone(), v.clone());
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }
        }
        let mut rows: Vec<(String, Value)> = merged.into_iter().collect();
        rows.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::autocommit;
    use serde_json::json;

    #[test]
    fn committed_writes_are_visible_to_other_connections() {
        let db = MemoryDb::new();
        let mut a = db.acquire().unwrap();
        a.begin().unwrap();
        a.put("users/1", json!({"name": "A"})).unwrap();

        // Uncommitted work is only visible on the holding connection.
        let b = db.acquire().unwrap();
        assert_eq!(b.get("users/1").unwrap(), None);
        assert_eq!(a.get("users/1").unwrap(), Some(json!({"name": "A"})));

        a.commit().unwrap();
        assert_eq!(b.get("users/1").unwrap(), Some(json!({"name": "A"})));
    }

    #[test]
    fn rollback_discards_the_transaction() {
        let db = MemoryDb::new();
        let mut conn = db.acquire().unwrap();
        conn.begin().unwrap();
        conn.put("k", json!(1)).unwrap();
        conn.rollback().unwrap();

        let check = db.acquire().unwrap();
        assert_eq!(check.get("k").unwrap(), None);
        assert!(!conn.in_transaction());
    }

    #[test]
    fn rollback_to_savepoint_keeps_earlier_work() {
        let db = MemoryDb::new();
        let mut conn = db.acquire().unwrap();
        conn.begin().unwrap();
        conn.put("kept", json!(1)).unwrap();

        conn.savepoint("sp1").unwrap();
        conn.put("discarded", json!(2)).unwrap();
        conn.delete("kept").unwrap();
        conn.rollback_to_savepoint("sp1").unwrap();

        assert_eq!(conn.get("kept").unwrap(), Some(json!(1)));
        assert_eq!(conn.get("discarded").unwrap(), None);

        conn.commit().unwrap();
        let check = db.acquire().unwrap();
        assert_eq!(check.get("kept").unwrap(), Some(json!(1)));
        assert_eq!(check.get("discarded").unwrap(), None);
    }

    #[test]
    fn savepoints_nest_lifo() {
        let db = MemoryDb::new();
        let mut conn = db.acquire().unwrap();
        conn.begin().unwrap();
        conn.savepoint("outer").unwrap();
        conn.put("a", json!(1)).unwrap();
        conn.savepoint("inner").unwrap();
        conn.put("b", json!(2)).unwrap();

        // Rolling back to the outer savepoint discards the inner one too.
        conn.rollback_to_savepoint("outer").unwrap();
        assert_eq!(conn.get("a").unwrap(), None);
        assert_eq!(conn.get("b").unwrap(), None);
        assert!(matches!(
            conn.rollback_to_savepoint("inner"),
            Err(DbError::NoSavepoint(_))
        ));
    }

    #[test]
    fn release_savepoint_keeps_changes() {
        let db = MemoryDb::new();
        let mut conn = db.acquire().unwrap();
        conn.begin().unwrap();
        conn.savepoint("sp").unwrap();
        conn.put("k", json!(3)).unwrap();
        conn.release_savepoint("sp").unwrap();
        assert_eq!(conn.get("k").unwrap(), Some(json!(3)));
    }

    #[test]
    fn put_unique_rejects_existing_keys() {
        let db = MemoryDb::new();
        let mut conn = db.acquire().unwrap();
        conn.put("users/1", json!({})).unwrap();

        let err = conn.put_unique("users/1", json!({})).unwrap_err();
        assert!(err.is_validation());

        let err = conn.put("", json!(1)).unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
    }

    #[test]
    fn savepoint_primitives_require_a_transaction() {
        let db = MemoryDb::new();
        let mut conn = db.acquire().unwrap();
        assert!(matches!(conn.savepoint("sp"), Err(DbError::NoTransaction)));
        assert!(matches!(conn.commit(), Err(DbError::NoTransaction)));
        assert!(matches!(conn.rollback(), Err(DbError::NoTransaction)));
    }

    #[test]
    fn broken_connection_fails_every_operation() {
        let db = MemoryDb::new();
        let mut conn = db.acquire().unwrap();
        conn.begin().unwrap();
        db.break_connections();

        assert!(matches!(
            conn.put("k", json!(1)),
            Err(DbError::ConnectionLost(_))
        ));
        assert!(matches!(conn.commit(), Err(DbError::ConnectionLost(_))));
        assert!(matches!(db.acquire().err(), Some(DbError::ConnectionLost(_))));

        db.restore_connections();
        assert!(db.acquire().is_ok());
    }

    #[test]
    fn scan_merges_overlay_and_committed_rows() {
        let db = MemoryDb::new();
        let mut seed = db.acquire().unwrap();
        seed.put("users/1", json!("a")).unwrap();
        seed.put("users/2", json!("b")).unwrap();
        seed.put("orders/1", json!("x")).unwrap();

        let mut conn = db.acquire().unwrap();
        conn.begin().unwrap();
        conn.put("users/3", json!("c")).unwrap();
        conn.delete("users/1").unwrap();

        let rows = conn.scan("users/").unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["users/2", "users/3"]);
    }

    #[test]
    fn autocommit_commits_on_success_and_rolls_back_on_error() {
        let db = MemoryDb::new();

        let value = autocommit(&db, |conn| {
            conn.put("k", json!(1))?;
            Ok(json!("done"))
        })
        .unwrap();
        assert_eq!(value, json!("done"));
        assert_eq!(db.acquire().unwrap().get("k").unwrap(), Some(json!(1)));

        let err = autocommit(&db, |conn| {
            conn.put("gone", json!(2))?;
            Err(DbError::Validation("bad row".to_string()))
        })
        .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(db.acquire().unwrap().get("gone").unwrap(), None);
    }
}
