//! Nested transactions over a shared connection via `SAVEPOINT`.
//!
//! SQLite's own savepoints are real nested transactions, so unlike a store that has to
//! fake nesting with a compensation log, `rollback_to_savepoint` here is literally
//! `ROLLBACK TO`. `OperationDescriptor` is still recorded on each call that goes through
//! `execute_in_transaction`, kept as an audit trail rather than a replay log.
//!
//! The savepoint stack belongs to the connection, not to any one call: two transactions
//! opened on the same connection share it, so every method here takes the connection by
//! reference rather than locking it itself. `execute_in_transaction` is the only place
//! that acquires the mutex, and it holds the guard for `SAVEPOINT`, the caller's work, and
//! `RELEASE`/`ROLLBACK TO` as one uninterrupted sequence — otherwise a second worker could
//! push its own savepoint onto the stack between this transaction's `SAVEPOINT` and its
//! `RELEASE`, and the `RELEASE` would resolve the wrong frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use serde::Serialize;

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationDescriptor {
    pub kind: OperationKind,
    pub target: String,
    pub target_id: String,
    pub data: Option<serde_json::Value>,
    pub rollback_data: Option<serde_json::Value>,
}

/// A handle to an open savepoint frame. Dropping it without calling `commit` or
/// `rollback` leaves the savepoint open; callers are expected to resolve it explicitly
/// (the metadata store's own methods always do).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnHandle {
    name: String,
}

pub struct TransactionManager {
    conn: Arc<Mutex<Connection>>,
    counter: AtomicU64,
}

impl TransactionManager {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn, counter: AtomicU64::new(0) }
    }

    fn next_name(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}_{n}")
    }

    /// Locks the connection for the caller; hold the returned guard for as long as the
    /// transaction is open and pass `&*guard` to every other method on this type.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    pub fn begin_transaction(&self, conn: &Connection) -> Result<TxnHandle, StoreError> {
        let name = self.next_name("txn");
        conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(TxnHandle { name })
    }

    /// Nested transactions share the parent's connection; the parent handle is only
    /// used to order `SAVEPOINT` nesting in the caller's code, never inspected here.
    pub fn begin_nested(&self, conn: &Connection, _parent: &TxnHandle) -> Result<TxnHandle, StoreError> {
        let name = self.next_name("nested");
        conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(TxnHandle { name })
    }

    pub fn create_savepoint(&self, conn: &Connection, label: &str) -> Result<TxnHandle, StoreError> {
        let name = self.next_name(label);
        conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(TxnHandle { name })
    }

    pub fn rollback_to_savepoint(&self, conn: &Connection, handle: &TxnHandle) -> Result<(), StoreError> {
        conn.execute_batch(&format!("ROLLBACK TO {}", handle.name))?;
        Ok(())
    }

    pub fn release_savepoint(&self, conn: &Connection, handle: TxnHandle) -> Result<(), StoreError> {
        conn.execute_batch(&format!("RELEASE {}", handle.name))?;
        Ok(())
    }

    pub fn commit(&self, conn: &Connection, handle: TxnHandle) -> Result<(), StoreError> {
        self.release_savepoint(conn, handle)
    }

    pub fn rollback(&self, conn: &Connection, handle: TxnHandle) -> Result<(), StoreError> {
        self.rollback_to_savepoint(conn, &handle)?;
        self.release_savepoint(conn, handle)
    }

    /// Locks the connection once and holds it for `SAVEPOINT`, `f`, and
    /// `RELEASE`/`ROLLBACK TO` as a single sequence, auto-committing on `Ok` and
    /// auto-rolling-back on `Err`. Nothing else can interleave a savepoint on this
    /// connection while `f` runs.
    pub fn execute_in_transaction<T>(
        &self,
        f: impl FnOnce(&Connection, &TxnHandle) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.lock();
        let handle = self.begin_transaction(&conn)?;
        match f(&conn, &handle) {
            Ok(value) => {
                self.commit(&conn, handle)?;
                Ok(value)
            }
            Err(err) => {
                // best-effort: if the rollback itself fails the original error still wins
                let _ = self.rollback(&conn, handle);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn_with_table() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn commit_persists_writes() {
        let conn = conn_with_table();
        let mgr = TransactionManager::new(conn.clone());
        mgr.execute_in_transaction(|conn, _| {
            conn.execute("INSERT INTO t VALUES (1)", []).unwrap();
            Ok::<_, StoreError>(())
        })
        .unwrap();
        let count: i64 = conn.lock().unwrap().query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn rollback_discards_writes() {
        let conn = conn_with_table();
        let mgr = TransactionManager::new(conn.clone());
        let result: Result<(), StoreError> = mgr.execute_in_transaction(|conn, _| {
            conn.execute("INSERT INTO t VALUES (1)", []).unwrap();
            Err(StoreError::NotFound("forced".into()))
        });
        assert!(result.is_err());
        let count: i64 = conn.lock().unwrap().query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn nested_rollback_keeps_parent_writes() {
        let conn = conn_with_table();
        let mgr = TransactionManager::new(conn.clone());
        let guard = mgr.lock();
        let outer = mgr.begin_transaction(&guard).unwrap();
        guard.execute("INSERT INTO t VALUES (1)", []).unwrap();
        let inner = mgr.begin_nested(&guard, &outer).unwrap();
        guard.execute("INSERT INTO t VALUES (2)", []).unwrap();
        mgr.rollback(&guard, inner).unwrap();
        mgr.commit(&guard, outer).unwrap();
        let count: i64 = guard.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
        drop(guard);
    }

    #[test]
    fn concurrent_transactions_do_not_interleave_savepoints() {
        use std::sync::Barrier;
        use std::thread;

        let conn = conn_with_table();
        let mgr = Arc::new(TransactionManager::new(conn.clone()));
        let barrier = Arc::new(Barrier::new(2));

        let mut handles = Vec::new();
        for i in 0..2 {
            let mgr = mgr.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                mgr.execute_in_transaction(|conn, _| {
                    conn.execute("INSERT INTO t VALUES (?1)", [i]).unwrap();
                    Ok::<_, StoreError>(())
                })
                .unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let count: i64 = conn.lock().unwrap().query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2, "both transactions must commit cleanly with no \"no such savepoint\" panics");
    }
}
