//! Strict two-phase-locking lock manager with no-wait deadlock avoidance.
//!
//! Locks are keyed by `(table name, record key)` and held until the owning
//! transaction commits or aborts. A request that cannot be granted fails
//! immediately; there is no queueing, so waits-for cycles cannot form and
//! the transaction runner decides whether to retry.


use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Identifier of a running transaction.
pub type TxnId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<Map<(String, i64), Map<TxnId, LockMode>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take `mode` on `(table, record)` for `txn`.
    ///
    /// Grant rules:
    /// - a holder re-requesting a mode it already covers is granted;
    /// - a sole shared holder may upgrade to exclusive;
    /// - a new shared lock is granted iff no exclusive holder exists;
    /// - a new exclusive lock is granted iff the record is unheld;
    /// - everything else fails immediately.
    pub fn acquire(&self, table: &str, record: i64, txn: TxnId, mode: LockMode) -> bool {
        let mut locks = self.locks.lock();
        let key = (table.to_string(), record);
        let holders = locks.entry(key.clone()).or_default();

        let granted = match holders.get(&txn).copied() {
            Some(LockMode::Exclusive) => true,
            Some(LockMode::Shared) => match mode {
                LockMode::Shared => true,
                LockMode::Exclusive => {
                    if holders.len() == 1 {
                        holders.insert(txn, LockMode::Exclusive);
                        true
                    } else {
                        false
                    }
                }
            },
            None => match mode {
                LockMode::Shared => {
                    if holders.values().any(|m| *m == LockMode::Exclusive) {
                        false
                    } else {
                        holders.insert(txn, LockMode::Shared);
                        true
                    }
                }
                LockMode::Exclusive => {
                    if holders.is_empty() {
                        holders.insert(txn, LockMode::Exclusive);
                        true
                    } else {
                        false
                    }
                }
            },
        };

        if holders.is_empty() {
            locks.remove(&key);
        }
        granted
    }

    /// Release `txn`'s lock on one record.
    pub fn release(&self, table: &str, record: i64, txn: TxnId) {
        let mut locks = self.locks.lock();
        let key = (table.to_string(), record);
        if let Some(holders) = locks.get_mut(&key) {
            holders.remove(&txn);
            if holders.is_empty() {
                locks.remove(&key);
            }
        }
    }

    /// Release every lock held by `txn` (commit or abort).
    pub fn release_all(&self, txn: TxnId) {
        let mut locks = self.locks.lock();
        for holders in locks.values_mut() {
            holders.remove(&txn);
        }
        locks.retain(|_, holders| !holders.is_empty());
    }

    /// Number of transactions currently holding `(table, record)`.
    pub fn holders(&self, table: &str, record: i64) -> usize {
        let locks = self.locks.lock();
        locks
            .get(&(table.to_string(), record))
            .map(|h| h.len())
            .unwrap_or(0)
    }
}
