//! Transactions and transaction workers.
//!
//! A [`Transaction`] is an ordered list of queries executed under strict
//! two-phase locking: reads take shared locks, writes exclusive ones, and
//! every lock is held until commit or abort. Lock acquisition never waits
//! (the manager refuses conflicting requests outright), so an aborted
//! transaction simply rolls back its before-images and lets its
//! [`TransactionWorker`] retry it a bounded number of times.

#[cfg(test)]
mod tests;

use common::DbResult;
use lock::{LockManager, LockMode, TxnId};
use query::Query;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use table::Table;
use tracing::{debug, warn};
use wal::{LogManager, OpRecord};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// One queued operation against a table.
#[derive(Clone, Debug)]
pub enum Op {
    Insert { values: Vec<i64> },
    Update { key: i64, deltas: Vec<Option<i64>> },
    Delete { key: i64 },
    Select { key: i64, column: usize, projection: Vec<bool> },
    SelectVersion { key: i64, column: usize, projection: Vec<bool>, version: i64 },
    Sum { lo: i64, hi: i64, column: usize },
    SumVersion { lo: i64, hi: i64, column: usize, version: i64 },
    Increment { key: i64, column: usize },
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::Insert { .. } => "insert",
            Op::Update { .. } => "update",
            Op::Delete { .. } => "delete",
            Op::Select { .. } => "select",
            Op::SelectVersion { .. } => "select_version",
            Op::Sum { .. } => "sum",
            Op::SumVersion { .. } => "sum_version",
            Op::Increment { .. } => "increment",
        }
    }

    fn lock_mode(&self) -> LockMode {
        match self {
            Op::Select { .. } | Op::SelectVersion { .. } | Op::Sum { .. } | Op::SumVersion { .. } => {
                LockMode::Shared
            }
            _ => LockMode::Exclusive,
        }
    }

    fn is_mutating(&self) -> bool {
        self.lock_mode() == LockMode::Exclusive
    }
}

struct QueryCall {
    table: Arc<Table>,
    op: Op,
}

enum Undo {
    Remove { table: Arc<Table>, key: i64 },
    Restore { table: Arc<Table>, key: i64, values: Vec<Option<i64>> },
    Reinsert { table: Arc<Table>, values: Vec<i64> },
}

impl Undo {
    fn apply(&self) -> DbResult<()> {
        match self {
            Undo::Remove { table, key } => table.delete(*key),
            Undo::Restore { table, key, values } => table.update(*key, values),
            Undo::Reinsert { table, values } => table.insert(values).map(|_| ()),
        }
    }
}

/// An ordered batch of queries that commits or aborts as a unit.
pub struct Transaction {
    id: TxnId,
    locks: Arc<LockManager>,
    log: Arc<LogManager>,
    calls: Vec<QueryCall>,
}

impl Transaction {
    pub fn new(locks: Arc<LockManager>, log: Arc<LogManager>) -> Self {
        Self {
            id: NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed),
            locks,
            log,
            calls: Vec::new(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Append a query to the transaction.
    pub fn add_query(&mut self, table: Arc<Table>, op: Op) {
        self.calls.push(QueryCall { table, op });
    }

    /// Record identity the operation must lock, if it names a single row.
    /// Locks are keyed by primary key, which also covers rows the
    /// transaction is about to insert.
    fn lock_target(call: &QueryCall) -> Option<i64> {
        match &call.op {
            Op::Insert { values } => values.get(call.table.key_column()).copied(),
            Op::Update { key, .. }
            | Op::Delete { key }
            | Op::Increment { key, .. } => Some(*key),
            Op::Select { key, column, .. } | Op::SelectVersion { key, column, .. } => {
                (*column == call.table.key_column()).then_some(*key)
            }
            Op::Sum { .. } | Op::SumVersion { .. } => None,
        }
    }

    /// Execute the queued operations.
    ///
    /// Returns `Ok(true)` on commit and `Ok(false)` after a rolled-back
    /// abort worth retrying. Fatal faults roll back, release every lock,
    /// and surface as `Err`.
    pub fn run(&self) -> DbResult<bool> {
        let mut held: Vec<(String, i64)> = Vec::new();
        let mut undo: Vec<Undo> = Vec::new();

        for call in &self.calls {
            if let Some(target) = Self::lock_target(call) {
                let name = call.table.name().to_string();
                if !self.locks.acquire(&name, target, self.id, call.op.lock_mode()) {
                    debug!(txn = self.id, table = %name, key = target, "lock refused, aborting");
                    self.abort(&mut undo, &held);
                    return Ok(false);
                }
                if !held.contains(&(name.clone(), target)) {
                    held.push((name, target));
                }
            }

            match self.capture_before_image(call) {
                Ok(Some(image)) => undo.push(image),
                Ok(None) => {}
                Err(e) => {
                    self.abort(&mut undo, &held);
                    return Err(e);
                }
            }

            if let Err(e) = self.log_call(call) {
                self.abort(&mut undo, &held);
                return Err(e);
            }

            match self.execute(call) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(txn = self.id, op = call.op.name(), "operation failed, aborting");
                    self.abort(&mut undo, &held);
                    return Ok(false);
                }
                Err(e) => {
                    self.abort(&mut undo, &held);
                    return Err(e);
                }
            }

            if call.op.is_mutating() {
                if let Op::Insert { values } = &call.op {
                    if let Some(key) = values.get(call.table.key_column()).copied() {
                        undo.push(Undo::Remove { table: call.table.clone(), key });
                    }
                }
                call.table.snapshot_directory();
            }
        }

        self.commit(&held)?;
        Ok(true)
    }

    /// Snapshot the row a mutating operation is about to change.
    fn capture_before_image(&self, call: &QueryCall) -> DbResult<Option<Undo>> {
        let key = match &call.op {
            Op::Update { key, .. } | Op::Increment { key, .. } | Op::Delete { key } => *key,
            _ => return Ok(None),
        };
        let projection = vec![true; call.table.num_columns()];
        let current = match call.table.select(key, &projection) {
            Ok(records) => records.into_iter().next(),
            Err(e) if e.is_fatal() => return Err(e),
            // Let execution report the failure (e.g. a missing key).
            Err(_) => return Ok(None),
        };
        let Some(record) = current else {
            return Ok(None);
        };
        match &call.op {
            Op::Delete { .. } => {
                let values: Option<Vec<i64>> = record.columns.iter().copied().collect();
                Ok(values.map(|values| Undo::Reinsert { table: call.table.clone(), values }))
            }
            _ => Ok(Some(Undo::Restore {
                table: call.table.clone(),
                key,
                values: record.columns,
            })),
        }
    }

    fn log_call(&self, call: &QueryCall) -> DbResult<()> {
        let mut record = OpRecord::new(
            self.id,
            call.op.name(),
            call.table.name(),
            Self::lock_target(call),
        );
        record = match &call.op {
            Op::Insert { values } => record.with_values(
                (0..values.len()).collect(),
                values.iter().map(|v| Some(*v)).collect(),
            ),
            Op::Update { deltas, .. } => record.with_values(
                deltas
                    .iter()
                    .enumerate()
                    .filter_map(|(i, d)| d.map(|_| i))
                    .collect(),
                deltas.clone(),
            ),
            _ => record,
        };
        self.log.log_operation(&record)
    }

    fn execute(&self, call: &QueryCall) -> DbResult<bool> {
        let query = Query::new(call.table.clone());
        match &call.op {
            Op::Insert { values } => query.insert(values),
            Op::Update { key, deltas } => query.update(*key, deltas),
            Op::Delete { key } => query.delete(*key),
            Op::Select { key, column, projection } => {
                Ok(query.select(*key, *column, projection)?.is_some())
            }
            Op::SelectVersion { key, column, projection, version } => Ok(query
                .select_version(*key, *column, projection, *version)?
                .is_some()),
            Op::Sum { lo, hi, column } => Ok(query.sum(*lo, *hi, *column)?.is_some()),
            Op::SumVersion { lo, hi, column, version } => {
                Ok(query.sum_version(*lo, *hi, *column, *version)?.is_some())
            }
            Op::Increment { key, column } => query.increment(*key, *column),
        }
    }

    /// Roll back in reverse order, release every lock, log the abort.
    fn abort(&self, undo: &mut Vec<Undo>, held: &[(String, i64)]) {
        for image in undo.drain(..).rev() {
            if let Err(e) = image.apply() {
                warn!(txn = self.id, error = %e, "rollback step failed");
            }
        }
        for (table, key) in held {
            self.locks.release(table, *key, self.id);
        }
        if let Err(e) = self.log_marker("abort") {
            warn!(txn = self.id, error = %e, "failed to log abort");
        }
    }

    fn commit(&self, held: &[(String, i64)]) -> DbResult<()> {
        self.log_marker("commit")?;
        self.log.log_recovery_point()?;
        for (table, key) in held {
            self.locks.release(table, *key, self.id);
        }
        Ok(())
    }

    fn log_marker(&self, marker: &str) -> DbResult<()> {
        self.log
            .log_operation(&OpRecord::new(self.id, marker, "", None))
    }
}

/// Runs a batch of transactions on its own OS thread, retrying aborted
/// ones a bounded number of times.
pub struct TransactionWorker {
    transactions: Vec<Transaction>,
    max_retries: usize,
    handle: Option<JoinHandle<Vec<bool>>>,
    stats: Vec<bool>,
}

impl TransactionWorker {
    pub const DEFAULT_MAX_RETRIES: usize = 3;

    pub fn new() -> Self {
        Self::with_retries(Self::DEFAULT_MAX_RETRIES)
    }

    pub fn with_retries(max_retries: usize) -> Self {
        Self {
            transactions: Vec::new(),
            max_retries,
            handle: None,
            stats: Vec::new(),
        }
    }

    pub fn add_transaction(&mut self, txn: Transaction) {
        self.transactions.push(txn);
    }

    /// Start the worker thread.
    pub fn run(&mut self) {
        let transactions = std::mem::take(&mut self.transactions);
        let max_retries = self.max_retries;
        self.handle = Some(thread::spawn(move || {
            let mut stats = Vec::with_capacity(transactions.len());
            for txn in &transactions {
                let mut committed = false;
                let mut attempts = 0;
                while !committed && attempts < max_retries {
                    match txn.run() {
                        Ok(true) => committed = true,
                        Ok(false) => {
                            attempts += 1;
                            thread::sleep(backoff(txn.id(), attempts));
                        }
                        Err(e) => {
                            warn!(txn = txn.id(), error = %e, "transaction halted");
                            break;
                        }
                    }
                }
                stats.push(committed);
            }
            stats
        }));
    }

    /// Wait for the worker thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(stats) => self.stats = stats,
                Err(_) => warn!("transaction worker thread panicked"),
            }
        }
    }

    /// Number of transactions that ultimately committed.
    pub fn result(&self) -> usize {
        self.stats.iter().filter(|committed| **committed).count()
    }

    pub fn stats(&self) -> &[bool] {
        &self.stats
    }
}

impl Default for TransactionWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry delay, jittered by transaction id so colliding transactions do
/// not retry in lock-step.
fn backoff(id: TxnId, attempt: usize) -> Duration {
    Duration::from_millis(attempt as u64 * 5 + id % 7)
}
