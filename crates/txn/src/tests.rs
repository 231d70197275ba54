use super::*;
use buffer::BufferPool;
use common::Config;
use parking_lot::Mutex;
use tempfile::{TempDir, tempdir};

const ALL: [bool; 5] = [true; 5];

struct Fixture {
    _dir: TempDir,
    table: Arc<Table>,
    locks: Arc<LockManager>,
    log: Arc<LogManager>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let config = Config::builder()
            .data_dir(dir.path().to_path_buf())
            .buffer_pool_pages(64)
            .merge_trigger(1_000_000)
            .build();
        let pool = Arc::new(Mutex::new(BufferPool::new(config.buffer_pool_pages)));
        let log = Arc::new(LogManager::new(config.log_directory()).unwrap());
        let table =
            Arc::new(Table::create("grades", 5, 0, dir.path(), pool, config).unwrap());
        Self {
            _dir: dir,
            table,
            locks: Arc::new(LockManager::new()),
            log,
        }
    }

    fn txn(&self) -> Transaction {
        Transaction::new(self.locks.clone(), self.log.clone())
    }

    fn current(&self, key: i64) -> Vec<i64> {
        self.table.select(key, &ALL).unwrap()[0]
            .columns
            .iter()
            .map(|c| c.unwrap())
            .collect()
    }
}

#[test]
fn a_transaction_commits_its_queries_in_order() {
    let fx = Fixture::new();
    let mut txn = fx.txn();
    txn.add_query(fx.table.clone(), Op::Insert { values: vec![1, 10, 20, 30, 40] });
    txn.add_query(
        fx.table.clone(),
        Op::Update { key: 1, deltas: vec![None, None, Some(99), None, None] },
    );
    txn.add_query(
        fx.table.clone(),
        Op::Select { key: 1, column: 0, projection: ALL.to_vec() },
    );

    assert_eq!(txn.run().unwrap(), true);
    assert_eq!(fx.current(1), vec![1, 10, 99, 30, 40]);
    // All locks are gone after commit.
    assert_eq!(fx.locks.holders("grades", 1), 0);
}

#[test]
fn a_failed_query_aborts_and_rolls_back() {
    let fx = Fixture::new();
    fx.table.insert(&[1, 10, 20, 30, 40]).unwrap();

    let mut txn = fx.txn();
    txn.add_query(
        fx.table.clone(),
        Op::Update { key: 1, deltas: vec![None, Some(0), None, None, None] },
    );
    // Updating a missing key fails and must undo the first update.
    txn.add_query(
        fx.table.clone(),
        Op::Update { key: 99, deltas: vec![None, Some(0), None, None, None] },
    );

    assert_eq!(txn.run().unwrap(), false);
    assert_eq!(fx.current(1), vec![1, 10, 20, 30, 40]);
    assert_eq!(fx.locks.holders("grades", 1), 0);
}

#[test]
fn an_aborted_insert_is_removed() {
    let fx = Fixture::new();
    fx.table.insert(&[5, 0, 0, 0, 0]).unwrap();

    let mut txn = fx.txn();
    txn.add_query(fx.table.clone(), Op::Insert { values: vec![6, 1, 1, 1, 1] });
    // Duplicate: fails, so the insert of 6 must be rolled back.
    txn.add_query(fx.table.clone(), Op::Insert { values: vec![5, 2, 2, 2, 2] });

    assert_eq!(txn.run().unwrap(), false);
    assert!(matches!(
        fx.table.select(6, &ALL),
        Err(common::DbError::NotFound(_))
    ));
    assert_eq!(fx.current(5), vec![5, 0, 0, 0, 0]);
}

#[test]
fn an_aborted_delete_is_reinserted() {
    let fx = Fixture::new();
    fx.table.insert(&[1, 10, 20, 30, 40]).unwrap();

    let mut txn = fx.txn();
    txn.add_query(fx.table.clone(), Op::Delete { key: 1 });
    txn.add_query(fx.table.clone(), Op::Delete { key: 77 }); // fails

    assert_eq!(txn.run().unwrap(), false);
    assert_eq!(fx.current(1), vec![1, 10, 20, 30, 40]);
}

#[test]
fn a_conflicting_lock_aborts_immediately() {
    let fx = Fixture::new();
    fx.table.insert(&[1, 0, 0, 0, 0]).unwrap();

    // A foreign transaction holds the row exclusively.
    assert!(fx.locks.acquire("grades", 1, 9_999, LockMode::Exclusive));

    let mut txn = fx.txn();
    txn.add_query(
        fx.table.clone(),
        Op::Update { key: 1, deltas: vec![None, Some(5), None, None, None] },
    );
    assert_eq!(txn.run().unwrap(), false);
    // The row was never touched.
    assert_eq!(fx.current(1), vec![1, 0, 0, 0, 0]);

    fx.locks.release("grades", 1, 9_999);
    assert_eq!(txn.run().unwrap(), true);
    assert_eq!(fx.current(1), vec![1, 5, 0, 0, 0]);
}

#[test]
fn shared_locks_do_not_block_reads() {
    let fx = Fixture::new();
    fx.table.insert(&[1, 0, 0, 0, 0]).unwrap();
    assert!(fx.locks.acquire("grades", 1, 9_999, LockMode::Shared));

    let mut txn = fx.txn();
    txn.add_query(
        fx.table.clone(),
        Op::Select { key: 1, column: 0, projection: ALL.to_vec() },
    );
    assert_eq!(txn.run().unwrap(), true);
    fx.locks.release("grades", 1, 9_999);
}

#[test]
fn operations_are_logged_before_commit() {
    let fx = Fixture::new();
    let mut txn = fx.txn();
    let id = txn.id();
    txn.add_query(fx.table.clone(), Op::Insert { values: vec![1, 2, 3, 4, 5] });
    txn.run().unwrap();

    let records = fx.log.since(0.0).unwrap();
    let ops: Vec<&str> = records
        .iter()
        .filter(|r| r.txn == id)
        .map(|r| r.op.as_str())
        .collect();
    assert_eq!(ops, vec!["insert", "commit"]);
    assert_eq!(records[0].values.as_ref().unwrap().len(), 5);
    assert_eq!(fx.log.recovery_points().unwrap().len(), 1);
}

#[test]
fn aborts_are_logged() {
    let fx = Fixture::new();
    let mut txn = fx.txn();
    let id = txn.id();
    txn.add_query(fx.table.clone(), Op::Delete { key: 404 });
    assert_eq!(txn.run().unwrap(), false);

    let ops: Vec<String> = fx
        .log
        .since(0.0)
        .unwrap()
        .into_iter()
        .filter(|r| r.txn == id)
        .map(|r| r.op)
        .collect();
    assert_eq!(ops, vec!["delete".to_string(), "abort".to_string()]);
}

#[test]
fn mutating_queries_snapshot_the_directory() {
    let fx = Fixture::new();
    let mut txn = fx.txn();
    txn.add_query(fx.table.clone(), Op::Insert { values: vec![1, 0, 0, 0, 0] });
    txn.add_query(
        fx.table.clone(),
        Op::Update { key: 1, deltas: vec![None, Some(1), None, None, None] },
    );
    txn.run().unwrap();
    assert_eq!(fx.table.version_snapshots(), 2);
}

#[test]
fn worker_counts_committed_transactions() {
    let fx = Fixture::new();
    let mut worker = TransactionWorker::new();
    for i in 0..5 {
        let mut txn = fx.txn();
        txn.add_query(
            fx.table.clone(),
            Op::Insert { values: vec![i, i, i, i, i] },
        );
        worker.add_transaction(txn);
    }
    // A transaction that can never succeed: updates a missing key.
    let mut doomed = fx.txn();
    doomed.add_query(
        fx.table.clone(),
        Op::Update { key: 1_000, deltas: vec![None, Some(1), None, None, None] },
    );
    worker.add_transaction(doomed);

    worker.run();
    worker.join();
    assert_eq!(worker.result(), 5);
    assert_eq!(worker.stats(), &[true, true, true, true, true, false]);
}

#[test]
fn increment_composes_select_and_update() {
    let fx = Fixture::new();
    fx.table.insert(&[1, 0, 0, 0, 0]).unwrap();

    let mut txn = fx.txn();
    txn.add_query(fx.table.clone(), Op::Increment { key: 1, column: 2 });
    txn.add_query(fx.table.clone(), Op::Increment { key: 1, column: 2 });
    assert_eq!(txn.run().unwrap(), true);
    assert_eq!(fx.current(1)[2], 2);
}
