//! Append-only operation log and recovery markers.
//!
//! Two text files live in the log directory:
//! - `transaction.log` — one JSON object per line describing an operation,
//!   written before the operation runs;
//! - `recovery.log` — one marker per commit carrying the epoch timestamp
//!   and an ISO-8601 datetime.
//!
//! Replay after a crash is `since(checkpoint)`: every operation record at
//! or after the last recovery point, with malformed lines skipped the way
//! a torn tail write would leave them.
//!
//! # Example
//!
//! ```no_run
//! use wal::{LogManager, OpRecord};
//!
//! let log = LogManager::new("data/logs").unwrap();
//! log.log_operation(&OpRecord::new(1, "insert", "grades", Some(7))).unwrap();
//! log.log_recovery_point().unwrap();
//!
//! let replay = log.since(0.0).unwrap();
//! assert_eq!(replay[0].op, "insert");
//! ```


use chrono::Utc;
use common::{DbError, DbResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// One logged operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpRecord {
    pub timestamp: f64,
    pub txn: u64,
    pub op: String,
    pub table: String,
    pub key: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Option<i64>>>,
}

impl OpRecord {
    pub fn new(txn: u64, op: &str, table: &str, key: Option<i64>) -> Self {
        Self {
            timestamp: now_seconds(),
            txn,
            op: op.to_string(),
            table: table.to_string(),
            key,
            columns: None,
            values: None,
        }
    }

    pub fn with_values(mut self, columns: Vec<usize>, values: Vec<Option<i64>>) -> Self {
        self.columns = Some(columns);
        self.values = Some(values);
        self
    }
}

/// One commit marker in `recovery.log`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPoint {
    pub timestamp: f64,
    pub datetime: String,
}

/// Handle to the pair of log files. Cloned freely via `Arc` and injected
/// into every transaction; all writes are serialized internally and
/// flushed before returning.
#[derive(Debug)]
pub struct LogManager {
    operation_log: PathBuf,
    recovery_log: PathBuf,
    guard: Mutex<()>,
}

impl LogManager {
    pub fn new(dir: impl AsRef<Path>) -> DbResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            operation_log: dir.join("transaction.log"),
            recovery_log: dir.join("recovery.log"),
            guard: Mutex::new(()),
        })
    }

    fn append(path: &Path, line: &str) -> DbResult<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    /// Append one operation record to `transaction.log`.
    pub fn log_operation(&self, record: &OpRecord) -> DbResult<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| DbError::Invariant(format!("serialize log record: {e}")))?;
        let _guard = self.guard.lock();
        Self::append(&self.operation_log, &line)
    }

    /// Append a commit marker to `recovery.log`.
    pub fn log_recovery_point(&self) -> DbResult<()> {
        let point = RecoveryPoint {
            timestamp: now_seconds(),
            datetime: Utc::now().to_rfc3339(),
        };
        let line = serde_json::to_string(&point)
            .map_err(|e| DbError::Invariant(format!("serialize recovery point: {e}")))?;
        let _guard = self.guard.lock();
        Self::append(&self.recovery_log, &line)
    }

    /// All operation records with `timestamp >= since`, oldest first.
    /// Malformed lines are skipped.
    pub fn since(&self, since: f64) -> DbResult<Vec<OpRecord>> {
        let _guard = self.guard.lock();
        if !self.operation_log.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.operation_log)?;
        Ok(data
            .lines()
            .filter_map(|line| serde_json::from_str::<OpRecord>(line).ok())
            .filter(|record| record.timestamp >= since)
            .collect())
    }

    /// Every recorded recovery point, oldest first.
    pub fn recovery_points(&self) -> DbResult<Vec<RecoveryPoint>> {
        let _guard = self.guard.lock();
        if !self.recovery_log.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.recovery_log)?;
        Ok(data
            .lines()
            .filter_map(|line| serde_json::from_str::<RecoveryPoint>(line).ok())
            .collect())
    }

    /// Remove both log files. Test hook.
    pub fn clear(&self) -> DbResult<()> {
        let _guard = self.guard.lock();
        for path in [&self.operation_log, &self.recovery_log] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}
