
use serde::{Deserialize, Serialize};
use std::{fmt, io, path::PathBuf};
use thiserror::Error;

/// Metadata slot positions shared by every record, base or tail.
///
/// Slot 0 holds the rid of the newest tail version (0 when the base record
/// is current), slot 1 the record's own rid, slot 2 the creation time in
/// epoch seconds, slot 3 the modified-columns bitmap.
pub const INDIRECTION_COLUMN: usize = 0;
pub const RID_COLUMN: usize = 1;
pub const TIMESTAMP_COLUMN: usize = 2;
pub const SCHEMA_COLUMN: usize = 3;

/// Number of metadata columns preceding the user columns.
pub const METADATA_COLUMNS: usize = 4;

/// Identifier of one physical record, base or tail.
/// Examples:
/// - `let base = Rid(1);`
/// - `let tail = Rid(42);`
/// - `assert!(!Rid::TOMBSTONE.is_live());`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rid(pub i64);

impl Rid {
    /// Sentinel written into the RID metadata slot of a deleted base record.
    pub const TOMBSTONE: Rid = Rid(-1);

    pub fn is_live(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Page number within one column's namespace. Base pages of the first range
/// are numbered 1..=16; tail pages start at 17.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageNumber(pub u64);

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Location of one record slot within a column: `(page number, slot index)`.
/// Serializes as a two-element array, matching the page directory files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSlot(pub PageNumber, pub u32);

impl RecordSlot {
    pub fn page(self) -> PageNumber {
        self.0
    }

    pub fn slot(self) -> u32 {
        self.1
    }
}

/// One materialized row as returned by reads: the base rid it belongs to,
/// the search key that found it, and the projected user columns (`None`
/// where the projection mask was off).
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub rid: Rid,
    pub key: i64,
    pub columns: Vec<Option<i64>>,
}

impl Record {
    pub fn new(rid: Rid, key: i64, columns: Vec<Option<i64>>) -> Self {
        Self { rid, key, columns }
    }

    /// Projected value of user column `i`, if it was selected.
    pub fn column(&self, i: usize) -> Option<i64> {
        self.columns.get(i).copied().flatten()
    }
}

/// Canonical error type shared across the engine's subsystems.
///
/// `Corruption` and `Invariant` are fatal: the query façade surfaces them
/// instead of collapsing them into the boolean failure convention.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("page capacity exceeded")]
    CapacityExceeded,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transaction aborted: {0}")]
    Aborted(String),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DbError {
    /// Whether this error must halt the enclosing transaction rather than
    /// abort-and-retry it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::Corruption(_) | DbError::Invariant(_))
    }
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the engine components.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .buffer_pool_pages(512)
///     .merge_trigger(256)
///     .build();
/// assert_eq!(config.base_pages_per_range, 16);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory where table directories and page files live.
    #[builder(default = PathBuf::from("./data"))]
    pub data_dir: PathBuf,
    /// Number of pages the buffer pool keeps resident.
    #[builder(default = 256)]
    pub buffer_pool_pages: usize,
    /// Base pages per page range, per column.
    #[builder(default = 16)]
    pub base_pages_per_range: usize,
    /// Updates between background merges.
    #[builder(default = 1024)]
    pub merge_trigger: u64,
    /// Bound on the ring of page-directory snapshots.
    #[builder(default = 10)]
    pub version_ring: usize,
    /// Attempts a transaction worker gives an aborting transaction.
    #[builder(default = 3)]
    pub max_retries: usize,
    /// Log directory; defaults to `<data_dir>/logs` when unset.
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Directory holding `transaction.log` and `recovery.log`.
    pub fn log_directory(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("logs"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            buffer_pool_pages: 256,
            base_pages_per_range: 16,
            merge_trigger: 1024,
            version_ring: 10,
            max_retries: 3,
            log_dir: None,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{
        Config, DbError, DbResult, INDIRECTION_COLUMN, METADATA_COLUMNS, PageNumber, RID_COLUMN,
        Record, RecordSlot, Rid, SCHEMA_COLUMN, TIMESTAMP_COLUMN,
    };
}
