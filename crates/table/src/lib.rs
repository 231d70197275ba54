//! Log-structured table: column page ranges, page directory, version
//! chains, and the merge that folds tail records back into base pages.
//!
//! Rows are split per column across fixed-size pages. An update never
//! overwrites base data; it appends a full tail record and re-points the
//! base record's indirection slot, which is the single linearization point
//! making the new version visible. Reads walk the indirection chain for
//! point-in-time versions; a background merge consolidates the newest
//! value per row into the base page and drops the tails.


use ahash::RandomState;
use buffer::{BufferPool, PageKey};
use chrono::Utc;
use common::{
    Config, DbError, DbResult, INDIRECTION_COLUMN, METADATA_COLUMNS, PageNumber, RID_COLUMN,
    Record, RecordSlot, Rid, SCHEMA_COLUMN,
};
use hashbrown::HashMap;
use index::Index;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::{PageNumbers, PageRange, page_file};
use tracing::{debug, warn};

type Map<K, V> = HashMap<K, V, RandomState>;

/// Per-column mapping from rid to the page slot holding its value.
type Directory = Vec<Map<Rid, RecordSlot>>;

#[derive(Debug, Serialize, Deserialize)]
struct TableMeta {
    columns: usize,
    key_col: usize,
    update_count: u64,
}

struct TableState {
    ranges: Vec<PageRange>,
    numbers: PageNumbers,
    directory: Directory,
    versions: VecDeque<Directory>,
    next_rid: i64,
    update_count: u64,
}

/// One table of the database: `METADATA_COLUMNS + num_columns` column
/// stores, a per-column page directory, a per-column index, and the rid
/// allocator. Safe to share across threads behind an `Arc`.
pub struct Table {
    name: String,
    path: PathBuf,
    num_columns: usize,
    key_col: usize,
    config: Config,
    pool: Arc<Mutex<BufferPool>>,
    index: Index,
    state: RwLock<TableState>,
}

impl Table {
    /// Create a fresh table under `<root>/<name>`.
    pub fn create(
        name: &str,
        num_columns: usize,
        key_col: usize,
        root: &Path,
        pool: Arc<Mutex<BufferPool>>,
        config: Config,
    ) -> DbResult<Table> {
        if num_columns == 0 {
            return Err(DbError::Invariant(
                "a table needs at least one user column".into(),
            ));
        }
        if key_col >= num_columns {
            return Err(DbError::Invariant(format!(
                "key column {key_col} out of range for {num_columns} columns"
            )));
        }
        let path = root.join(name);
        fs::create_dir_all(path.join("data"))?;

        let total = METADATA_COLUMNS + num_columns;
        let state = TableState {
            ranges: vec![PageRange::first(total, config.base_pages_per_range)],
            numbers: PageNumbers::new(total, config.base_pages_per_range),
            directory: vec![Map::default(); total],
            versions: VecDeque::new(),
            next_rid: 1,
            update_count: 0,
        };
        Ok(Table {
            name: name.to_string(),
            path,
            num_columns,
            key_col,
            index: Index::new(num_columns, key_col),
            config,
            pool,
            state: RwLock::new(state),
        })
    }

    /// Reopen a table persisted by [`Table::save`].
    ///
    /// The directory on disk holds base records only (the merge that runs
    /// before saving folds every tail), so all listed pages are base pages:
    /// they are chunked back into ranges in order and the key index is
    /// rebuilt by scanning their current values.
    pub fn open(
        name: &str,
        root: &Path,
        pool: Arc<Mutex<BufferPool>>,
        config: Config,
    ) -> DbResult<Table> {
        let path = root.join(name);
        let meta: TableMeta = read_json(&path.join("metadata.json"))?;
        let raw: Vec<Map<String, RecordSlot>> = read_json(&path.join("page_directory.json"))?;
        let directory = restore_directory(raw)?;
        let pages: Vec<Vec<u64>> = read_json(&path.join("page_range.json"))?;

        let total = METADATA_COLUMNS + meta.columns;
        if directory.len() != total {
            return Err(DbError::Corruption(format!(
                "page directory has {} columns, expected {total}",
                directory.len()
            )));
        }
        if pages.len() != total || pages.iter().any(|list| list.len() != pages[0].len()) {
            return Err(DbError::Corruption(
                "page range file disagrees with the column count".into(),
            ));
        }
        let bpr = config.base_pages_per_range;
        let mut numbers = PageNumbers::new(total, bpr);
        for (column, list) in pages.iter().enumerate() {
            for page in list {
                numbers.advance_past(column, PageNumber(*page));
            }
        }

        let per_column = pages.first().map(|list| list.len()).unwrap_or(0);
        let mut ranges = Vec::new();
        let mut start = 0;
        while start < per_column {
            let end = (start + bpr).min(per_column);
            let base: Vec<Vec<PageNumber>> = (0..total)
                .map(|column| pages[column][start..end].iter().map(|p| PageNumber(*p)).collect())
                .collect();
            let records = count_slots(&pool, &path, &base[INDIRECTION_COLUMN])?;
            ranges.push(PageRange::from_base_pages(base, records));
            start = end;
        }
        if ranges.is_empty() {
            ranges.push(PageRange::first(total, bpr));
        }

        let versions_path = path.join("versions.json");
        let versions = if versions_path.exists() {
            let raw: Vec<Vec<Map<String, RecordSlot>>> = read_json(&versions_path)?;
            raw.into_iter()
                .map(restore_directory)
                .collect::<DbResult<VecDeque<Directory>>>()?
        } else {
            VecDeque::new()
        };

        let next_rid = directory
            .iter()
            .flat_map(|column| column.keys())
            .map(|rid| rid.0)
            .max()
            .unwrap_or(0)
            + 1;

        let table = Table {
            name: name.to_string(),
            path,
            num_columns: meta.columns,
            key_col: meta.key_col,
            index: Index::new(meta.columns, meta.key_col),
            config,
            pool,
            state: RwLock::new(TableState {
                ranges,
                numbers,
                directory,
                versions,
                next_rid,
                update_count: meta.update_count,
            }),
        };
        table.rebuild_key_index()?;
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn key_column(&self) -> usize {
        self.key_col
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn update_count(&self) -> u64 {
        self.state.read().update_count
    }

    pub fn version_snapshots(&self) -> usize {
        self.state.read().versions.len()
    }

    fn total_columns(&self) -> usize {
        METADATA_COLUMNS + self.num_columns
    }

    fn rid_for_key(&self, key: i64) -> Option<Rid> {
        self.index
            .rids_by_value(self.key_col, key)
            .into_iter()
            .next()
    }

    /// Insert a new row. Fails with `Duplicate` when the key exists.
    pub fn insert(&self, values: &[i64]) -> DbResult<Rid> {
        if values.len() != self.num_columns {
            return Err(DbError::Invariant(format!(
                "expected {} columns, got {}",
                self.num_columns,
                values.len()
            )));
        }
        let key = values[self.key_col];
        if self.rid_for_key(key).is_some() {
            return Err(DbError::Duplicate(format!("key {key}")));
        }

        let mut state = self.state.write();
        let rid = Rid(state.next_rid);
        state.next_rid += 1;

        if !state.ranges.iter().any(|r| r.has_base_capacity()) {
            let total = self.total_columns();
            let bpr = self.config.base_pages_per_range;
            let range = {
                let state = &mut *state;
                PageRange::next(total, bpr, &mut state.numbers)
            };
            state.ranges.push(range);
        }
        let range_idx = state
            .ranges
            .iter()
            .position(|r| r.has_base_capacity())
            .ok_or_else(|| DbError::Invariant("no base capacity after range growth".into()))?;
        let (ordinal, slot_idx) = state.ranges[range_idx]
            .allocate_base_slot()
            .ok_or_else(|| DbError::Invariant("base slot vanished under the write lock".into()))?;

        let mut row = vec![0, rid.0, Utc::now().timestamp(), 0];
        row.extend_from_slice(values);
        for (column, value) in row.iter().enumerate() {
            let page = state.ranges[range_idx].base_page(column, ordinal);
            let written = self.append_at(column, page, *value)?;
            if written != slot_idx {
                return Err(DbError::Invariant(format!(
                    "column {column} out of step: wrote slot {written}, expected {slot_idx}"
                )));
            }
            state.directory[column].insert(rid, RecordSlot(page, slot_idx));
        }

        // Still under the write lock, so a concurrent merge cannot observe
        // the row in the directory but not in the index.
        for (column, value) in values.iter().enumerate() {
            self.index.put(column, rid, *value);
        }
        Ok(rid)
    }

    /// Apply a logical update: append a tail record carrying the merged
    /// row, then re-point the base record's indirection at it.
    ///
    /// Triggers a merge once the update counter reaches the configured
    /// threshold.
    pub fn update(&self, key: i64, deltas: &[Option<i64>]) -> DbResult<()> {
        if deltas.len() != self.num_columns {
            return Err(DbError::Invariant(format!(
                "expected {} columns, got {}",
                self.num_columns,
                deltas.len()
            )));
        }
        let base = self
            .rid_for_key(key)
            .ok_or_else(|| DbError::NotFound(format!("key {key}")))?;

        let mut state = self.state.write();
        let indirection = self.read_slot(&state.directory, INDIRECTION_COLUMN, base)?;
        let schema = self.read_slot(&state.directory, SCHEMA_COLUMN, base)?;
        let latest = self.latest_user_values(&state.directory, base, indirection)?;

        let mut change_bits = 0i64;
        let merged: Vec<i64> = deltas
            .iter()
            .zip(&latest)
            .enumerate()
            .map(|(column, (delta, current))| match delta {
                Some(value) => {
                    change_bits |= 1 << column;
                    *value
                }
                None => *current,
            })
            .collect();

        let tail = Rid(state.next_rid);
        state.next_rid += 1;

        let base_page = state.directory[INDIRECTION_COLUMN]
            .get(&base)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("rid {base}")))?
            .page();
        let range_idx = state
            .ranges
            .iter()
            .position(|r| r.contains_base_page(INDIRECTION_COLUMN, base_page))
            .ok_or_else(|| DbError::Invariant(format!("no range owns base page {base_page}")))?;
        let (ordinal, slot_idx) = {
            let state = &mut *state;
            state.ranges[range_idx].allocate_tail_slot(&mut state.numbers)
        };

        let mut row = vec![indirection, tail.0, Utc::now().timestamp(), schema | change_bits];
        row.extend_from_slice(&merged);
        for (column, value) in row.iter().enumerate() {
            let page = state.ranges[range_idx].tail_page(column, ordinal);
            let written = self.append_at(column, page, *value)?;
            if written != slot_idx {
                return Err(DbError::Invariant(format!(
                    "column {column} out of step: wrote slot {written}, expected {slot_idx}"
                )));
            }
            state.directory[column].insert(tail, RecordSlot(page, slot_idx));
        }

        // Linearization point: the new version becomes reachable here.
        let ind_slot = state.directory[INDIRECTION_COLUMN]
            .get(&base)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("rid {base}")))?;
        self.update_at(INDIRECTION_COLUMN, ind_slot, tail.0)?;
        let schema_slot = state.directory[SCHEMA_COLUMN]
            .get(&base)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("rid {base}")))?;
        self.update_at(SCHEMA_COLUMN, schema_slot, schema | change_bits)?;

        for (column, delta) in deltas.iter().enumerate() {
            if delta.is_some() {
                self.index.put(column, base, merged[column]);
            }
        }

        state.update_count += 1;
        if state.update_count >= self.config.merge_trigger {
            self.merge_locked(&mut state)?;
        }
        Ok(())
    }

    /// Read the current version of the row with primary key `key`.
    pub fn select(&self, key: i64, projection: &[bool]) -> DbResult<Vec<Record>> {
        self.select_version(key, projection, 0)
    }

    /// Read a historic version of the row with primary key `key`.
    ///
    /// `relative_version` counts back from the newest version: 0 is the
    /// current one, −1 the previous, and anything older than the chain
    /// returns the base record. Positive arguments are clamped to 0.
    pub fn select_version(
        &self,
        key: i64,
        projection: &[bool],
        relative_version: i64,
    ) -> DbResult<Vec<Record>> {
        let base = self
            .rid_for_key(key)
            .ok_or_else(|| DbError::NotFound(format!("key {key}")))?;
        let state = self.state.read();
        let versions = self.chain(&state.directory, base)?;
        let back = relative_version.min(0).unsigned_abs() as usize;
        let pick = back.min(versions.len() - 1);
        let record = self.read_record(&state.directory, versions[pick], base, key, projection)?;
        Ok(vec![record])
    }

    /// Read every row whose current value in `column` equals `value`.
    ///
    /// Uses the column's index when one exists; otherwise scans the latest
    /// value of every live row.
    pub fn select_by(&self, column: usize, value: i64, projection: &[bool]) -> DbResult<Vec<Record>> {
        self.select_by_version(column, value, projection, 0)
    }

    /// Read a historic version of every row whose current value in
    /// `column` equals `value`.
    ///
    /// Rows are matched on their current value; `relative_version` then
    /// picks which version of each matching row is read back, with the
    /// same convention as [`Table::select_version`].
    pub fn select_by_version(
        &self,
        column: usize,
        value: i64,
        projection: &[bool],
        relative_version: i64,
    ) -> DbResult<Vec<Record>> {
        if column >= self.num_columns {
            return Err(DbError::Invariant(format!("no such column {column}")));
        }
        if column == self.key_col {
            return self.select_version(value, projection, relative_version);
        }

        let state = self.state.read();
        let matches = if self.index.is_enabled(column) {
            self.index.rids_by_value(column, value)
        } else {
            let mut hits = Vec::new();
            for base in self.index.rids(self.key_col) {
                if !state.directory[INDIRECTION_COLUMN].contains_key(&base) {
                    continue;
                }
                let indirection = self.read_slot(&state.directory, INDIRECTION_COLUMN, base)?;
                let source = self.newest_rid(&state.directory, base, indirection);
                if self.read_slot(&state.directory, METADATA_COLUMNS + column, source)? == value {
                    hits.push(base);
                }
            }
            hits
        };

        let back = relative_version.min(0).unsigned_abs() as usize;
        let mut records = Vec::with_capacity(matches.len());
        for base in matches {
            if !state.directory[INDIRECTION_COLUMN].contains_key(&base) {
                continue;
            }
            let Some(key) = self.index.value_by_rid(self.key_col, base) else {
                continue;
            };
            let versions = self.chain(&state.directory, base)?;
            let pick = back.min(versions.len() - 1);
            records.push(self.read_record(&state.directory, versions[pick], base, key, projection)?);
        }
        Ok(records)
    }

    /// Remove the row with primary key `key`: tombstone the base RID slot,
    /// then drop every directory and index entry of the whole chain.
    pub fn delete(&self, key: i64) -> DbResult<()> {
        let base = self
            .rid_for_key(key)
            .ok_or_else(|| DbError::NotFound(format!("key {key}")))?;
        let mut state = self.state.write();
        let versions = self.chain(&state.directory, base)?;

        let rid_slot = state.directory[RID_COLUMN]
            .get(&base)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("rid {base}")))?;
        self.update_at(RID_COLUMN, rid_slot, Rid::TOMBSTONE.0)?;

        for rid in &versions {
            for column in 0..self.total_columns() {
                state.directory[column].remove(rid);
            }
        }
        self.index.erase_all(base);
        Ok(())
    }

    /// Sum the current value of `column` over keys in `[lo, hi]`.
    /// `NotFound` when no row falls in the range.
    pub fn sum(&self, lo: i64, hi: i64, column: usize) -> DbResult<i64> {
        self.sum_version(lo, hi, column, 0)
    }

    /// Sum a historic version of `column` over keys in `[lo, hi]`.
    pub fn sum_version(
        &self,
        lo: i64,
        hi: i64,
        column: usize,
        relative_version: i64,
    ) -> DbResult<i64> {
        if column >= self.num_columns {
            return Err(DbError::Invariant(format!("no such column {column}")));
        }
        let rids = self.index.rids_in_range(self.key_col, lo, hi);
        if rids.is_empty() {
            return Err(DbError::NotFound(format!("no records in [{lo}, {hi}]")));
        }
        let state = self.state.read();
        let back = relative_version.min(0).unsigned_abs() as usize;
        let mut total = 0i64;
        for base in rids {
            if !state.directory[INDIRECTION_COLUMN].contains_key(&base) {
                continue;
            }
            let versions = self.chain(&state.directory, base)?;
            let pick = back.min(versions.len() - 1);
            total += self.read_slot(&state.directory, METADATA_COLUMNS + column, versions[pick])?;
        }
        Ok(total)
    }

    /// Enable an index on a user column and populate it by scanning the
    /// current value of every live row.
    pub fn create_index(&self, column: usize) -> DbResult<()> {
        if column >= self.num_columns {
            return Err(DbError::Invariant(format!("no such column {column}")));
        }
        self.index.create_index(column)?;
        let state = self.state.read();
        for base in self.index.rids(self.key_col) {
            if !state.directory[INDIRECTION_COLUMN].contains_key(&base) {
                continue;
            }
            let indirection = self.read_slot(&state.directory, INDIRECTION_COLUMN, base)?;
            let source = self.newest_rid(&state.directory, base, indirection);
            let value = self.read_slot(&state.directory, METADATA_COLUMNS + column, source)?;
            self.index.put(column, base, value);
        }
        Ok(())
    }

    pub fn drop_index(&self, column: usize) -> DbResult<()> {
        self.index.drop_index(column)
    }

    /// Push a copy of the page directory onto the bounded version ring.
    pub fn snapshot_directory(&self) {
        let mut state = self.state.write();
        let snapshot = state.directory.clone();
        state.versions.push_back(snapshot);
        while state.versions.len() > self.config.version_ring {
            state.versions.pop_front();
        }
    }

    /// Fold the newest tail value of every row into its base page, clear
    /// the indirection chains, and drop all tail pages.
    pub fn merge(&self) -> DbResult<()> {
        let mut state = self.state.write();
        self.merge_locked(&mut state)
    }

    fn merge_locked(&self, state: &mut TableState) -> DbResult<()> {
        debug!(table = %self.name, "merging tail records into base pages");
        let bases = self.index.rids(self.key_col);
        let mut live: BTreeSet<Rid> = BTreeSet::new();

        for base in bases {
            if !state.directory[INDIRECTION_COLUMN].contains_key(&base) {
                continue;
            }
            live.insert(base);
            let indirection = self.read_slot(&state.directory, INDIRECTION_COLUMN, base)?;
            if indirection == 0 {
                continue;
            }

            let newest = Rid(indirection);
            if state.directory[INDIRECTION_COLUMN].contains_key(&newest) {
                let schema = self.read_slot(&state.directory, SCHEMA_COLUMN, base)?;
                for column in 0..self.num_columns {
                    if schema & (1 << column) == 0 {
                        continue;
                    }
                    let value =
                        self.read_slot(&state.directory, METADATA_COLUMNS + column, newest)?;
                    let slot = state.directory[METADATA_COLUMNS + column]
                        .get(&base)
                        .copied()
                        .ok_or_else(|| {
                            DbError::Invariant(format!("rid {base} missing from column {column}"))
                        })?;
                    self.update_at(METADATA_COLUMNS + column, slot, value)?;
                    self.index.put(column, base, value);
                }
            } else {
                warn!(rid = indirection, "dangling indirection during merge, resetting chain");
            }

            let ind_slot = state.directory[INDIRECTION_COLUMN]
                .get(&base)
                .copied()
                .ok_or_else(|| DbError::Invariant(format!("rid {base} missing indirection")))?;
            self.update_at(INDIRECTION_COLUMN, ind_slot, 0)?;
            let schema_slot = state.directory[SCHEMA_COLUMN]
                .get(&base)
                .copied()
                .ok_or_else(|| DbError::Invariant(format!("rid {base} missing schema")))?;
            self.update_at(SCHEMA_COLUMN, schema_slot, 0)?;
        }

        // Tail records become unreachable once the chains are cleared.
        for column in state.directory.iter_mut() {
            column.retain(|rid, _| live.contains(rid));
        }

        let mut pool = self.pool.lock();
        for range in state.ranges.iter_mut() {
            for column in 0..self.total_columns() {
                for page in range.tail_pages(column).to_vec() {
                    pool.discard(&PageKey::new(&self.path, column, page));
                    let file = page_file(&self.path, column, page);
                    if file.exists() {
                        fs::remove_file(file)?;
                    }
                }
            }
            range.clear_tails();
        }
        drop(pool);

        state.update_count = 0;
        Ok(())
    }

    /// Persist the table's declarative metadata as JSON next to its pages.
    pub fn save(&self) -> DbResult<()> {
        let state = self.state.read();
        write_json(
            &self.path.join("metadata.json"),
            &TableMeta {
                columns: self.num_columns,
                key_col: self.key_col,
                update_count: state.update_count,
            },
        )?;
        write_json(
            &self.path.join("page_directory.json"),
            &persist_directory(&state.directory),
        )?;

        let pages: Vec<Vec<u64>> = (0..self.total_columns())
            .map(|column| {
                state
                    .ranges
                    .iter()
                    .flat_map(|range| {
                        range
                            .base_pages(column)
                            .iter()
                            .chain(range.tail_pages(column))
                            .map(|page| page.0)
                    })
                    .collect()
            })
            .collect();
        write_json(&self.path.join("page_range.json"), &pages)?;

        let versions: Vec<Vec<Map<String, RecordSlot>>> =
            state.versions.iter().map(persist_directory).collect();
        write_json(&self.path.join("versions.json"), &versions)?;
        Ok(())
    }

    fn rebuild_key_index(&self) -> DbResult<()> {
        let state = self.state.read();
        let key_column = METADATA_COLUMNS + self.key_col;
        let rids: Vec<Rid> = state.directory[key_column].keys().copied().collect();
        for rid in rids {
            let slot = state.directory[key_column]
                .get(&rid)
                .copied()
                .ok_or_else(|| DbError::Invariant(format!("rid {rid} vanished")))?;
            // Only records sitting in a base page belong in the key index;
            // a directory from an unclean shutdown may still list tails.
            let is_base = state
                .ranges
                .iter()
                .any(|range| range.contains_base_page(key_column, slot.page()));
            if !is_base {
                continue;
            }
            let value = self.read_slot(&state.directory, key_column, rid)?;
            self.index.put(self.key_col, rid, value);
        }
        Ok(())
    }

    /// Newest record of a row's chain given its base indirection value.
    fn newest_rid(&self, directory: &Directory, base: Rid, indirection: i64) -> Rid {
        if indirection == 0 {
            return base;
        }
        let newest = Rid(indirection);
        if directory[INDIRECTION_COLUMN].contains_key(&newest) {
            newest
        } else {
            warn!(rid = indirection, "dangling indirection, reading base record");
            base
        }
    }

    fn latest_user_values(
        &self,
        directory: &Directory,
        base: Rid,
        indirection: i64,
    ) -> DbResult<Vec<i64>> {
        let source = self.newest_rid(directory, base, indirection);
        (0..self.num_columns)
            .map(|column| self.read_slot(directory, METADATA_COLUMNS + column, source))
            .collect()
    }

    /// Record versions of one row, newest first, base record last.
    ///
    /// The walk keeps a visited set so a corrupt cyclic chain terminates,
    /// and stops at any rid the directory no longer knows.
    fn chain(&self, directory: &Directory, base: Rid) -> DbResult<Vec<Rid>> {
        let mut versions = Vec::new();
        let mut visited: BTreeSet<i64> = BTreeSet::new();
        visited.insert(base.0);
        let mut next = self.read_slot(directory, INDIRECTION_COLUMN, base)?;
        while next != 0 {
            let rid = Rid(next);
            if !visited.insert(next) {
                warn!(rid = next, "cycle in indirection chain");
                break;
            }
            if !directory[INDIRECTION_COLUMN].contains_key(&rid) {
                warn!(rid = next, "dangling indirection");
                break;
            }
            versions.push(rid);
            next = self.read_slot(directory, INDIRECTION_COLUMN, rid)?;
        }
        versions.push(base);
        Ok(versions)
    }

    fn read_record(
        &self,
        directory: &Directory,
        source: Rid,
        base: Rid,
        key: i64,
        projection: &[bool],
    ) -> DbResult<Record> {
        if projection.len() != self.num_columns {
            return Err(DbError::Invariant(format!(
                "projection has {} entries, expected {}",
                projection.len(),
                self.num_columns
            )));
        }
        let mut columns = Vec::with_capacity(self.num_columns);
        for (column, wanted) in projection.iter().enumerate() {
            if *wanted {
                columns.push(Some(self.read_slot(
                    directory,
                    METADATA_COLUMNS + column,
                    source,
                )?));
            } else {
                columns.push(None);
            }
        }
        Ok(Record::new(base, key, columns))
    }

    fn read_slot(&self, directory: &Directory, column: usize, rid: Rid) -> DbResult<i64> {
        let slot = directory[column]
            .get(&rid)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("rid {rid} in column {column}")))?;
        let key = PageKey::new(&self.path, column, slot.page());
        let mut pool = self.pool.lock();
        let value = pool.get_page(&key)?.read(slot.slot() as usize);
        pool.unpin(&key);
        value.ok_or_else(|| {
            DbError::Corruption(format!(
                "page {} column {column} has no slot {}",
                slot.page(),
                slot.slot()
            ))
        })
    }

    /// Append `value` to a page, returning the slot index it landed in.
    fn append_at(&self, column: usize, page: PageNumber, value: i64) -> DbResult<u32> {
        let key = PageKey::new(&self.path, column, page);
        let mut pool = self.pool.lock();
        let page = pool.get_page(&key)?;
        let slot = page.num_slots() as u32;
        let written = page.write(value);
        pool.mark_dirty(&key);
        pool.unpin(&key);
        written?;
        Ok(slot)
    }

    fn update_at(&self, column: usize, slot: RecordSlot, value: i64) -> DbResult<()> {
        let key = PageKey::new(&self.path, column, slot.page());
        let mut pool = self.pool.lock();
        let page = pool.get_page(&key)?;
        let updated = page.update(slot.slot() as usize, value);
        pool.mark_dirty(&key);
        pool.unpin(&key);
        updated
    }
}

fn count_slots(
    pool: &Arc<Mutex<BufferPool>>,
    table_dir: &Path,
    pages: &[PageNumber],
) -> DbResult<u64> {
    let mut pool = pool.lock();
    let mut total = 0u64;
    for page in pages {
        let key = PageKey::new(table_dir, INDIRECTION_COLUMN, *page);
        let slots = pool.get_page(&key)?.num_slots() as u64;
        pool.unpin(&key);
        total += slots;
    }
    Ok(total)
}

fn persist_directory(directory: &Directory) -> Vec<Map<String, RecordSlot>> {
    directory
        .iter()
        .map(|column| {
            column
                .iter()
                .map(|(rid, slot)| (rid.0.to_string(), *slot))
                .collect()
        })
        .collect()
}

fn restore_directory(raw: Vec<Map<String, RecordSlot>>) -> DbResult<Directory> {
    raw.into_iter()
        .map(|column| {
            column
                .into_iter()
                .map(|(rid, slot)| {
                    let rid = rid
                        .parse::<i64>()
                        .map_err(|_| DbError::Corruption(format!("bad rid key '{rid}'")))?;
                    Ok((Rid(rid), slot))
                })
                .collect::<DbResult<Map<Rid, RecordSlot>>>()
        })
        .collect()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> DbResult<()> {
    let data = serde_json::to_string_pretty(value)
        .map_err(|e| DbError::Invariant(format!("serialize {}: {e}", path.display())))?;
    fs::write(path, data)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> DbResult<T> {
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data)
        .map_err(|e| DbError::Corruption(format!("invalid {}: {e}", path.display())))
}
