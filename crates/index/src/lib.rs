//! Per-column value index over base records.
//!
//! Each enabled column keeps an ordered map from value to the set of base
//! rids currently holding it, plus a reverse map from rid to its latest
//! value. Entries carry only `(rid, value)` pairs; the table drives
//! population and keeps the index in lock-step with writes.

#[cfg(test)]
mod tests;

use ahash::RandomState;
use common::{DbError, DbResult, Rid};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

type Map<K, V> = HashMap<K, V, RandomState>;

#[derive(Debug, Default)]
struct ColumnIndex {
    by_value: BTreeMap<i64, BTreeSet<Rid>>,
    by_rid: Map<Rid, i64>,
}

impl ColumnIndex {
    fn put(&mut self, rid: Rid, value: i64) {
        if let Some(old) = self.by_rid.insert(rid, value) {
            if old == value {
                return;
            }
            if let Some(rids) = self.by_value.get_mut(&old) {
                rids.remove(&rid);
                if rids.is_empty() {
                    self.by_value.remove(&old);
                }
            }
        }
        self.by_value.entry(value).or_default().insert(rid);
    }

    fn erase(&mut self, rid: Rid) {
        if let Some(value) = self.by_rid.remove(&rid)
            && let Some(rids) = self.by_value.get_mut(&value)
        {
            rids.remove(&rid);
            if rids.is_empty() {
                self.by_value.remove(&value);
            }
        }
    }
}

/// Index over a table's user columns. The key column is always enabled.
#[derive(Debug)]
pub struct Index {
    key_column: usize,
    columns: Mutex<Vec<Option<ColumnIndex>>>,
}

impl Index {
    pub fn new(user_columns: usize, key_column: usize) -> Self {
        let mut columns: Vec<Option<ColumnIndex>> = (0..user_columns).map(|_| None).collect();
        columns[key_column] = Some(ColumnIndex::default());
        Self {
            key_column,
            columns: Mutex::new(columns),
        }
    }

    pub fn key_column(&self) -> usize {
        self.key_column
    }

    pub fn is_enabled(&self, column: usize) -> bool {
        self.columns
            .lock()
            .get(column)
            .map(|c| c.is_some())
            .unwrap_or(false)
    }

    /// Enable an index on `column`. A no-op when one already exists; the
    /// caller scans current values into it afterwards.
    pub fn create_index(&self, column: usize) -> DbResult<()> {
        let mut columns = self.columns.lock();
        let slot = columns
            .get_mut(column)
            .ok_or_else(|| DbError::Invariant(format!("no such column {column}")))?;
        if slot.is_none() {
            *slot = Some(ColumnIndex::default());
        }
        Ok(())
    }

    /// Drop the index on `column`. Refused for the key column.
    pub fn drop_index(&self, column: usize) -> DbResult<()> {
        if column == self.key_column {
            return Err(DbError::Invariant(
                "the key column index cannot be dropped".into(),
            ));
        }
        let mut columns = self.columns.lock();
        let slot = columns
            .get_mut(column)
            .ok_or_else(|| DbError::Invariant(format!("no such column {column}")))?;
        *slot = None;
        Ok(())
    }

    /// Upsert: add the rid under `value`, moving it from any previous value.
    /// A no-op for disabled columns.
    pub fn put(&self, column: usize, rid: Rid, value: i64) {
        let mut columns = self.columns.lock();
        if let Some(Some(index)) = columns.get_mut(column) {
            index.put(rid, value);
        }
    }

    pub fn erase(&self, column: usize, rid: Rid) {
        let mut columns = self.columns.lock();
        if let Some(Some(index)) = columns.get_mut(column) {
            index.erase(rid);
        }
    }

    /// Remove the rid from every enabled column.
    pub fn erase_all(&self, rid: Rid) {
        let mut columns = self.columns.lock();
        for index in columns.iter_mut().flatten() {
            index.erase(rid);
        }
    }

    pub fn value_by_rid(&self, column: usize, rid: Rid) -> Option<i64> {
        let columns = self.columns.lock();
        columns.get(column)?.as_ref()?.by_rid.get(&rid).copied()
    }

    /// Rids currently holding `value` in `column`, ascending.
    pub fn rids_by_value(&self, column: usize, value: i64) -> Vec<Rid> {
        let columns = self.columns.lock();
        match columns.get(column).and_then(|c| c.as_ref()) {
            Some(index) => index
                .by_value
                .get(&value)
                .map(|rids| rids.iter().copied().collect())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Rids whose value in `column` lies in `[lo, hi]`, ascending by value.
    pub fn rids_in_range(&self, column: usize, lo: i64, hi: i64) -> Vec<Rid> {
        let columns = self.columns.lock();
        match columns.get(column).and_then(|c| c.as_ref()) {
            Some(index) => index
                .by_value
                .range(lo..=hi)
                .flat_map(|(_, rids)| rids.iter().copied())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every rid present in `column`'s index.
    pub fn rids(&self, column: usize) -> Vec<Rid> {
        let columns = self.columns.lock();
        match columns.get(column).and_then(|c| c.as_ref()) {
            Some(index) => index.by_rid.keys().copied().collect(),
            None => Vec::new(),
        }
    }
}
