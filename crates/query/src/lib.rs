//! Thin query façade over [`Table`].
//!
//! Every operation follows one convention so the transaction runner can
//! turn any failure into an abort without caring why: success returns the
//! result, a recoverable failure returns `Ok(None)` / `Ok(false)`, and
//! only fatal faults (`Corruption`, `Invariant`) escape as `Err`.


use common::{DbResult, Record};
use std::sync::Arc;
use table::Table;
use tracing::debug;

/// Per-table adapter translating caller-friendly signatures into table
/// primitives.
pub struct Query {
    table: Arc<Table>,
}

impl Query {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    fn collapse<T>(&self, op: &str, result: DbResult<T>) -> DbResult<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(table = self.table.name(), op, error = %e, "query failed");
                Ok(None)
            }
        }
    }

    /// Insert a row; `Ok(false)` on duplicate keys or any other
    /// recoverable failure.
    pub fn insert(&self, values: &[i64]) -> DbResult<bool> {
        Ok(self.collapse("insert", self.table.insert(values))?.is_some())
    }

    /// Update the row with primary key `key`; unset columns keep their
    /// current value.
    pub fn update(&self, key: i64, deltas: &[Option<i64>]) -> DbResult<bool> {
        Ok(self.collapse("update", self.table.update(key, deltas))?.is_some())
    }

    /// Delete the row with primary key `key`.
    pub fn delete(&self, key: i64) -> DbResult<bool> {
        Ok(self.collapse("delete", self.table.delete(key))?.is_some())
    }

    /// Read the rows matching `value` in `column`, projected.
    pub fn select(
        &self,
        value: i64,
        column: usize,
        projection: &[bool],
    ) -> DbResult<Option<Vec<Record>>> {
        let result = if column == self.table.key_column() {
            self.table.select(value, projection)
        } else {
            self.table.select_by(column, value, projection)
        };
        self.collapse("select", result)
    }

    /// Read a relative version of the rows matching `value` in `column`.
    /// Version 0 is current, −1 the previous one.
    pub fn select_version(
        &self,
        value: i64,
        column: usize,
        projection: &[bool],
        relative_version: i64,
    ) -> DbResult<Option<Vec<Record>>> {
        let result = if column == self.table.key_column() {
            self.table.select_version(value, projection, relative_version)
        } else {
            self.table
                .select_by_version(column, value, projection, relative_version)
        };
        self.collapse("select_version", result)
    }

    /// Sum `column` over primary keys in `[lo, hi]`; `Ok(None)` when the
    /// range holds no rows.
    pub fn sum(&self, lo: i64, hi: i64, column: usize) -> DbResult<Option<i64>> {
        self.collapse("sum", self.table.sum(lo, hi, column))
    }

    /// Sum a relative version of `column` over primary keys in `[lo, hi]`.
    pub fn sum_version(
        &self,
        lo: i64,
        hi: i64,
        column: usize,
        relative_version: i64,
    ) -> DbResult<Option<i64>> {
        self.collapse(
            "sum_version",
            self.table.sum_version(lo, hi, column, relative_version),
        )
    }

    /// Add one to `column` of the row with primary key `key`.
    pub fn increment(&self, key: i64, column: usize) -> DbResult<bool> {
        let projection: Vec<bool> = (0..self.table.num_columns())
            .map(|c| c == column)
            .collect();
        let Some(records) = self.select(key, self.table.key_column(), &projection)? else {
            return Ok(false);
        };
        let Some(current) = records.first().and_then(|r| r.column(column)) else {
            return Ok(false);
        };
        let mut deltas: Vec<Option<i64>> = vec![None; self.table.num_columns()];
        deltas[column] = Some(current + 1);
        self.update(key, &deltas)
    }
}
