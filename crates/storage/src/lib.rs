use std::fs;
use std::path::{Path, PathBuf};

use common::{DbError, DbResult, PageNumber};
use tracing::warn;

#[cfg(test)]
mod tests;

pub const PAGE_SIZE: usize = 4096;
pub const SLOT_BYTES: usize = 8;
const HEADER_BYTES: usize = 8;

/// Slots a page can hold while the header still fits: `(N + 1) * 8 < 4096`.
pub const SLOTS_PER_PAGE: usize = (PAGE_SIZE - HEADER_BYTES) / SLOT_BYTES;

/// File backing one page: `<table dir>/data/<column>_<page>.bin`.
pub fn page_file(table_dir: &Path, column: usize, page: PageNumber) -> PathBuf {
    table_dir.join("data").join(format!("{column}_{page}.bin"))
}

/// Fixed 4 KiB container of big-endian i64 slots.
///
/// The in-memory buffer mirrors the persistent layout: an 8-byte big-endian
/// slot count followed by the slots. Mutations set the dirty bit;
/// `flush_to_disk` clears it.
#[derive(Debug, Clone)]
pub struct Page {
    table_dir: PathBuf,
    column: usize,
    number: PageNumber,
    data: Vec<u8>,
    num_slots: usize,
    dirty: bool,
}

impl Page {
    pub fn new(table_dir: impl Into<PathBuf>, column: usize, number: PageNumber) -> Self {
        Self {
            table_dir: table_dir.into(),
            column,
            number,
            data: vec![0u8; PAGE_SIZE],
            num_slots: 0,
            dirty: false,
        }
    }

    /// Read a page back from its backing file.
    ///
    /// A file shorter than its header promises is treated as truncated: the
    /// slots that fit are kept, the rest are absent, and a warning is
    /// emitted so the table will not index the missing positions.
    pub fn load(table_dir: impl Into<PathBuf>, column: usize, number: PageNumber) -> DbResult<Self> {
        let mut page = Self::new(table_dir, column, number);
        let path = page_file(&page.table_dir, column, number);
        let bytes = fs::read(&path)?;

        if bytes.len() < HEADER_BYTES {
            warn!(page = %number, column, "page file shorter than its header, treating as empty");
            return Ok(page);
        }

        let mut header = [0u8; HEADER_BYTES];
        header.copy_from_slice(&bytes[..HEADER_BYTES]);
        let promised = u64::from_be_bytes(header) as usize;
        if promised > SLOTS_PER_PAGE {
            return Err(DbError::Corruption(format!(
                "page {number} column {column} claims {promised} slots"
            )));
        }

        let available = (bytes.len() - HEADER_BYTES) / SLOT_BYTES;
        let slots = if available < promised {
            warn!(
                page = %number,
                column,
                promised,
                available,
                "truncated page file, dropping missing slots"
            );
            available
        } else {
            promised
        };

        page.data[..HEADER_BYTES + slots * SLOT_BYTES]
            .copy_from_slice(&bytes[..HEADER_BYTES + slots * SLOT_BYTES]);
        page.set_num_slots(slots);
        page.dirty = false;
        Ok(page)
    }

    pub fn number(&self) -> PageNumber {
        self.number
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn has_capacity(&self) -> bool {
        (self.num_slots + 1) * SLOT_BYTES < PAGE_SIZE
    }

    fn slot_offset(slot: usize) -> usize {
        HEADER_BYTES + slot * SLOT_BYTES
    }

    fn set_num_slots(&mut self, n: usize) {
        self.num_slots = n;
        self.data[..HEADER_BYTES].copy_from_slice(&(n as u64).to_be_bytes());
    }

    /// Append a value at the end of the page.
    pub fn write(&mut self, value: i64) -> DbResult<()> {
        if !self.has_capacity() {
            return Err(DbError::CapacityExceeded);
        }
        let start = Self::slot_offset(self.num_slots);
        self.data[start..start + SLOT_BYTES].copy_from_slice(&value.to_be_bytes());
        self.set_num_slots(self.num_slots + 1);
        self.dirty = true;
        Ok(())
    }

    /// Rewrite an existing slot in place.
    pub fn update(&mut self, slot: usize, value: i64) -> DbResult<()> {
        if slot >= self.num_slots {
            return Err(DbError::NotFound(format!(
                "slot {slot} of page {} column {}",
                self.number, self.column
            )));
        }
        let start = Self::slot_offset(slot);
        self.data[start..start + SLOT_BYTES].copy_from_slice(&value.to_be_bytes());
        self.dirty = true;
        Ok(())
    }

    /// Read slot `slot`, or `None` past the end.
    pub fn read(&self, slot: usize) -> Option<i64> {
        if slot >= self.num_slots {
            return None;
        }
        let start = Self::slot_offset(slot);
        let mut buf = [0u8; SLOT_BYTES];
        buf.copy_from_slice(&self.data[start..start + SLOT_BYTES]);
        Some(i64::from_be_bytes(buf))
    }

    /// Persist header and slots, clearing the dirty bit.
    pub fn flush_to_disk(&mut self) -> DbResult<()> {
        let path = page_file(&self.table_dir, self.column, self.number);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &self.data[..HEADER_BYTES + self.num_slots * SLOT_BYTES])?;
        self.dirty = false;
        Ok(())
    }
}

/// Per-column monotonic page-number allocator.
///
/// Numbers up to `base_pages_per_range` are reserved for the first range's
/// base pages; tail pages and base pages of later ranges draw from here.
#[derive(Debug, Clone)]
pub struct PageNumbers {
    next: Vec<u64>,
}

impl PageNumbers {
    pub fn new(columns: usize, base_pages_per_range: usize) -> Self {
        Self {
            next: vec![base_pages_per_range as u64 + 1; columns],
        }
    }

    pub fn next(&mut self, column: usize) -> PageNumber {
        let n = self.next[column];
        self.next[column] += 1;
        PageNumber(n)
    }

    /// Never hand out `page` or anything below it again (restart path).
    pub fn advance_past(&mut self, column: usize, page: PageNumber) {
        if page.0 >= self.next[column] {
            self.next[column] = page.0 + 1;
        }
    }
}

#[derive(Debug, Clone)]
struct ColumnPages {
    base: Vec<PageNumber>,
    tails: Vec<PageNumber>,
}

/// One range of a table: a bounded set of base pages plus an open-ended
/// tail chain, per column. All columns allocate in lockstep, so record `n`
/// of the range sits at page `n / 511`, slot `n % 511` in every column.
#[derive(Debug, Clone)]
pub struct PageRange {
    columns: Vec<ColumnPages>,
    base_records: u64,
    tail_records: u64,
    capacity: u64,
}

impl PageRange {
    /// The first range of a table; base pages are numbered 1..=16.
    pub fn first(total_columns: usize, base_pages_per_range: usize) -> Self {
        let columns = (0..total_columns)
            .map(|_| ColumnPages {
                base: (1..=base_pages_per_range as u64).map(PageNumber).collect(),
                tails: Vec::new(),
            })
            .collect();
        Self {
            columns,
            base_records: 0,
            tail_records: 0,
            capacity: (base_pages_per_range * SLOTS_PER_PAGE) as u64,
        }
    }

    /// A later range; base pages draw from the per-column allocator.
    pub fn next(
        total_columns: usize,
        base_pages_per_range: usize,
        numbers: &mut PageNumbers,
    ) -> Self {
        let columns = (0..total_columns)
            .map(|column| ColumnPages {
                base: (0..base_pages_per_range)
                    .map(|_| numbers.next(column))
                    .collect(),
                tails: Vec::new(),
            })
            .collect();
        Self {
            columns,
            base_records: 0,
            tail_records: 0,
            capacity: (base_pages_per_range * SLOTS_PER_PAGE) as u64,
        }
    }

    /// Rebuild a range from persisted base page numbers (restart path).
    pub fn from_base_pages(base: Vec<Vec<PageNumber>>, base_records: u64) -> Self {
        let capacity = base
            .first()
            .map(|pages| (pages.len() * SLOTS_PER_PAGE) as u64)
            .unwrap_or(0);
        Self {
            columns: base
                .into_iter()
                .map(|pages| ColumnPages {
                    base: pages,
                    tails: Vec::new(),
                })
                .collect(),
            base_records,
            tail_records: 0,
            capacity,
        }
    }

    pub fn has_base_capacity(&self) -> bool {
        self.base_records < self.capacity
    }

    pub fn base_records(&self) -> u64 {
        self.base_records
    }

    /// Claim the next base slot: `(page ordinal, slot index)`, the same in
    /// every column. `None` when the range is full.
    pub fn allocate_base_slot(&mut self) -> Option<(usize, u32)> {
        if !self.has_base_capacity() {
            return None;
        }
        let n = self.base_records as usize;
        self.base_records += 1;
        Some((n / SLOTS_PER_PAGE, (n % SLOTS_PER_PAGE) as u32))
    }

    /// Claim the next tail slot, appending a fresh tail page to every
    /// column when the current one is full.
    pub fn allocate_tail_slot(&mut self, numbers: &mut PageNumbers) -> (usize, u32) {
        let n = self.tail_records as usize;
        self.tail_records += 1;
        let ordinal = n / SLOTS_PER_PAGE;
        if ordinal == self.columns[0].tails.len() {
            for (column, pages) in self.columns.iter_mut().enumerate() {
                pages.tails.push(numbers.next(column));
            }
        }
        (ordinal, (n % SLOTS_PER_PAGE) as u32)
    }

    pub fn base_page(&self, column: usize, ordinal: usize) -> PageNumber {
        self.columns[column].base[ordinal]
    }

    pub fn tail_page(&self, column: usize, ordinal: usize) -> PageNumber {
        self.columns[column].tails[ordinal]
    }

    pub fn base_pages(&self, column: usize) -> &[PageNumber] {
        &self.columns[column].base
    }

    pub fn tail_pages(&self, column: usize) -> &[PageNumber] {
        &self.columns[column].tails
    }

    pub fn contains_base_page(&self, column: usize, page: PageNumber) -> bool {
        self.columns[column].base.contains(&page)
    }

    /// Forget every tail page (after a merge folded them into the base).
    pub fn clear_tails(&mut self) {
        for pages in &mut self.columns {
            pages.tails.clear();
        }
        self.tail_records = 0;
    }
}
