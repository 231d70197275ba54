//! Buffer pool for page-level caching and I/O.
//!
//! The pool sits between the table layer and the page files, providing:
//! - a bounded LRU cache of resident [`Page`]s keyed by
//!   `(table path, page number, column)`
//! - pin counts that protect in-use pages from eviction
//! - dirty tracking with write-back before any page is discarded
//!
//! Different columns share a page-number namespace per table, so the column
//! is part of the cache key.
//!
//! Methods take `&mut self`; the owning table wraps the pool in a mutex,
//! which serializes all pool traffic and lets eviction flush pages while a
//! lookup is in progress.


use ahash::RandomState;
use common::{DbError, DbResult, PageNumber};
use hashbrown::{HashMap, HashSet};
use lru::LruCache;
use std::path::{Path, PathBuf};
use storage::{Page, page_file};
use tracing::warn;

type Map<K, V> = HashMap<K, V, RandomState>;
type Set<K> = HashSet<K, RandomState>;

/// Identity of one resident page.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub table_dir: PathBuf,
    pub column: usize,
    pub page: PageNumber,
}

impl PageKey {
    pub fn new(table_dir: impl AsRef<Path>, column: usize, page: PageNumber) -> Self {
        Self {
            table_dir: table_dir.as_ref().to_path_buf(),
            column,
            page,
        }
    }
}

/// Bounded page cache with LRU eviction and a pin discipline.
#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    pages: LruCache<PageKey, Page>,
    pins: Map<PageKey, u32>,
    dirty: Set<PageKey>,
}

impl BufferPool {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            capacity,
            // Sized manually by the eviction ladder so a push can never
            // silently drop a pinned resident.
            pages: LruCache::unbounded(),
            pins: Map::default(),
            dirty: Set::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.len() == 0
    }

    pub fn contains(&self, key: &PageKey) -> bool {
        self.pages.contains(key)
    }

    pub fn pin_count(&self, key: &PageKey) -> u32 {
        self.pins.get(key).copied().unwrap_or(0)
    }

    pub fn is_dirty(&self, key: &PageKey) -> bool {
        self.dirty.contains(key)
    }

    /// Fetch a page, loading it from disk on a miss (or creating an empty
    /// one when no file exists yet). The page is moved to the MRU end and
    /// pinned; callers unpin when done with the reference.
    pub fn get_page(&mut self, key: &PageKey) -> DbResult<&mut Page> {
        if self.pages.contains(key) {
            *self.pins.entry(key.clone()).or_insert(0) += 1;
            return self
                .pages
                .get_mut(key)
                .ok_or_else(|| DbError::Invariant("resident page disappeared".into()));
        }

        self.make_room()?;

        let path = page_file(&key.table_dir, key.column, key.page);
        let page = if path.exists() {
            Page::load(&key.table_dir, key.column, key.page)?
        } else {
            Page::new(&key.table_dir, key.column, key.page)
        };
        self.pages.push(key.clone(), page);
        self.pins.insert(key.clone(), 1);
        self.pages
            .get_mut(key)
            .ok_or_else(|| DbError::Invariant("freshly inserted page disappeared".into()))
    }

    pub fn pin(&mut self, key: &PageKey) {
        if let Some(count) = self.pins.get_mut(key) {
            *count += 1;
        }
    }

    /// Decrement the pin count, never below zero.
    pub fn unpin(&mut self, key: &PageKey) {
        if let Some(count) = self.pins.get_mut(key) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn mark_dirty(&mut self, key: &PageKey) {
        self.dirty.insert(key.clone());
    }

    /// Persist one resident page and drop it from the dirty set.
    pub fn flush(&mut self, key: &PageKey) -> DbResult<()> {
        if let Some(page) = self.pages.peek_mut(key) {
            page.flush_to_disk()?;
        }
        self.dirty.remove(key);
        Ok(())
    }

    /// Persist every dirty page.
    pub fn flush_all(&mut self) -> DbResult<()> {
        let keys: Vec<PageKey> = self.dirty.iter().cloned().collect();
        for key in keys {
            self.flush(&key)?;
        }
        Ok(())
    }

    /// Flush everything, then drop all residents, pins, and dirty marks.
    pub fn clear(&mut self) -> DbResult<()> {
        self.flush_all()?;
        self.pages.clear();
        self.pins.clear();
        self.dirty.clear();
        Ok(())
    }

    /// Drop a resident without writing it back (tail pages after a merge).
    pub fn discard(&mut self, key: &PageKey) {
        self.pages.pop(key);
        self.pins.remove(key);
        self.dirty.remove(key);
    }

    /// Drop every resident of one table without write-back (table drop).
    pub fn discard_table(&mut self, table_dir: &Path) {
        let keys: Vec<PageKey> = self
            .pages
            .iter()
            .map(|(key, _)| key.clone())
            .filter(|key| key.table_dir == table_dir)
            .collect();
        for key in keys {
            self.discard(&key);
        }
    }

    /// Make space for one more resident.
    ///
    /// Up to three passes scan from the LRU end for an unpinned page; a
    /// failed pass clamps every pin count above 1 down to 1 and rescans.
    /// If no candidate survives, the LRU page is evicted regardless of its
    /// pins, which sacrifices the pin guarantee and is logged loudly.
    fn make_room(&mut self) -> DbResult<()> {
        let mut attempts = 0;
        while self.pages.len() >= self.capacity && attempts < 3 {
            if !self.evict_one()? {
                for count in self.pins.values_mut() {
                    if *count > 1 {
                        *count = 1;
                    }
                }
            }
            attempts += 1;
        }

        if self.pages.len() >= self.capacity {
            self.force_evict()?;
        }
        Ok(())
    }

    /// Evict the least recently used unpinned page. Returns false when
    /// every resident is pinned.
    fn evict_one(&mut self) -> DbResult<bool> {
        let keys: Vec<PageKey> = self.pages.iter().map(|(k, _)| k.clone()).collect();
        for key in keys.into_iter().rev() {
            if self.pin_count(&key) == 0 {
                if self.dirty.contains(&key) {
                    self.flush(&key)?;
                }
                self.pages.pop(&key);
                self.pins.remove(&key);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Last resort: evict the LRU page even though it is pinned.
    fn force_evict(&mut self) -> DbResult<()> {
        if let Some((key, mut page)) = self.pages.pop_lru() {
            warn!(
                page = %key.page,
                column = key.column,
                pins = self.pin_count(&key),
                "evicting a pinned page; the pool is over-pinned"
            );
            if self.dirty.remove(&key) {
                page.flush_to_disk()?;
            }
            self.pins.remove(&key);
        }
        Ok(())
    }
}
