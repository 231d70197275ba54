//! Embedded database façade: opens a data directory, owns the shared
//! buffer pool, lock manager and operation log, and hands out tables.
//!
//! Tables persist as declarative JSON metadata plus raw page files;
//! `close` merges every table first, so a reopened directory rebuilds its
//! in-memory state from base records alone.


use ahash::RandomState;
use buffer::BufferPool;
use common::{Config, DbError, DbResult};
use hashbrown::HashMap;
use lock::LockManager;
use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use table::Table;
use tracing::debug;
use wal::LogManager;

type Map<K, V> = HashMap<K, V, RandomState>;

pub struct Database {
    config: Config,
    pool: Arc<Mutex<BufferPool>>,
    locks: Arc<LockManager>,
    log: Arc<LogManager>,
    tables: Map<String, Arc<Table>>,
}

impl Database {
    /// Open a database rooted at `config.data_dir`, rebuilding every table
    /// found there.
    pub fn open(config: Config) -> DbResult<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let pool = Arc::new(Mutex::new(BufferPool::new(config.buffer_pool_pages)));
        let log = Arc::new(LogManager::new(config.log_directory())?);

        let mut tables: Map<String, Arc<Table>> = Map::default();
        for entry in fs::read_dir(&config.data_dir)? {
            let entry = entry?;
            if !entry.path().join("metadata.json").exists() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            debug!(table = %name, "reopening table");
            let table = Table::open(&name, &config.data_dir, pool.clone(), config.clone())?;
            tables.insert(name, Arc::new(table));
        }

        Ok(Self {
            config,
            pool,
            locks: Arc::new(LockManager::new()),
            log,
            tables,
        })
    }

    /// Merge and persist every table, then flush the buffer pool.
    pub fn close(&mut self) -> DbResult<()> {
        for table in self.tables.values() {
            table.merge()?;
            table.save()?;
        }
        self.pool.lock().flush_all()?;
        Ok(())
    }

    /// Create a table with `num_columns` user columns keyed on `key_col`.
    pub fn create_table(
        &mut self,
        name: &str,
        num_columns: usize,
        key_col: usize,
    ) -> DbResult<Arc<Table>> {
        if self.tables.contains_key(name) {
            return Err(DbError::Duplicate(format!("table '{name}'")));
        }
        let table = Arc::new(Table::create(
            name,
            num_columns,
            key_col,
            &self.config.data_dir,
            self.pool.clone(),
            self.config.clone(),
        )?);
        self.tables.insert(name.to_string(), table.clone());
        Ok(table)
    }

    /// Drop a table and remove its files.
    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        let table = self
            .tables
            .remove(name)
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))?;
        let path = table.path().to_path_buf();
        drop(table);
        self.pool.lock().discard_table(&path);
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> DbResult<Arc<Table>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<Table>> {
        self.tables.values()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Arc<Mutex<BufferPool>> {
        &self.pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }
}

/// Convenience for tests and embedders: open a database under `root` with
/// an otherwise-default configuration.
pub fn open_at(root: &Path) -> DbResult<Database> {
    Database::open(Config::builder().data_dir(root.to_path_buf()).build())
}
