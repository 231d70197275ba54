//! Isolated database contexts backed by temporary directories.

use common::Config;
use database::Database;
use std::path::Path;
use tempfile::TempDir;

/// Configuration suitable for tests: small pool, temp root.
pub fn test_config(root: &Path) -> Config {
    Config::builder()
        .data_dir(root.to_path_buf())
        .buffer_pool_pages(128)
        .build()
}

/// A database living in its own temporary directory. The directory is
/// removed when the context is dropped.
pub struct TestContext {
    root: TempDir,
    pub db: Database,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with(test_config)
    }

    /// Build the context with a custom configuration derived from the
    /// temporary root.
    pub fn with(config: impl FnOnce(&Path) -> Config) -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        let db = Database::open(config(root.path())).expect("open database");
        Self { root, db }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Close and reopen the database in place, exercising persistence.
    pub fn reopen(&mut self) {
        let config = self.db.config().clone();
        self.db.close().expect("close database");
        self.db = Database::open(config).expect("reopen database");
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
