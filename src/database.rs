//! Wires the catalog, buffer pool, lock manager and log manager
//! together. Unlike the teacher's single process-wide singleton, this is
//! a plain, independently constructible struct — the test suite opens
//! many databases side by side, each against its own temp directory and
//! page size (§1.1). `global()` keeps a `OnceCell`-backed convenience
//! instance around for the demo binary, which only ever wants one.

use std::sync::{Arc, RwLock};

use once_cell::sync::OnceCell;

use crate::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::StorageResult;
use crate::heap_file::HeapFile;
use crate::lock_manager::LockManager;
use crate::log_manager::LogManager;
use crate::util::HandyRwLock;

pub struct Database {
    config: Config,
    catalog: RwLock<Catalog>,
    buffer_pool: BufferPool,
    lock_manager: LockManager,
    log_manager: RwLock<LogManager>,
}

impl Database {
    pub fn new(config: Config) -> StorageResult<Self> {
        let buffer_pool = BufferPool::new(config.buffer_pool_capacity, config.page_size);
        let log_manager = LogManager::new(&config.log_path)?;
        Ok(Database {
            buffer_pool,
            log_manager: RwLock::new(log_manager),
            lock_manager: LockManager::new(),
            catalog: RwLock::new(Catalog::new()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &RwLock<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn log_manager(&self) -> &RwLock<LogManager> {
        &self.log_manager
    }

    pub fn add_table(&self, table: Arc<HeapFile>) {
        self.catalog.wl().add_table(table);
    }

    /// Replays the log against the catalog's tables: every after-image
    /// forward, then every loser's before-image backward. Every table the
    /// log might reference must already be registered via `add_table`
    /// before this is called — recovery resolves log entries against the
    /// catalog, not the other way around. Must run before any table is
    /// read or written ordinarily, and only once (§4.5).
    pub fn recover(&self) -> StorageResult<()> {
        self.log_manager.wl().recover(self, &self.buffer_pool)
    }

    /// Resets every in-memory component to empty, for test isolation.
    /// The log file and heap files on disk are untouched; callers that
    /// want a fully clean slate should point `config.log_path` and each
    /// table's path at a fresh temp directory instead.
    pub fn reset(&self) {
        self.catalog.wl().clear();
        self.buffer_pool.clear();
        self.lock_manager.clear();
    }
}

static GLOBAL: OnceCell<Database> = OnceCell::new();

/// A single process-wide instance for the demo binary. Tests should
/// construct their own `Database::new` instead, so that they don't
/// share log files or buffer pools with each other.
pub fn global() -> &'static Database {
    GLOBAL.get_or_init(|| {
        Database::new(Config::default()).expect("failed to open default database")
    })
}
