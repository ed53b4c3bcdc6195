//! The bounded page cache. Pages are fetched here (which also acquires
//! the page's lock through the `LockManager`), mutated in place by
//! callers, and flushed to disk at transaction commit (§4.4).
//!
//! The cache map is guarded by its own short-lived `Mutex`, held only
//! around lookup/insert/eviction — never across the blocking call into
//! `LockManager::acquire`. Nesting that blocking wait inside the pool's
//! own lock would let one thread hold the pool lock while parked on the
//! lock manager's condition variable, wedging every other thread that
//! only wants to touch the cache (§5: the lock manager's monitor is
//! independent and is never nested inside another).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::debug;
use rand::seq::SliceRandom;

use crate::database::Database;
use crate::error::{StorageError, StorageResult};
use crate::lock_manager::Permission;
use crate::page::HeapPage;
use crate::page_id::PageId;
use crate::transaction::TransactionId;
use crate::util::HandyRwLock;

type PageMap = HashMap<PageId, Arc<RwLock<HeapPage>>>;

pub struct BufferPool {
    capacity: usize,
    page_size: usize,
    pages: Mutex<PageMap>,
}

impl BufferPool {
    pub fn new(capacity: usize, page_size: usize) -> Self {
        BufferPool {
            capacity,
            page_size,
            pages: Mutex::new(HashMap::new()),
        }
    }

    pub fn clear(&self) {
        self.pages.lock().unwrap().clear();
    }

    /// Acquires the requested lock (blocking, with no pool state held),
    /// then returns the cached page, loading (and, if necessary,
    /// evicting to make room for) it first.
    pub fn get_page(
        &self,
        db: &Database,
        tid: TransactionId,
        pid: PageId,
        perm: Permission,
    ) -> StorageResult<Arc<RwLock<HeapPage>>> {
        db.lock_manager().acquire(tid, pid, perm)?;

        let mut pages = self.pages.lock().unwrap();

        if let Some(page) = pages.get(&pid) {
            return Ok(Arc::clone(page));
        }

        if pages.len() >= self.capacity {
            Self::evict_one(&mut pages)?;
        }

        let table = db.catalog().rl().get_table(pid.table_id)?;
        let page = table.read_page(&pid, self.page_size)?;
        let page = Arc::new(RwLock::new(page));
        pages.insert(pid, Arc::clone(&page));
        Ok(page)
    }

    /// Uniform-random eviction restricted to clean pages: a dirty page
    /// belongs to a transaction that has not committed, and commit is
    /// the only path that writes a page to its home file (§4.4). Fails
    /// only when every resident page is currently dirty.
    fn evict_one(pages: &mut PageMap) -> StorageResult<()> {
        let mut candidates: Vec<PageId> = pages.keys().cloned().collect();
        candidates.shuffle(&mut rand::thread_rng());

        for pid in candidates {
            let clean = pages[&pid].rl().is_dirty().is_none();
            if clean {
                debug!("evicting clean page {:?}", pid);
                pages.remove(&pid);
                return Ok(());
            }
        }

        Err(StorageError::Db(
            "buffer pool exhausted: every cached page is dirty".to_string(),
        ))
    }

    pub fn discard_page(&self, pid: &PageId) {
        self.pages.lock().unwrap().remove(pid);
    }

    pub fn holds_lock(&self, db: &Database, tid: TransactionId, pid: &PageId) -> bool {
        db.lock_manager().holds_lock(tid, pid)
    }

    pub fn release_page(&self, db: &Database, tid: TransactionId, pid: &PageId) {
        db.lock_manager().release(tid, pid);
    }

    /// Writes the log record for one dirty page, forces it, then writes
    /// the page to its home file and clears the dirty mark. Write-ahead
    /// is enforced by ordering: the log append (and force) always
    /// happens before `HeapFile::write_page`.
    pub fn flush_page(&self, db: &Database, pid: &PageId) -> StorageResult<()> {
        let page_arc = {
            let pages = self.pages.lock().unwrap();
            match pages.get(pid) {
                Some(p) => Arc::clone(p),
                None => return Ok(()),
            }
        };

        let tid = page_arc.rl().is_dirty();
        if let Some(tid) = tid {
            let before = page_arc.rl().before_image().to_vec();
            let after = page_arc.rl().serialize(self.page_size);
            db.log_manager().wl().log_update(tid, *pid, before, after)?;
            db.log_manager().wl().force()?;

            let table = db.catalog().rl().get_table(pid.table_id)?;
            table.write_page(&page_arc.rl(), self.page_size)?;

            let mut page = page_arc.wl();
            page.set_before_image(self.page_size);
            page.mark_dirty(false, tid);
        }
        Ok(())
    }

    /// Flushes every dirty page regardless of owning transaction. Unsafe
    /// mid-transaction (it writes an active transaction's page to disk);
    /// called only from `LogFile::log_checkpoint` and tests.
    pub fn flush_all_pages(&self, db: &Database) -> StorageResult<()> {
        let dirty: Vec<PageId> = {
            let pages = self.pages.lock().unwrap();
            pages
                .iter()
                .filter(|(_, p)| p.rl().is_dirty().is_some())
                .map(|(pid, _)| *pid)
                .collect()
        };
        for pid in dirty {
            self.flush_page(db, &pid)?;
        }
        Ok(())
    }

    /// Commit: flush every dirty page belonging to `tid` (log record
    /// forced, then the page itself written to its home file and marked
    /// clean) so a clean cached page's on-disk image is never stale
    /// relative to what was just committed — a clean page can be evicted
    /// at any time, with no further flush, precisely because commit
    /// already wrote it through. Abort: discard every dirty page in
    /// memory (its on-disk copy, if any, was never touched, because
    /// NO-STEAL forbade writing it before commit).
    pub fn transaction_complete(
        &self,
        db: &Database,
        tid: TransactionId,
        commit: bool,
    ) -> StorageResult<()> {
        let dirty: Vec<PageId> = {
            let pages = self.pages.lock().unwrap();
            pages
                .iter()
                .filter(|(_, p)| p.rl().is_dirty() == Some(tid))
                .map(|(pid, _)| *pid)
                .collect()
        };

        if commit {
            for pid in dirty {
                self.flush_page(db, &pid)?;
            }
        } else {
            let mut pages = self.pages.lock().unwrap();
            for pid in dirty {
                pages.remove(&pid);
            }
        }
        Ok(())
    }
}
