//! A file of equally sized heap pages. Page numbers are zero-based and
//! dense; the file's length is always a multiple of the page size (§4.2).

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::database::Database;
use crate::error::StorageResult;
use crate::io::SmallFile;
use crate::lock_manager::Permission;
use crate::page::HeapPage;
use crate::page_id::{table_id_of_path, PageId};
use crate::schema::TupleDesc;
use crate::transaction::TransactionId;
use crate::tuple::{RecordId, Tuple};
use crate::util::HandyRwLock;

pub struct HeapFile {
    file: Mutex<SmallFile>,
    table_id: i64,
    path: PathBuf,
    desc: Arc<TupleDesc>,
}

impl HeapFile {
    pub fn new<P: AsRef<Path>>(path: P, desc: Arc<TupleDesc>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let table_id = table_id_of_path(&path);
        let file = SmallFile::new(&path)?;
        Ok(HeapFile {
            file: Mutex::new(file),
            table_id,
            path,
            desc,
        })
    }

    pub fn table_id(&self) -> i64 {
        self.table_id
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_pages(&self, page_size: usize) -> StorageResult<usize> {
        let len = self.file.lock().unwrap().size()?;
        Ok((len as usize) / page_size)
    }

    pub fn read_page(&self, pid: &PageId, page_size: usize) -> StorageResult<HeapPage> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((pid.page_number * page_size) as u64))?;
        let bytes = file.read_exact_at(page_size)?;
        HeapPage::new(*pid, Arc::clone(&self.desc), &bytes, page_size)
    }

    pub fn write_page(&self, page: &HeapPage, page_size: usize) -> StorageResult<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(
            (page.page_id.page_number * page_size) as u64,
        ))?;
        file.write_bytes(&page.serialize(page_size))?;
        file.flush()
    }

    /// Find-or-append: scan existing pages for a free slot (taking each
    /// read-only first), else extend the file with a fresh empty page.
    pub fn insert_tuple(
        &self,
        db: &Database,
        tid: TransactionId,
        page_size: usize,
        t: Tuple,
    ) -> StorageResult<RecordId> {
        let num_pages = self.num_pages(page_size)?;

        for page_number in 0..num_pages {
            let pid = PageId::new(self.table_id, page_number);
            let has_room = {
                let page_arc =
                    Self::fetch(db, tid, pid, Permission::ReadOnly)?;
                let page = page_arc.rl();
                page.num_empty_slots() > 0
            };
            if has_room {
                let page_arc =
                    Self::fetch(db, tid, pid, Permission::ReadWrite)?;
                let mut page = page_arc.wl();
                let rid = page.insert_tuple(t)?;
                page.mark_dirty(true, tid);
                return Ok(rid);
            }
        }

        let pid = PageId::new(self.table_id, num_pages);
        let empty = HeapPage::empty(pid, Arc::clone(&self.desc), page_size);
        self.write_page(&empty, page_size)?;

        let page_arc = Self::fetch(db, tid, pid, Permission::ReadWrite)?;
        let mut page = page_arc.wl();
        let rid = page.insert_tuple(t)?;
        page.mark_dirty(true, tid);
        Ok(rid)
    }

    pub fn delete_tuple(
        &self,
        db: &Database,
        tid: TransactionId,
        rid: RecordId,
    ) -> StorageResult<()> {
        let page_arc = Self::fetch(db, tid, rid.page_id, Permission::ReadWrite)?;
        let mut page = page_arc.wl();
        page.delete_tuple(rid)?;
        page.mark_dirty(true, tid);
        Ok(())
    }

    fn fetch(
        db: &Database,
        tid: TransactionId,
        pid: PageId,
        perm: Permission,
    ) -> StorageResult<Arc<std::sync::RwLock<HeapPage>>> {
        db.buffer_pool().get_page(db, tid, pid, perm)
    }

    /// A forward cursor over every live tuple of every page, fetching
    /// pages read-only through the buffer pool on demand (§4.2). Takes
    /// an owned `Arc` so the returned iterator does not borrow from a
    /// temporary (the catalog hands out tables as `Arc<HeapFile>`).
    pub fn iter<'a>(self: &Arc<Self>, db: &'a Database, tid: TransactionId) -> HeapFileIter<'a> {
        HeapFileIter {
            file: Arc::clone(self),
            db,
            tid,
            page_number: 0,
            slot_index: 0,
            page_size: None,
        }
    }
}

pub struct HeapFileIter<'a> {
    file: Arc<HeapFile>,
    db: &'a Database,
    tid: TransactionId,
    page_number: usize,
    slot_index: usize,
    page_size: Option<usize>,
}

impl<'a> HeapFileIter<'a> {
    pub fn rewind(&mut self) {
        self.page_number = 0;
        self.slot_index = 0;
    }
}

impl<'a> Iterator for HeapFileIter<'a> {
    type Item = StorageResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        let page_size = match self.page_size {
            Some(p) => p,
            None => {
                let p = self.db.config().page_size;
                self.page_size = Some(p);
                p
            }
        };

        loop {
            let num_pages = match self.file.num_pages(page_size) {
                Ok(n) => n,
                Err(e) => return Some(Err(e)),
            };
            if self.page_number >= num_pages {
                return None;
            }

            let pid = PageId::new(self.file.table_id, self.page_number);
            let page_arc = match self
                .db
                .buffer_pool()
                .get_page(self.db, self.tid, pid, Permission::ReadOnly)
            {
                Ok(p) => p,
                Err(e) => return Some(Err(e)),
            };
            let page = page_arc.rl();

            while self.slot_index < page.num_slots_total() {
                let slot = self.slot_index;
                self.slot_index += 1;
                if let Some(t) = page.tuple_at(slot) {
                    return Some(Ok(t.clone()));
                }
            }

            self.page_number += 1;
            self.slot_index = 0;
        }
    }
}
