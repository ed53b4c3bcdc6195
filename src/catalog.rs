//! A thin, read-mostly table-id -> `HeapFile` directory. Parsing an
//! external catalog file format is explicitly out of scope (§2); this is
//! the in-process equivalent a test or demo harness registers tables
//! through.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{StorageError, StorageResult};
use crate::heap_file::HeapFile;

#[derive(Default)]
pub struct Catalog {
    tables: HashMap<i64, Arc<HeapFile>>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog {
            tables: HashMap::new(),
        }
    }

    pub fn add_table(&mut self, table: Arc<HeapFile>) {
        self.tables.insert(table.table_id(), table);
    }

    pub fn get_table(&self, table_id: i64) -> StorageResult<Arc<HeapFile>> {
        self.tables
            .get(&table_id)
            .cloned()
            .ok_or_else(|| StorageError::Db(format!("no such table: {}", table_id)))
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}
