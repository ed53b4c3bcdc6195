//! A forward, full-table scan operator. Thin by design (§2): it exists
//! to demonstrate the storage core end to end, not to host a query
//! planner.

use crate::database::Database;
use crate::error::StorageResult;
use crate::heap_file::HeapFileIter;
use crate::transaction::TransactionId;
use crate::tuple::Tuple;

pub struct SequentialScan<'a> {
    table_id: i64,
    iter: HeapFileIter<'a>,
}

impl<'a> SequentialScan<'a> {
    pub fn open(db: &'a Database, tid: TransactionId, table_id: i64) -> StorageResult<Self> {
        let table = db.catalog().rl().get_table(table_id)?;
        let iter = table.iter(db, tid);
        Ok(SequentialScan { table_id, iter })
    }

    pub fn table_id(&self) -> i64 {
        self.table_id
    }

    pub fn rewind(&mut self) {
        self.iter.rewind();
    }

    pub fn close(self) {}
}

impl<'a> Iterator for SequentialScan<'a> {
    type Item = StorageResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::heap_file::HeapFile;
    use crate::schema::TupleDesc;
    use crate::transaction::Transaction;
    use crate::tuple::simple_int_tuple;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn open_db(dir: &tempfile::TempDir) -> Database {
        let config = Config {
            page_size: 4096,
            buffer_pool_capacity: 50,
            log_path: dir.path().join("db.log"),
        };
        Database::new(config).unwrap()
    }

    #[test]
    fn scans_every_inserted_tuple_in_order() {
        crate::util::init_log();
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        let desc = Arc::new(TupleDesc::simple_int(2));
        let table = Arc::new(HeapFile::new(dir.path().join("t.db"), desc).unwrap());
        db.add_table(Arc::clone(&table));

        let tx = Transaction::begin(&db).unwrap();
        for i in 0..50 {
            table
                .insert_tuple(&db, tx.id(), 4096, simple_int_tuple(&[i, i * 2]))
                .unwrap();
        }
        tx.commit(&db).unwrap();

        let tx2 = Transaction::begin(&db).unwrap();
        let scan = SequentialScan::open(&db, tx2.id(), table.table_id()).unwrap();
        let values: Vec<i32> = scan.map(|r| r.unwrap().get_int(0)).collect();
        assert_eq!(values, (0..50).collect::<Vec<_>>());
        tx2.commit(&db).unwrap();
    }

    #[test]
    fn rewind_restarts_from_the_first_tuple() {
        crate::util::init_log();
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        let desc = Arc::new(TupleDesc::simple_int(1));
        let table = Arc::new(HeapFile::new(dir.path().join("t.db"), desc).unwrap());
        db.add_table(Arc::clone(&table));

        let tx = Transaction::begin(&db).unwrap();
        for i in 0..10 {
            table
                .insert_tuple(&db, tx.id(), 4096, simple_int_tuple(&[i]))
                .unwrap();
        }
        tx.commit(&db).unwrap();

        let tx2 = Transaction::begin(&db).unwrap();
        let mut scan = SequentialScan::open(&db, tx2.id(), table.table_id()).unwrap();
        let first_pass: Vec<i32> = scan
            .by_ref()
            .take(5)
            .map(|r| r.unwrap().get_int(0))
            .collect();
        scan.rewind();
        let second_pass: Vec<i32> = scan.take(10).map(|r| r.unwrap().get_int(0)).collect();

        assert_eq!(first_pass, vec![0, 1, 2, 3, 4]);
        assert_eq!(second_pass, (0..10).collect::<Vec<_>>());
        tx2.commit(&db).unwrap();
    }
}
