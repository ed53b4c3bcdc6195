use std::sync::Arc;

use log::info;
use small_storage::config::Config;
use small_storage::database::Database;
use small_storage::heap_file::HeapFile;
use small_storage::schema::TupleDesc;
use small_storage::sequential_scan::SequentialScan;
use small_storage::transaction::Transaction;
use small_storage::tuple::simple_int_tuple;
use small_storage::util::init_log;

/// Inserts a handful of rows into a fresh table, commits, then scans the
/// table back out. A smoke-test harness for the storage core, not a
/// server: there is no client protocol here (§2 Non-goals).
fn main() {
    init_log();

    let config = Config::default();
    let db = Database::new(config).expect("failed to open database");

    let desc = Arc::new(TupleDesc::simple_int(2));
    let table = Arc::new(HeapFile::new("demo.db", desc).expect("failed to open heap file"));
    db.add_table(Arc::clone(&table));
    db.recover().expect("recovery failed");

    let tx = Transaction::begin(&db).expect("failed to begin transaction");
    for i in 0..10 {
        table
            .insert_tuple(&db, tx.id(), db.config().page_size, simple_int_tuple(&[i, i * i]))
            .expect("insert failed");
    }
    tx.commit(&db).expect("commit failed");

    let tx = Transaction::begin(&db).expect("failed to begin transaction");
    let scan = SequentialScan::open(&db, tx.id(), table.table_id()).expect("scan failed");
    for row in scan {
        let row = row.expect("read failed");
        info!("{} {}", row.get_int(0), row.get_int(1));
    }
    tx.commit(&db).expect("commit failed");
}
