//! Page identifiers. The table id is the stable hash of the absolute path
//! of the backing file (§3); the page number is zero-based and dense.

use std::convert::TryInto;
use std::io::Read;

use crate::io::{read_exact, Decodeable, Encodeable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub table_id: i64,
    pub page_number: usize,
}

impl PageId {
    pub fn new(table_id: i64, page_number: usize) -> Self {
        PageId {
            table_id,
            page_number,
        }
    }
}

impl Encodeable for PageId {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        buf.extend_from_slice(&self.table_id.to_be_bytes());
        buf.extend_from_slice(&(self.page_number as u32).to_be_bytes());
        buf
    }
}

impl Decodeable for PageId {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let table_id = i64::from_be_bytes(read_exact(reader, 8).try_into().unwrap());
        let page_number =
            u32::from_be_bytes(read_exact(reader, 4).try_into().unwrap()) as usize;
        PageId::new(table_id, page_number)
    }
}

/// Stable hash of an absolute file path, used as the table id (§3).
pub fn table_id_of_path<P: AsRef<std::path::Path>>(path: P) -> i64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let abs =
        std::fs::canonicalize(path.as_ref()).unwrap_or_else(|_| path.as_ref().to_path_buf());
    let mut hasher = DefaultHasher::new();
    abs.hash(&mut hasher);
    hasher.finish() as i64
}
