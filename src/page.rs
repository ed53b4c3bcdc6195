//! Fixed-size heap pages: a bitmap slot header (LSB-first within each
//! header byte, per the external format in spec §6) followed by fixed
//! -width tuple slots and zero padding to the page size.

use std::sync::Arc;

use log::debug;

use crate::error::{StorageError, StorageResult};
use crate::page_id::PageId;
use crate::schema::TupleDesc;
use crate::transaction::TransactionId;
use crate::tuple::{RecordId, Tuple};

pub struct HeapPage {
    pub page_id: PageId,
    desc: Arc<TupleDesc>,
    header: Vec<u8>,
    slots: Vec<Option<Tuple>>,
    dirter: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl HeapPage {
    /// Number of slots a page of `page_size` bytes holds under `desc`,
    /// per `S = floor((P*8) / (tupleSize*8 + 1))`.
    pub fn num_slots(desc: &TupleDesc, page_size: usize) -> usize {
        (page_size * 8) / (desc.tuple_size() * 8 + 1)
    }

    /// Header length in bytes, `ceil(S / 8)`.
    pub fn header_size(desc: &TupleDesc, page_size: usize) -> usize {
        (Self::num_slots(desc, page_size) + 7) / 8
    }

    fn is_slot_used(header: &[u8], slot_id: usize) -> bool {
        let byte = header[slot_id / 8];
        let bit = slot_id % 8;
        (byte & (1 << bit)) != 0
    }

    fn set_slot_used(header: &mut [u8], slot_id: usize, used: bool) {
        let byte_index = slot_id / 8;
        let bit = slot_id % 8;
        if used {
            header[byte_index] |= 1 << bit;
        } else {
            header[byte_index] &= !(1 << bit);
        }
    }

    /// Parse a `page_size`-byte image into a page. Bit-exact round trip
    /// with `serialize` is an invariant (spec §8.1).
    pub fn new(
        page_id: PageId,
        desc: Arc<TupleDesc>,
        bytes: &[u8],
        page_size: usize,
    ) -> StorageResult<Self> {
        let header_size = Self::header_size(&desc, page_size);
        let num_slots = Self::num_slots(&desc, page_size);
        let tuple_size = desc.tuple_size();

        if bytes.len() != page_size {
            return Err(StorageError::IllegalState(format!(
                "page image has {} bytes, expected {}",
                bytes.len(),
                page_size
            )));
        }

        let header = bytes[0..header_size].to_vec();
        debug!("page {:?} header: {:x?}", page_id, header);

        let mut slots = Vec::with_capacity(num_slots);
        let mut start = header_size;
        for slot_id in 0..num_slots {
            let end = start + tuple_size;
            if Self::is_slot_used(&header, slot_id) {
                let mut t = Tuple::deserialize(&bytes[start..end], &desc);
                t.record_id = Some(RecordId {
                    page_id,
                    slot_index: slot_id,
                });
                slots.push(Some(t));
            } else {
                slots.push(None);
            }
            start = end;
        }

        Ok(HeapPage {
            page_id,
            desc,
            header,
            slots,
            dirter: None,
            before_image: bytes.to_vec(),
        })
    }

    /// An empty page image of `page_size` bytes (a freshly-extended file
    /// page before anything is inserted into it).
    pub fn empty(page_id: PageId, desc: Arc<TupleDesc>, page_size: usize) -> Self {
        let header_size = Self::header_size(&desc, page_size);
        let num_slots = Self::num_slots(&desc, page_size);
        HeapPage {
            page_id,
            before_image: vec![0u8; page_size],
            header: vec![0u8; header_size],
            slots: vec![None; num_slots],
            dirter: None,
            desc,
        }
    }

    pub fn serialize(&self, page_size: usize) -> Vec<u8> {
        let mut buf = self.header.clone();
        for slot in &self.slots {
            match slot {
                Some(t) => buf.extend_from_slice(&t.serialize(&self.desc)),
                None => buf.extend(std::iter::repeat(0u8).take(self.desc.tuple_size())),
            }
        }
        buf.resize(page_size, 0);
        buf
    }

    pub fn num_slots_total(&self) -> usize {
        self.slots.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    pub fn is_slot_used(&self, slot_id: usize) -> bool {
        Self::is_slot_used(&self.header, slot_id)
    }

    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn tuple_at(&self, slot: usize) -> Option<&Tuple> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    pub fn insert_tuple(&mut self, mut t: Tuple) -> StorageResult<RecordId> {
        if t.fields.len() != self.desc.num_fields() {
            return Err(StorageError::Db(
                "tuple descriptor does not match page's descriptor".to_string(),
            ));
        }
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or_else(|| StorageError::Db("page is full".to_string()))?;

        let rid = RecordId {
            page_id: self.page_id,
            slot_index: slot,
        };
        t.record_id = Some(rid);
        self.slots[slot] = Some(t);
        Self::set_slot_used(&mut self.header, slot, true);
        Ok(rid)
    }

    pub fn delete_tuple(&mut self, rid: RecordId) -> StorageResult<()> {
        if rid.page_id != self.page_id {
            return Err(StorageError::Db("tuple is not on this page".to_string()));
        }
        if self
            .slots
            .get(rid.slot_index)
            .and_then(|s| s.as_ref())
            .is_none()
        {
            return Err(StorageError::Db("slot is already empty".to_string()));
        }
        self.slots[rid.slot_index] = None;
        Self::set_slot_used(&mut self.header, rid.slot_index, false);
        Ok(())
    }

    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirter = if dirty { Some(tid) } else { None };
    }

    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirter
    }

    /// Snapshot the current serialized bytes as the new before-image.
    /// Called by the buffer pool on commit (§4.4).
    pub fn set_before_image(&mut self, page_size: usize) {
        self.before_image = self.serialize(page_size);
    }

    pub fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TupleDesc;
    use crate::tuple::simple_int_tuple;

    fn desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::simple_int(2))
    }

    #[test]
    fn insert_then_serialize_round_trips() {
        let pid = PageId::new(1, 0);
        let d = desc();
        let mut page = HeapPage::empty(pid, d.clone(), 4096);
        let rid = page.insert_tuple(simple_int_tuple(&[1, 2])).unwrap();
        assert_eq!(rid.slot_index, 0);
        assert!(page.is_slot_used(0));

        let bytes = page.serialize(4096);
        let reparsed = HeapPage::new(pid, d, &bytes, 4096).unwrap();
        assert_eq!(reparsed.serialize(4096), bytes);
        assert_eq!(reparsed.tuples().count(), 1);
    }

    #[test]
    fn page_full_reports_db_error() {
        let pid = PageId::new(1, 0);
        let d = desc();
        let mut page = HeapPage::empty(pid, d, 4096);
        let capacity = page.num_slots_total();
        for i in 0..capacity {
            page.insert_tuple(simple_int_tuple(&[i as i32, i as i32]))
                .unwrap();
        }
        let err = page.insert_tuple(simple_int_tuple(&[0, 0])).unwrap_err();
        match err {
            StorageError::Db(_) => {}
            other => panic!("expected Db error, got {:?}", other),
        }
    }

    #[test]
    fn delete_then_reinsert_reuses_slot() {
        let pid = PageId::new(1, 0);
        let d = desc();
        let mut page = HeapPage::empty(pid, d, 4096);
        let rid = page.insert_tuple(simple_int_tuple(&[1, 1])).unwrap();
        page.delete_tuple(rid).unwrap();
        assert!(!page.is_slot_used(0));
        let rid2 = page.insert_tuple(simple_int_tuple(&[2, 2])).unwrap();
        assert_eq!(rid2.slot_index, 0);
    }

    #[test]
    fn header_bits_are_lsb_first() {
        let pid = PageId::new(1, 0);
        let d = desc();
        let mut page = HeapPage::empty(pid, d, 4096);
        page.insert_tuple(simple_int_tuple(&[1, 1])).unwrap();
        // slot 0 -> bit 0 of header byte 0 (LSB-first).
        assert_eq!(page.header[0] & 0b0000_0001, 1);
    }
}
