//! Tuple values and the record identifier that ties a tuple to the slot
//! it occupies on disk.

use std::io::Read;

use crate::io::{read_exact, Decodeable, Encodeable};
use crate::page_id::PageId;
use crate::schema::{FieldType, TupleDesc};

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    fn encode(&self, as_type: &FieldType) -> Vec<u8> {
        match (self, as_type) {
            (Field::Int(v), FieldType::Int) => v.encode(),
            (Field::Str(s), FieldType::Str(max_len)) => {
                let bytes = s.as_bytes();
                assert!(
                    bytes.len() <= *max_len,
                    "string {:?} longer than field max_len {}",
                    s,
                    max_len
                );
                let mut buf = Vec::with_capacity(1 + max_len);
                buf.push(bytes.len() as u8);
                buf.extend_from_slice(bytes);
                buf.resize(1 + max_len, 0);
                buf
            }
            _ => panic!("field/type mismatch"),
        }
    }

    fn decode<R: Read>(reader: &mut R, field_type: &FieldType) -> Self {
        match field_type {
            FieldType::Int => Field::Int(i32::decode_from(reader)),
            FieldType::Str(max_len) => {
                let len = read_exact(reader, 1)[0] as usize;
                let bytes = read_exact(reader, *max_len);
                let s = String::from_utf8(bytes[..len].to_vec())
                    .expect("stored string field is not valid utf8");
                Field::Str(s)
            }
        }
    }
}

/// A tuple's position: the page it lives on, plus its slot index within
/// that page's header bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    pub fields: Vec<Field>,
    pub record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(fields: Vec<Field>) -> Self {
        Tuple {
            fields,
            record_id: None,
        }
    }

    pub fn get_int(&self, i: usize) -> i32 {
        match &self.fields[i] {
            Field::Int(v) => *v,
            other => panic!("field {} is not an int: {:?}", i, other),
        }
    }

    pub(crate) fn serialize(&self, desc: &TupleDesc) -> Vec<u8> {
        let mut buf = Vec::with_capacity(desc.tuple_size());
        for (field, schema) in self.fields.iter().zip(desc.fields().iter()) {
            buf.extend_from_slice(&field.encode(&schema.field_type));
        }
        buf
    }

    pub(crate) fn deserialize(bytes: &[u8], desc: &TupleDesc) -> Self {
        let mut cursor = std::io::Cursor::new(bytes);
        let fields = desc
            .fields()
            .iter()
            .map(|schema| Field::decode(&mut cursor, &schema.field_type))
            .collect();
        Tuple {
            fields,
            record_id: None,
        }
    }
}

pub fn simple_int_tuple(values: &[i32]) -> Tuple {
    Tuple::new(values.iter().map(|v| Field::Int(*v)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;

    #[test]
    fn round_trips_int_and_string_tuple() {
        let desc = TupleDesc::new(vec![
            FieldSchema {
                name: "id".into(),
                field_type: FieldType::Int,
            },
            FieldSchema {
                name: "name".into(),
                field_type: FieldType::Str(8),
            },
        ]);
        let t = Tuple::new(vec![Field::Int(42), Field::Str("abc".to_string())]);
        let bytes = t.serialize(&desc);
        assert_eq!(bytes.len(), desc.tuple_size());
        let back = Tuple::deserialize(&bytes, &desc);
        assert_eq!(back.get_int(0), 42);
        assert_eq!(back.fields[1], Field::Str("abc".to_string()));
    }
}
