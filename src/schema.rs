//! Tuple descriptors: the closed set of field types this crate supports
//! and the ordered, named field list ("row scheme" in the teacher's
//! terminology) that gives a table its fixed on-disk tuple size.

use std::convert::TryInto;
use std::io::Read;

use crate::io::{read_exact, Decodeable, Encodeable, Utf};

pub const INT_SIZE: usize = 4;

/// A field's type. Only INT and fixed-width STRING are needed by this
/// spec; both have a statically known, fixed byte width so that every
/// slot in a heap page is the same size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    /// A fixed-width string field; `max_len` bytes are always reserved,
    /// the value is length-prefixed (1 byte) inside that reservation.
    Str(usize),
}

impl FieldType {
    pub fn byte_size(&self) -> usize {
        match self {
            FieldType::Int => INT_SIZE,
            FieldType::Str(max_len) => 1 + max_len,
        }
    }
}

impl Encodeable for FieldType {
    fn encode(&self) -> Vec<u8> {
        match self {
            FieldType::Int => vec![0u8],
            FieldType::Str(max_len) => {
                let mut buf = vec![1u8];
                buf.extend_from_slice(&(*max_len as u32).to_be_bytes());
                buf
            }
        }
    }
}

impl Decodeable for FieldType {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let tag = read_exact(reader, 1)[0];
        match tag {
            0 => FieldType::Int,
            1 => {
                let max_len =
                    u32::from_be_bytes(read_exact(reader, 4).try_into().unwrap()) as usize;
                FieldType::Str(max_len)
            }
            other => panic!("unknown field type tag: {}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
}

/// An ordered sequence of typed, named fields. Two descriptors are equal
/// iff their field-type sequences match (names are not compared), per the
/// spec's data model.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    fields: Vec<FieldSchema>,
}

impl TupleDesc {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        TupleDesc { fields }
    }

    pub fn simple_int(columns: usize) -> Self {
        let fields = (0..columns)
            .map(|i| FieldSchema {
                name: format!("field_{}", i),
                field_type: FieldType::Int,
            })
            .collect();
        TupleDesc::new(fields)
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Byte width of one tuple under this descriptor.
    pub fn tuple_size(&self) -> usize {
        self.fields.iter().map(|f| f.field_type.byte_size()).sum()
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Encodeable for TupleDesc {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.fields.len() as u32).to_be_bytes());
        for f in &self.fields {
            buf.extend_from_slice(&Utf(f.name.clone()).encode());
            buf.extend_from_slice(&f.field_type.encode());
        }
        buf
    }
}

impl Decodeable for TupleDesc {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let count = u32::from_be_bytes(read_exact(reader, 4).try_into().unwrap());
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = Utf::decode_from(reader).0;
            let field_type = FieldType::decode_from(reader);
            fields.push(FieldSchema { name, field_type });
        }
        TupleDesc::new(fields)
    }
}
