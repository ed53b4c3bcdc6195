use std::{
    convert::TryInto,
    fs::{File, OpenOptions},
    io::{Cursor, Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::Path,
};

use crate::error::{StorageError, StorageResult};

/// A thin wrapper over `std::fs::File` with typed, length-exact read/write
/// built on top of `Encodeable`/`Decodeable`. Grounded on the teacher's
/// `SmallFile`; used for both heap files and the log file.
pub struct SmallFile {
    file: File,
}

impl SmallFile {
    pub fn new<P: AsRef<Path>>(file_path: P) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .open(file_path)?;
        Ok(Self { file })
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> StorageResult<()> {
        self.file.write_all(bytes)?;
        Ok(())
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) -> StorageResult<()> {
        self.write_bytes(&obj.encode())
    }

    pub fn read_exact_at(&mut self, len: usize) -> StorageResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read<T: Decodeable>(&mut self, len: usize) -> StorageResult<T> {
        let bytes = self.read_exact_at(len)?;
        let mut reader = Cursor::new(bytes);
        Ok(T::decode_from(&mut reader))
    }

    pub fn size(&self) -> StorageResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn position(&mut self) -> StorageResult<u64> {
        Ok(self.file.seek(SeekFrom::Current(0))?)
    }

    pub fn set_len(&mut self, len: u64) -> StorageResult<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    pub fn seek(&mut self, pos: SeekFrom) -> StorageResult<u64> {
        Ok(self.file.seek(pos)?)
    }

    pub fn flush(&mut self) -> StorageResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// Lets `Decodeable` implementations stream directly off the file for
/// variable-length records (the log manager's use case), instead of
/// going through `SmallFile::read`'s fixed-length API.
impl Read for SmallFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

pub fn read_into<T: Decodeable, R: Read>(reader: &mut R) -> T {
    T::decode_from(reader)
}

pub fn read_exact<R: Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .unwrap_or_else(|_| panic!("io error, expected {} bytes", bytes_count));
    buffer
}

/// An in-memory byte-buffer builder, used to assemble a page image or a log
/// record before it is written in one shot. Grounded on the teacher's
/// `SmallWriter`.
#[derive(Default)]
pub struct SmallWriter {
    buf: Vec<u8>,
}

impl SmallWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.encode().as_slice());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn to_padded_bytes(&self, size: usize) -> StorageResult<Vec<u8>> {
        let mut buf = self.buf.clone();
        if buf.len() > size {
            return Err(StorageError::IllegalState(format!(
                "buffer size is larger than the given size: {} > {}",
                buf.len(),
                size
            )));
        }
        buf.resize(size, 0);
        Ok(buf)
    }
}

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable {
    fn decode_from<R: Read>(reader: &mut R) -> Self;
}

/// UTF string, length-prefixed with a 2-byte big-endian count of bytes, per
/// the log file's external wire format (spec §6).
pub struct Utf(pub String);

impl Encodeable for Utf {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let payload = self.0.as_bytes();
        let len = payload.len() as u16;
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }
}

impl Decodeable for Utf {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let len = u16::from_be_bytes(read_exact(reader, 2).try_into().unwrap());
        let bytes = read_exact(reader, len as usize);
        Utf(String::from_utf8(bytes).expect("log record holds invalid utf8"))
    }
}

/// Length-prefixed byte blob (4-byte big-endian length then the bytes),
/// used for page images embedded in log records.
impl Encodeable for Vec<u8> {
    fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let len = self.len() as u32;
        buffer.extend_from_slice(&len.to_be_bytes());
        buffer.extend_from_slice(self);
        buffer
    }
}

impl Decodeable for Vec<u8> {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let len = u32::from_be_bytes(read_exact(reader, 4).try_into().unwrap());
        read_exact(reader, len as usize)
    }
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_be_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: Read>(reader: &mut R) -> Self {
                    let bytes = read_exact(reader, size_of::<Self>());
                    Self::from_be_bytes(bytes.try_into().unwrap())
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, i8, i16, i32, i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_utf() {
        let s = Utf("hello, small-storage".to_string());
        let mut cursor = Cursor::new(s.encode());
        let back = Utf::decode_from(&mut cursor);
        assert_eq!(back.0, "hello, small-storage");
    }

    #[test]
    fn round_trips_big_endian_ints() {
        let v: i64 = -123456789;
        let mut cursor = Cursor::new(v.encode());
        assert_eq!(i64::decode_from(&mut cursor), v);
    }

    #[test]
    fn big_endian_is_actually_big_endian() {
        let v: i32 = 1;
        assert_eq!(v.encode(), vec![0, 0, 0, 1]);
    }
}
