//! Fixed-format binary serialization
//!
//! Every wire and storage type implements [`Encode`] and [`Decode`].
//! All integers are big-endian, counts are `u16` and bounded by the
//! caller. A count above its bound is a [`FormatError`], never truncated.

use crate::crypto::{Hash, HASH_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Wire format errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Invalid magic bytes")]
    BadMagic,
    #[error("Unknown message type: {0}")]
    UnknownType(u8),
    #[error("Checksum mismatch")]
    ChecksumMismatch,
    #[error("Malformed field: {0}")]
    MalformedField(&'static str),
    #[error("Truncated input while reading {0}")]
    Truncated(&'static str),
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    #[error("Message too large: {0} bytes (max: {1})")]
    TooLarge(usize, usize),
}

/// Types with a fixed binary layout.
pub trait Encode {
    fn encode(&self, buf: &mut BytesMut);

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Types that can be read back from their binary layout.
pub trait Decode: Sized {
    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError>;

    /// Decode a value that must span the whole input.
    fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        let mut buf = data;
        let value = Self::decode(&mut buf)?;
        if !buf.is_empty() {
            return Err(FormatError::TrailingBytes(buf.len()));
        }
        Ok(value)
    }
}

fn ensure(buf: &[u8], len: usize, field: &'static str) -> Result<(), FormatError> {
    if buf.len() < len {
        return Err(FormatError::Truncated(field));
    }
    Ok(())
}

pub fn read_u8(buf: &mut &[u8], field: &'static str) -> Result<u8, FormatError> {
    ensure(buf, 1, field)?;
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut &[u8], field: &'static str) -> Result<u16, FormatError> {
    ensure(buf, 2, field)?;
    Ok(buf.get_u16())
}

pub fn read_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, FormatError> {
    ensure(buf, 4, field)?;
    Ok(buf.get_u32())
}

pub fn read_u64(buf: &mut &[u8], field: &'static str) -> Result<u64, FormatError> {
    ensure(buf, 8, field)?;
    Ok(buf.get_u64())
}

pub fn read_array<const N: usize>(
    buf: &mut &[u8],
    field: &'static str,
) -> Result<[u8; N], FormatError> {
    ensure(buf, N, field)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Read a `u16` element count, rejecting anything above `max`.
pub fn read_count(buf: &mut &[u8], max: usize, field: &'static str) -> Result<usize, FormatError> {
    let count = read_u16(buf, field)? as usize;
    if count > max {
        return Err(FormatError::MalformedField(field));
    }
    Ok(count)
}

/// Read a counted list of at most `max` elements.
pub fn read_list<T: Decode>(
    buf: &mut &[u8],
    max: usize,
    field: &'static str,
) -> Result<Vec<T>, FormatError> {
    let count = read_count(buf, max, field)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(T::decode(buf)?);
    }
    Ok(items)
}

/// Write a counted list. The caller has already checked the bound.
pub fn write_list<T: Encode>(buf: &mut BytesMut, items: &[T]) {
    buf.put_u16(items.len() as u16);
    for item in items {
        item.encode(buf);
    }
}

impl Encode for Hash {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.as_bytes());
    }
}

impl Decode for Hash {
    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        Ok(Hash::new(read_array::<HASH_SIZE>(buf, "hash")?))
    }
}
