//! Composite key encoding for index buckets.
//!
//! An index entry key is `varint(len(value)) || value || record_key`. The
//! varint is self-delimiting, so the lookup prefix `varint(len(v)) || v` of one
//! value can never be a prefix of the entry of a different value: "a" does not
//! match entries filed under "aa". Entries of the same value sort by record key.

use snafu::ensure;

use crate::error::{KeyTooLargeSnafu, Result};

/// Largest index value accepted by the varint length prefix.
pub const MAX_INDEX_VALUE_LEN: usize = u32::MAX as usize;

/// Encodes the lookup prefix shared by every entry filed under `value`.
pub fn encode_index_prefix(value: &[u8]) -> Result<Vec<u8>> {
    ensure!(
        value.len() <= MAX_INDEX_VALUE_LEN,
        KeyTooLargeSnafu { size: value.len(), max: MAX_INDEX_VALUE_LEN }
    );

    let mut buf = Vec::with_capacity(5 + value.len());
    encode_length_prefixed(value, &mut buf);
    Ok(buf)
}

/// Encodes the index entry key filing `record_key` under `value`.
pub fn encode_index_key(value: &[u8], record_key: &[u8]) -> Result<Vec<u8>> {
    let mut buf = encode_index_prefix(value)?;
    buf.extend_from_slice(record_key);
    Ok(buf)
}

/// Splits an index entry key into `(value, record_key)`.
///
/// Returns `None` when the key is not a well-formed composite key.
pub fn decode_index_key(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    let (value, consumed) = decode_length_prefixed(buf)?;
    Some((value, &buf[consumed..]))
}

/// Encode a length-prefixed byte slice.
///
/// Callers guarantee `data.len() <= u32::MAX`.
#[allow(clippy::cast_possible_truncation)]
fn encode_length_prefixed(data: &[u8], buf: &mut Vec<u8>) {
    encode_varint(data.len() as u32, buf);
    buf.extend_from_slice(data);
}

/// Decode a length-prefixed byte slice. Returns (data, bytes_consumed).
fn decode_length_prefixed(buf: &[u8]) -> Option<(&[u8], usize)> {
    let (len, varint_size) = decode_varint(buf)?;
    let total_size = varint_size.checked_add(usize::try_from(len).ok()?)?;
    if buf.len() >= total_size { Some((&buf[varint_size..total_size], total_size)) } else { None }
}

/// Encode a u32 as a varint (1-5 bytes).
#[allow(clippy::cast_possible_truncation)]
fn encode_varint(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            buf.push(value as u8);
            return;
        }
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
}

/// Decode a varint from a byte slice. Returns (value, bytes_consumed).
///
/// Rejects non-canonical encodings so every length has exactly one prefix.
fn decode_varint(buf: &[u8]) -> Option<(u32, usize)> {
    let mut value: u64 = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if i >= 5 {
            return None; // Varint too long
        }

        value |= u64::from(byte & 0x7F) << (7 * i);

        if byte & 0x80 == 0 {
            if i > 0 && byte == 0 {
                return None; // Trailing zero group
            }
            return u32::try_from(value).ok().map(|v| (v, i + 1));
        }
    }

    None // Incomplete varint
}
