//! Block payload encoding.
use crate::Value;

use byteorder::{BigEndian, ReadBytesExt};

use std::io::{self, Read};

/// Encode and compress `values`, returning the checksummed block.
pub(crate) fn encode(values: &[Value]) -> io::Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(4 + values.len() * 16);
    raw.extend_from_slice(&(values.len() as u32).to_be_bytes());
    for (ts, value) in values {
        raw.extend_from_slice(&ts.to_be_bytes());
        raw.extend_from_slice(&(value.len() as u32).to_be_bytes());
        raw.extend_from_slice(value);
    }

    let compressed = snap::raw::Encoder::new()
        .compress_vec(&raw)
        .map_err(io::Error::other)?;
    let mut block = Vec::with_capacity(4 + compressed.len());
    block.extend_from_slice(&crc32fast::hash(&compressed).to_be_bytes());
    block.extend_from_slice(&compressed);
    Ok(block)
}

/// Decode a decompressed block payload.
pub(crate) fn decode(mut raw: &[u8]) -> io::Result<Vec<Value>> {
    let count = raw.read_u32::<BigEndian>()?;
    let mut values = Vec::with_capacity(count.min(crate::MAX_BLOCK_VALUES as u32) as usize);
    for _ in 0..count {
        let ts = raw.read_i64::<BigEndian>()?;
        let len = raw.read_u32::<BigEndian>()?;
        let mut value = vec![0; len as usize];
        raw.read_exact(&mut value)?;
        values.push((ts, value));
    }
    Ok(values)
}
