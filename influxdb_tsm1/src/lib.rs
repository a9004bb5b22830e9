//! The `tsm1` shard format: a directory of immutable, indexed TSM files plus
//! the field definitions of the measurements stored in them.
//!
//! ```text
//! ┌────────┬────────────────────────────┬─────────────────┬──────────┐
//! │ Header │           Blocks           │      Index      │  Footer  │
//! │5 bytes │   crc32 u32 │ snappy data  │ sorted by key   │ 8 bytes  │
//! └────────┴────────────────────────────┴─────────────────┴──────────┘
//! ```
//!
//! A decompressed block holds `count u32` followed by `count` values of
//! `(timestamp i64, len u32, bytes)`. Each index entry is `key_len u16, key,
//! count u16` followed by `count` block entries of `(min i64, max i64,
//! offset u64, size u32)`. The footer holds the offset of the index.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod block;
pub mod reader;
pub mod store;
pub mod writer;

pub use reader::{IndexBlock, TsmFile};
pub use store::{Cursor, ReadOnlyTx, Shard, Store};
pub use writer::ShardWriter;

use influxdb_shard::{DiscoveryError, FieldSetError};

use std::path::PathBuf;

/// Identifies a TSM file.
pub const MAGIC_NUMBER: u32 = 0x16D1_16D1;

pub const VERSION: u8 = 1;

/// Maximum number of values encoded into a single block.
pub const MAX_BLOCK_VALUES: usize = 1000;

/// Name of the file holding the field definitions of a shard.
pub const FIELDS_FILE: &str = "fields.idx";

pub const TSM_FILE_EXTENSION: &str = "tsm";

/// A single stored value: timestamp and encoded field data.
pub type Value = (i64, Vec<u8>);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error creating {}: {source}", path.display())]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error opening {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} is not a TSM file", path.display())]
    BadHeader { path: PathBuf },

    #[error("{} has an invalid index: {reason}", path.display())]
    BadIndex { path: PathBuf, reason: String },

    #[error("checksum mismatch for block at offset {offset} in {}", path.display())]
    ChecksumMismatch { path: PathBuf, offset: u64 },

    #[error("error decompressing block at offset {offset} in {}: {source}", path.display())]
    Decompress {
        path: PathBuf,
        offset: u64,
        source: snap::Error,
    },

    #[error("series key of {len} bytes is too long")]
    KeyTooLong { len: usize },

    #[error("field definitions: {0}")]
    Fields(#[from] FieldSetError),

    #[error("shard discovery: {0}")]
    Discovery(#[from] DiscoveryError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// File name of the TSM file with the given generation and sequence.
pub fn tsm_file_name(generation: u32, sequence: u32) -> String {
    format!("{generation:09}-{sequence:09}.{TSM_FILE_EXTENSION}")
}

/// Parse a TSM file name into `(generation, sequence)`.
pub fn parse_tsm_file_name(name: &str) -> Option<(u32, u32)> {
    let stem = name.strip_suffix(TSM_FILE_EXTENSION)?.strip_suffix('.')?;
    let (generation, sequence) = stem.split_once('-')?;
    Some((generation.parse().ok()?, sequence.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        assert_eq!(tsm_file_name(1, 2), "000000001-000000002.tsm");
        assert_eq!(parse_tsm_file_name("000000001-000000002.tsm"), Some((1, 2)));
        assert_eq!(parse_tsm_file_name("000000001-000000002.tsm.tmp"), None);
        assert_eq!(parse_tsm_file_name("fields.idx"), None);
        assert_eq!(parse_tsm_file_name("a-b.tsm"), None);
    }
}
