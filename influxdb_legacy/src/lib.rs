//! Readers for the legacy single-file shard formats `b1` and `bz1`.
//!
//! Both formats are exposed through the [`ShardReader`] trait so callers can
//! walk the series of a shard, and the values of each series in storage
//! order, without knowing which encoding backs it.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod b1;
pub mod bz1;
mod container;

use influxdb_shard::{EngineFormat, MeasurementFieldSet};

use std::path::{Path, PathBuf};

/// A single stored value: timestamp and encoded field data.
pub type Value = (i64, Vec<u8>);

/// Lazy, forward-only sequence of the values stored for one series.
pub type SeriesValues<'a> = Box<dyn Iterator<Item = Result<Value>> + 'a>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error opening shard {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} is not a {expected} shard", path.display())]
    BadMagic {
        path: PathBuf,
        expected: EngineFormat,
    },

    #[error("shard {} has malformed field metadata: {source}", path.display())]
    Meta {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("error reading shard {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error decompressing block in shard {}: {source}", path.display())]
    Decompress {
        path: PathBuf,
        source: snap::Error,
    },

    #[error("shard {} is not open", path.display())]
    NotOpen { path: PathBuf },

    #[error("series {key:?} does not exist in shard {}", path.display())]
    SeriesNotFound { path: PathBuf, key: String },

    #[error("error writing shard {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("series key of {len} bytes is too long for shard {}", path.display())]
    KeyTooLong { path: PathBuf, len: usize },

    #[error("unsupported shard format: {format}")]
    UnsupportedFormat { format: EngineFormat },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Ordered access to the series stored in one legacy shard.
///
/// Implemented once per legacy format. Values are surfaced exactly as
/// stored: nothing is merged, sorted or deduplicated, so out of order or
/// repeated timestamps present on disk are returned as they are.
pub trait ShardReader: std::fmt::Debug {
    /// Open the shard and index the series it holds.
    fn open(&mut self) -> Result<()>;

    /// Release the underlying file. Closing a closed reader is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Every series key in the shard, in storage order. Empty until opened.
    fn series_keys(&self) -> Vec<String>;

    /// The values stored for `key`, in storage order.
    fn read_series(&mut self, key: &str) -> Result<SeriesValues<'_>>;

    /// Field definitions of every measurement in the shard.
    fn fields(&self) -> &MeasurementFieldSet;

    fn path(&self) -> &Path;

    fn format(&self) -> EngineFormat;
}

/// Returns an unopened reader for the legacy shard at `path`.
pub fn new_reader(
    format: EngineFormat,
    path: impl Into<PathBuf>,
) -> Result<Box<dyn ShardReader + Send>> {
    match format {
        EngineFormat::B1 => Ok(Box::new(b1::Reader::new(path))),
        EngineFormat::Bz1 => Ok(Box::new(bz1::Reader::new(path))),
        EngineFormat::Tsm1 => Err(Error::UnsupportedFormat { format }),
    }
}
