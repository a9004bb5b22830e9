//! Read-only metadata about the shards of a data directory: where they are,
//! which engine format they use, and the schema of the data they hold.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod codec;
pub mod format;
pub mod index;
pub mod info;
pub mod series;

pub use codec::{
    CodecError, Field, FieldCodec, FieldSetError, FieldType, FieldValue, MeasurementFieldSet,
    MeasurementFields,
};
pub use format::EngineFormat;
pub use index::{DatabaseIndex, Measurement};
pub use info::{BACKUP_EXT, DiscoveryError, ShardInfo, ShardInfos, discover};
pub use series::{SeriesKey, SeriesKeyError};
