//! Offline tools for the shards of an InfluxDB data directory.
//!
//! * [`migrate`] converts `b1` and `bz1` shards to `tsm1`, backing up every
//!   affected database first and swapping each converted shard into place.
//! * [`inspect`] summarises the `tsm1` shards of a data directory and dumps
//!   their points as line protocol.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod backup;
pub mod inspect;
pub mod migrate;
pub mod table;
