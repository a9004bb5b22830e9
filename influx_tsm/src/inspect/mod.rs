//! Summaries and line protocol dumps of the `tsm1` shards in a data
//! directory.
//!
//! The output starts with a header of store wide counters, followed by a
//! summary table with one row per measurement and then a dump of every point
//! as line protocol. All three are ordered by database, measurement and
//! series key, and points by shard id, so the same data directory always
//! produces the same output.
use influxdb_tsm1::Store;
use tracing::info;

use std::fmt::Display;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;

mod dump;
mod output;
mod summary;

pub use dump::{DUMP_BUFFER_SIZE, DumpStats, write_dump};
pub use output::Output;
pub use summary::{write_header, write_summary};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open store: {0}")]
    Store(#[from] influxdb_tsm1::Error),

    #[error("failed to open output {}: {source}", path.display())]
    Output { path: PathBuf, source: io::Error },

    #[error("failed to write output: {0}")]
    Write(#[source] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Which parts of the report to write. The header is always written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    Summary,
    Dump,
    #[default]
    All,
}

impl Mode {
    fn summary(&self) -> bool {
        matches!(self, Self::Summary | Self::All)
    }

    fn dump(&self) -> bool {
        matches!(self, Self::Dump | Self::All)
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(Self::Summary),
            "dump" => Ok(Self::Dump),
            "all" => Ok(Self::All),
            _ => Err(format!(
                "Invalid mode '{s}'. Valid options: summary, dump, all"
            )),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Summary => write!(f, "summary"),
            Self::Dump => write!(f, "dump"),
            Self::All => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectConfig {
    /// Root of the data directory holding the shards.
    pub data_dir: PathBuf,

    /// File to write to instead of stdout; gzip compressed if it ends in
    /// `.gz`.
    pub output: Option<PathBuf>,

    pub mode: Mode,
}

impl InspectConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            output: None,
            mode: Mode::default(),
        }
    }
}

/// Open the store under `config.data_dir` and write the report to the
/// configured output.
pub fn run(config: &InspectConfig) -> Result<DumpStats> {
    let store = Store::open(&config.data_dir)?;
    let mut out = Output::open(config.output.as_deref())?;

    let stats = report(&store, config.mode, &mut out).map_err(Error::Write)?;
    out.finish().map_err(Error::Write)?;

    info!(
        data_dir = %config.data_dir.display(),
        points = stats.points,
        "inspection complete"
    );
    Ok(stats)
}

/// Write the report for `store` to `w`.
pub fn report(store: &Store, mode: Mode, w: &mut impl Write) -> io::Result<DumpStats> {
    write_header(store, w)?;
    if mode.summary() {
        write_summary(store, w)?;
    }
    if mode.dump() {
        write_dump(store, w)
    } else {
        w.flush()?;
        Ok(DumpStats::default())
    }
}
