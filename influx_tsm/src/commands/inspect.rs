//! The `inspect` command: summarize and dump the `tsm1` shards of a data
//! directory.
use influx_tsm::inspect::{self, InspectConfig, Mode};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Inspect(#[from] inspect::Error),

    #[error("inspection task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

/// Summarize the measurements of every tsm1 shard and dump their points as
/// line protocol.
#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    /// Path to the data directory
    #[clap(short = 'p', long = "data-dir", env = "INFLUX_TSM_DATA_DIR")]
    data_dir: PathBuf,

    /// Write to this file instead of stdout; compressed with gzip if the name
    /// ends in `.gz`
    #[clap(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// What to report: summary, dump or all
    #[clap(long = "mode", default_value_t = Mode::All)]
    mode: Mode,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let config = InspectConfig {
        data_dir: config.data_dir,
        output: config.output,
        mode: config.mode,
    };
    tokio::task::spawn_blocking(move || inspect::run(&config)).await??;
    Ok(())
}
