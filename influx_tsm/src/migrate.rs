//! Conversion of legacy shards to `tsm1`.
//!
//! A [`Migration`] moves through a fixed sequence of states:
//!
//! ```text
//! Discovering -> Planned -> AwaitingConfirmation -> BackingUp -> Converting -> Done
//!                    \______________\________________\______________\______-> Aborted
//! ```
//!
//! Every database holding a shard to convert is backed up before the first
//! shard is touched. Each shard is then written to `<shard>.tsm`, and only
//! once that copy is complete is the original deleted and the new shard
//! renamed into its place. A failure stops the run; shards already converted
//! stay converted and nothing is rolled back.
use crate::backup;
use crate::table::TabTable;

use influxdb_legacy::ShardReader;
use influxdb_shard::{DiscoveryError, EngineFormat, ShardInfo, ShardInfos, discover};
use influxdb_tsm1::{MAX_BLOCK_VALUES, ShardWriter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest size of an individual TSM file, and the default.
pub const MAX_TSM_FILE_SIZE: u64 = 1024 * 1024 * 1024;

const TSM_EXT: &str = "tsm";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("maximum TSM file size is {max}, got {size}", max = MAX_TSM_FILE_SIZE)]
    FileSizeTooLarge { size: u64 },

    #[error("TSM file size must be greater than zero")]
    FileSizeZero,

    #[error("failed to discover shards: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("backup of database {database} failed: {source}")]
    Backup {
        database: String,
        source: backup::Error,
    },

    #[error("failed to convert {}: {source}", shard.display())]
    Conversion {
        shard: PathBuf,
        source: ConversionError,
    },

    #[error(transparent)]
    Swap(#[from] SwapError),

    #[error("conversion task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("cannot {operation} a migration that is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: State,
    },
}

/// Failures while writing the converted copy of a shard. The original shard
/// is untouched when one of these is reported.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("target {} already exists", path.display())]
    TargetExists { path: PathBuf },

    #[error("failed to open: {0}")]
    Open(#[source] influxdb_legacy::Error),

    #[error("failed to read series {key:?}: {source}")]
    Read {
        key: String,
        source: influxdb_legacy::Error,
    },

    #[error("failed to write: {0}")]
    Write(#[source] influxdb_tsm1::Error),

    #[error("failed to close: {0}")]
    Close(#[source] influxdb_legacy::Error),
}

/// Failures replacing the original shard with its converted copy.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("deletion of {} failed: {source}", path.display())]
    Delete {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("rename of {} to {} failed: {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Settings of one migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateConfig {
    /// Root of the data directory: `<data_path>/<database>/<rp>/<shard>`.
    pub data_path: PathBuf,

    /// Databases to convert; empty converts all of them.
    pub databases: Vec<String>,

    /// Size at which a TSM file is closed and the next one started.
    pub max_tsm_file_size: u64,

    /// Convert shards concurrently, up to one per CPU.
    pub parallel: bool,
}

impl MigrateConfig {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            databases: vec![],
            max_tsm_file_size: MAX_TSM_FILE_SIZE,
            parallel: false,
        }
    }

    pub fn with_databases<I, S>(mut self, databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.databases = databases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_tsm_file_size(mut self, max_tsm_file_size: u64) -> Self {
        self.max_tsm_file_size = max_tsm_file_size;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    fn validate(&self) -> Result<()> {
        match self.max_tsm_file_size {
            0 => Err(Error::FileSizeZero),
            size if size > MAX_TSM_FILE_SIZE => Err(Error::FileSizeTooLarge { size }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Discovering,
    Planned,
    AwaitingConfirmation,
    BackingUp,
    Converting,
    Done,
    Aborted,
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    /// No shard needed converting.
    NothingToDo,

    /// The operator declined; nothing was touched.
    Aborted,

    Completed {
        /// Backup directories, one per converted database.
        backups: Vec<PathBuf>,
        /// One report per shard, in plan order.
        shards: Vec<ShardReport>,
    },
}

/// The result of converting one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardReport {
    pub path: PathBuf,
    pub format: EngineFormat,
    pub series: usize,
    pub points: u64,
    pub elapsed: Duration,
}

impl ShardReport {
    /// Elapsed time for display, e.g. `1s 250ms`.
    pub fn elapsed_human(&self) -> String {
        // sub-millisecond precision only adds noise
        let elapsed = Duration::from_millis(self.elapsed.as_millis() as u64);
        humantime::format_duration(elapsed).to_string()
    }
}

/// A planned conversion of the legacy shards under one data directory.
#[derive(Debug)]
pub struct Migration {
    config: MigrateConfig,
    shards: ShardInfos,
    state: State,
}

impl Migration {
    /// Find every shard under the configured data directory that still needs
    /// converting.
    pub fn discover(config: MigrateConfig) -> Result<Self> {
        config.validate()?;
        debug!(data_path = %config.data_path.display(), state = ?State::Discovering, "discovering shards");

        let shards = discover(&config.data_path)?
            .filter_format(EngineFormat::Tsm1)
            .filter_databases(&config.databases);
        info!(shards = shards.len(), "planned conversion");

        Ok(Self {
            config,
            shards,
            state: State::Planned,
        })
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    /// The shards that will be converted, in conversion order.
    pub fn shards(&self) -> &ShardInfos {
        &self.shards
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Write the plan as a table and wait for the operator's decision.
    pub fn render_plan(&mut self, w: &mut impl Write) -> io::Result<()> {
        let mut table = TabTable::new(0, 1);
        table.push_row(["Database", "Retention", "Path", "Engine", "Size"]);
        for shard in self.shards.iter() {
            table.push_row([
                shard.database.clone(),
                shard.retention_policy.clone(),
                shard.full_path(&self.config.data_path).display().to_string(),
                shard.format.to_string(),
                shard.size.to_string(),
            ]);
        }
        table.write_to(w)?;
        self.state = State::AwaitingConfirmation;
        Ok(())
    }

    /// Run the plan if `proceed` is set, otherwise abort without touching
    /// anything.
    pub async fn run(mut self, proceed: bool) -> Result<Outcome> {
        if !matches!(self.state, State::Planned | State::AwaitingConfirmation) {
            return Err(Error::InvalidState {
                operation: "run",
                state: self.state,
            });
        }
        if self.shards.is_empty() {
            self.state = State::Done;
            return Ok(Outcome::NothingToDo);
        }
        if !proceed {
            self.state = State::Aborted;
            info!("conversion aborted");
            return Ok(Outcome::Aborted);
        }

        self.state = State::BackingUp;
        let backups = match self.backup() {
            Ok(backups) => backups,
            Err(e) => {
                self.state = State::Aborted;
                return Err(e);
            }
        };

        self.state = State::Converting;
        let shards = self.shards.iter().cloned().collect();
        let converted = if self.config.parallel {
            convert_parallel(shards, &self.config).await
        } else {
            convert_serial(shards, &self.config).await
        };

        match converted {
            Ok(shards) => {
                self.state = State::Done;
                Ok(Outcome::Completed { backups, shards })
            }
            Err(e) => {
                self.state = State::Aborted;
                Err(e)
            }
        }
    }

    fn backup(&self) -> Result<Vec<PathBuf>> {
        self.shards
            .databases()
            .into_iter()
            .map(|database| {
                backup::backup_database(&self.config.data_path.join(&database))
                    .map_err(|source| Error::Backup { database, source })
            })
            .collect()
    }
}

async fn convert_serial(shards: Vec<ShardInfo>, config: &MigrateConfig) -> Result<Vec<ShardReport>> {
    let mut reports = Vec::with_capacity(shards.len());
    for shard in shards {
        let data_path = config.data_path.clone();
        let max_file_size = config.max_tsm_file_size;
        let report = tokio::task::spawn_blocking(move || {
            convert_shard(&shard, &data_path, max_file_size)
        })
        .await??;
        reports.push(report);
    }
    Ok(reports)
}

/// Convert shards concurrently, at most one per CPU at a time.
///
/// After the first failure no further conversions are started; those in
/// flight run to completion, then the failure of the earliest shard in plan
/// order is returned.
async fn convert_parallel(
    shards: Vec<ShardInfo>,
    config: &MigrateConfig,
) -> Result<Vec<ShardReport>> {
    let limit = Arc::new(Semaphore::new(num_cpus::get()));
    let mut tasks = JoinSet::new();
    let mut results: Vec<Option<Result<ShardReport>>> = shards.iter().map(|_| None).collect();
    let mut panicked = None;

    for (i, shard) in shards.into_iter().enumerate() {
        let permit = Arc::clone(&limit)
            .acquire_owned()
            .await
            .expect("semaphore is never closed");

        while let Some(joined) = tasks.try_join_next() {
            record(joined, &mut results, &mut panicked);
        }
        if panicked.is_some() || results.iter().any(|r| matches!(r, Some(Err(_)))) {
            warn!("not starting further conversions after a failure");
            break;
        }

        let data_path = config.data_path.clone();
        let max_file_size = config.max_tsm_file_size;
        tasks.spawn_blocking(move || {
            let _permit = permit;
            (i, convert_shard(&shard, &data_path, max_file_size))
        });
    }

    while let Some(joined) = tasks.join_next().await {
        record(joined, &mut results, &mut panicked);
    }

    // unstarted shards only follow a failure, which is returned first
    let mut reports = Vec::with_capacity(results.len());
    for result in results.into_iter().flatten() {
        reports.push(result?);
    }
    if let Some(e) = panicked {
        return Err(Error::Task(e));
    }
    Ok(reports)
}

type Joined = std::result::Result<(usize, Result<ShardReport>), tokio::task::JoinError>;

fn record(
    joined: Joined,
    results: &mut [Option<Result<ShardReport>>],
    panicked: &mut Option<tokio::task::JoinError>,
) {
    match joined {
        Ok((i, result)) => results[i] = Some(result),
        Err(e) => {
            panicked.get_or_insert(e);
        }
    }
}

/// The path a shard is converted to before it replaces the original.
pub fn target_path(shard_path: &Path) -> PathBuf {
    let mut path = OsString::from(shard_path.as_os_str());
    path.push(".");
    path.push(TSM_EXT);
    PathBuf::from(path)
}

/// Convert one legacy shard to `tsm1` in place.
pub fn convert_shard(
    shard: &ShardInfo,
    data_path: &Path,
    max_tsm_file_size: u64,
) -> Result<ShardReport> {
    let start = Instant::now();
    let src = shard.full_path(data_path);
    let dst = target_path(&src);

    let (series, points) =
        write_target(shard.format, &src, &dst, max_tsm_file_size).map_err(|source| {
            Error::Conversion {
                shard: src.clone(),
                source,
            }
        })?;

    swap(&src, &dst)?;

    let report = ShardReport {
        path: src,
        format: shard.format,
        series,
        points,
        elapsed: start.elapsed(),
    };
    info!(
        shard = %report.path.display(),
        series,
        points,
        elapsed = %report.elapsed_human(),
        "shard converted"
    );
    Ok(report)
}

/// Write the converted copy of `src` to `dst`, returning the number of series
/// and points copied. On failure a partially written target is left next to
/// the untouched source for inspection.
fn write_target(
    format: EngineFormat,
    src: &Path,
    dst: &Path,
    max_tsm_file_size: u64,
) -> Result<(usize, u64), ConversionError> {
    if dst.exists() {
        return Err(ConversionError::TargetExists {
            path: dst.to_path_buf(),
        });
    }

    let mut reader = influxdb_legacy::new_reader(format, src).map_err(ConversionError::Open)?;
    reader.open().map_err(ConversionError::Open)?;
    let writer = ShardWriter::create(dst, max_tsm_file_size).map_err(ConversionError::Write)?;

    let copied = copy_series(reader.as_mut(), writer);
    let closed = reader.close().map_err(ConversionError::Close);

    let result = copied.and_then(|counts| closed.map(|_| counts));
    if result.is_err() && dst.exists() {
        warn!(
            source = %src.display(),
            target = %dst.display(),
            "conversion failed, partial target kept; remove it before retrying"
        );
    }
    result
}

fn copy_series(
    reader: &mut (dyn ShardReader + Send),
    mut writer: ShardWriter,
) -> Result<(usize, u64), ConversionError> {
    writer
        .write_fields(reader.fields())
        .map_err(ConversionError::Write)?;

    let mut keys = reader.series_keys();
    keys.sort();

    let mut points = 0;
    let mut chunk = Vec::with_capacity(MAX_BLOCK_VALUES);
    for key in &keys {
        let read_err = |source| ConversionError::Read {
            key: key.clone(),
            source,
        };
        for value in reader.read_series(key).map_err(read_err)? {
            chunk.push(value.map_err(read_err)?);
            if chunk.len() == MAX_BLOCK_VALUES {
                writer
                    .write_values(key, &chunk)
                    .map_err(ConversionError::Write)?;
                points += chunk.len() as u64;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            writer
                .write_values(key, &chunk)
                .map_err(ConversionError::Write)?;
            points += chunk.len() as u64;
            chunk.clear();
        }
    }

    writer.close().map_err(ConversionError::Write)?;
    Ok((keys.len(), points))
}

/// Replace the original shard at `src` with its converted copy at `dst`.
fn swap(src: &Path, dst: &Path) -> Result<(), SwapError> {
    let removed = if src.is_dir() {
        fs::remove_dir_all(src)
    } else {
        fs::remove_file(src)
    };
    removed.map_err(|source| SwapError::Delete {
        path: src.to_path_buf(),
        source,
    })?;

    fs::rename(dst, src).map_err(|source| SwapError::Rename {
        from: dst.to_path_buf(),
        to: src.to_path_buf(),
        source,
    })
}
