//! The `convert` command: back up and convert every legacy shard of a data
//! directory to `tsm1`.
use influx_tsm::migrate::{self, MAX_TSM_FILE_SIZE, MigrateConfig, Migration, Outcome};
use tokio::io::{AsyncBufReadExt, BufReader};

use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Migration(#[from] migrate::Error),

    #[error("failed to read response: {0}")]
    Prompt(#[source] std::io::Error),

    #[error("failed to write to stdout: {0}")]
    Stdout(#[source] std::io::Error),

    #[error("conversion aborted")]
    Aborted,
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

/// Convert a database from b1 or bz1 format to tsm1 format.
///
/// This tool backs up the directories of the databases it converts to
/// `<database>.bak` before changing anything, and refuses to run if a backup
/// already exists. Each shard is written next to the original and only
/// replaces it once complete.
#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    /// Path to the data directory holding one directory per database
    #[clap(value_name = "DATA_PATH")]
    data_path: PathBuf,

    /// Comma-delimited list of databases to convert. Default is to convert
    /// all databases.
    #[clap(long = "dbs", value_delimiter = ',')]
    databases: Vec<String>,

    /// Maximum size of an individual TSM file, in bytes
    #[clap(long = "sz", default_value_t = MAX_TSM_FILE_SIZE)]
    max_tsm_file_size: u64,

    /// Convert shards concurrently, one per CPU
    #[clap(long)]
    parallel: bool,

    /// Do not ask for confirmation before converting
    #[clap(short = 'y', long = "yes")]
    yes: bool,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let migrate_config = MigrateConfig::new(config.data_path)
        .with_databases(config.databases)
        .with_max_tsm_file_size(config.max_tsm_file_size)
        .with_parallel(config.parallel);
    let mut migration = Migration::discover(migrate_config)?;

    if migration.is_empty() {
        println!("Nothing to do.");
        return Ok(());
    }

    let mut stdout = std::io::stdout();
    writeln!(stdout).map_err(Error::Stdout)?;
    migration.render_plan(&mut stdout).map_err(Error::Stdout)?;

    let proceed = config.yes || confirm(&mut stdout).await?;
    if !proceed {
        println!("Conversion aborted.");
        migration.run(false).await?;
        return Err(Error::Aborted);
    }

    println!("Conversion starting....");
    match migration.run(true).await? {
        Outcome::NothingToDo => println!("Nothing to do."),
        Outcome::Aborted => return Err(Error::Aborted),
        Outcome::Completed { backups, shards } => {
            for backup in backups {
                let database = backup.file_stem().unwrap_or_default().to_string_lossy();
                println!("Database {database} backed up.");
            }
            for shard in shards {
                println!(
                    "Conversion of {} successful ({})",
                    shard.path.display(),
                    shard.elapsed_human()
                );
            }
        }
    }
    Ok(())
}

/// Ask the operator to confirm the plan; only `y` proceeds.
async fn confirm(stdout: &mut impl Write) -> Result<bool> {
    write!(
        stdout,
        "\nThese shards will be converted. Proceed? y/N: "
    )
    .and_then(|_| stdout.flush())
    .map_err(Error::Stdout)?;

    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await
        .map_err(Error::Prompt)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}
