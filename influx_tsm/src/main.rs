//! Entrypoint of the influx_tsm binary
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use dotenvy::dotenv;

mod commands {
    pub(crate) mod convert;
    pub(crate) mod inspect;
}
mod logging;

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "influx_tsm",
    version,
    about = "Converts legacy b1 and bz1 shards to tsm1 and inspects tsm1 shards",
    long_about = r#"Converts legacy b1 and bz1 shards to tsm1 and inspects tsm1 shards

Examples:
    # Convert every database under /var/lib/influxdb/data
    influx_tsm convert /var/lib/influxdb/data

    # Convert two databases without asking for confirmation, in parallel
    influx_tsm convert --dbs telegraf,metrics --parallel -y /var/lib/influxdb/data

    # Dump all points as line protocol to a compressed file
    influx_tsm inspect -p /var/lib/influxdb/data --mode dump -o dump.lp.gz

    # Run with debug logging
    LOG_FILTER=debug influx_tsm inspect -p /var/lib/influxdb/data --mode summary
"#
)]
struct Config {
    #[clap(flatten)]
    logging_config: logging::LoggingConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Convert legacy b1 and bz1 shards to tsm1, in place
    Convert(commands::convert::Config),

    /// Summarize and dump the points of tsm1 shards
    Inspect(commands::inspect::Config),
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    if let Err(e) = config.logging_config.install_global_subscriber() {
        eprintln!("Initializing logs failed: {e}");
        std::process::exit(ReturnCode::Failure as _);
    }

    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    tokio_runtime.block_on(async move {
        match config.command {
            None => println!("command required, -h/--help for help"),
            Some(Command::Convert(config)) => {
                if let Err(e) = commands::convert::command(config).await {
                    eprintln!("Convert command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::Inspect(config)) => {
                if let Err(e) = commands::inspect::command(config).await {
                    eprintln!("Inspect command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // a missing env file is not an error
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}
