//! Logging flags shared by every command, and installation of the global
//! `tracing` subscriber they describe.
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use std::fmt::Display;
use std::str::FromStr;

/// Filter used when neither `--log-filter` nor `-v` is given.
pub(crate) const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("failed to install global subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// CLI config for the logging related subset of options.
#[derive(Debug, Clone, clap::Parser)]
pub(crate) struct LoggingConfig {
    /// Logs: filter directive
    ///
    /// Configures log severity level filter, by target.
    ///
    /// Simplest options: error, warn, info, debug, trace
    ///
    /// Levels for different modules can be specified. For example
    /// `debug,influxdb_legacy=info` specifies debug logging for all modules
    /// except for the `influxdb_legacy` crate which will only display info
    /// level logging.
    ///
    /// Overridden by `-v`.
    #[clap(long = "log-filter", env = "LOG_FILTER", global = true)]
    pub(crate) log_filter: Option<String>,

    /// Logs: filter short-hand
    ///
    /// Convenient way to set log severity level filter.
    /// Overrides `--log-filter`.
    ///
    /// -v   'info'
    ///
    /// -vv  'debug'
    ///
    /// -vvv 'trace'
    #[clap(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        global = true
    )]
    pub(crate) log_verbose_count: u8,

    /// Logs: destination
    ///
    /// Can be one of: stdout, stderr
    #[clap(
        long = "log-destination",
        env = "LOG_DESTINATION",
        default_value = "stderr",
        global = true
    )]
    pub(crate) log_destination: LogDestination,

    /// Logs: message format
    ///
    /// Can be one of: full, pretty, json
    #[clap(
        long = "log-format",
        env = "LOG_FORMAT",
        default_value = "full",
        global = true
    )]
    pub(crate) log_format: LogFormat,
}

impl LoggingConfig {
    /// The filter directive in effect; `-v` wins over `--log-filter`.
    pub(crate) fn filter_directive(&self) -> &str {
        match self.log_verbose_count {
            0 => self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER),
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    pub(crate) fn env_filter(&self) -> Result<EnvFilter, Error> {
        let filter = self.filter_directive();
        EnvFilter::try_new(filter).map_err(|source| Error::InvalidFilter {
            filter: filter.to_string(),
            source,
        })
    }

    /// Install a global subscriber configured by `self`.
    pub(crate) fn install_global_subscriber(&self) -> Result<(), Error> {
        let filter = self.env_filter()?;
        let writer = match self.log_destination {
            LogDestination::Stdout => fmt::writer::BoxMakeWriter::new(std::io::stdout),
            LogDestination::Stderr => fmt::writer::BoxMakeWriter::new(std::io::stderr),
        };

        let layer = fmt::layer().with_writer(writer);
        let registry = tracing_subscriber::registry().with(filter);
        match self.log_format {
            LogFormat::Full => registry.with(layer).try_init()?,
            LogFormat::Pretty => registry.with(layer.pretty()).try_init()?,
            LogFormat::Json => registry.with(layer.json()).try_init()?,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogFormat {
    Full,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Invalid log format '{s}'. Valid options: full, pretty, json"
            )),
        }
    }
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogDestination {
    Stdout,
    Stderr,
}

impl FromStr for LogDestination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            _ => Err(format!(
                "Invalid log destination '{s}'. Valid options: stdout, stderr"
            )),
        }
    }
}

impl Display for LogDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> LoggingConfig {
        LoggingConfig::try_parse_from(std::iter::once("influx_tsm").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn verbose_overrides_filter() {
        assert_eq!(parse(&[]).log_destination, LogDestination::Stderr);
        assert_eq!(parse(&["--log-filter", "warn"]).filter_directive(), "warn");
        assert_eq!(
            parse(&["--log-filter", "warn", "-vv"]).filter_directive(),
            "debug"
        );
        assert_eq!(parse(&["-vvvv"]).filter_directive(), "trace");
    }

    #[test]
    fn parse_format_and_destination() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(
            "stdout".parse::<LogDestination>().unwrap(),
            LogDestination::Stdout
        );
        let err = "syslog".parse::<LogDestination>().unwrap_err();
        assert_eq!(
            err,
            "Invalid log destination 'syslog'. Valid options: stdout, stderr"
        );
    }

    #[test]
    fn invalid_filter_is_an_error() {
        let config = parse(&["--log-filter", "info,influx_tsm=loud"]);
        assert!(matches!(
            config.env_filter(),
            Err(Error::InvalidFilter { .. })
        ));
    }
}
