//! Diagnostics setup
//!
//! Human readable (or JSON) events go to stderr so stdout stays clean for
//! command output. When a log directory is configured, events are also written
//! to a daily-rotated file.

use crate::config::LoggingConfig;
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Log file name prefix inside the log directory
pub const LOG_FILE_PREFIX: &str = "loggerlink.log";

/// Logging setup errors
#[derive(Error, Debug)]
pub enum LoggingError {
    /// Bad filter directive
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    /// Log directory can't be created
    #[error("failed to create log directory {path}: {source}")]
    Directory {
        /// Directory
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber is already installed
    #[error("failed to install subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Command line verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// `-q`: warnings and errors only
    Quiet,
    /// Configured level
    #[default]
    Normal,
    /// `-v`: debug output
    Verbose,
}

impl Verbosity {
    /// Build from the `-v`/`-q` flags (`-v` wins)
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Self::Verbose,
            (false, true) => Self::Quiet,
            _ => Self::Normal,
        }
    }

    /// Filter directive for this verbosity, given the configured level
    pub fn directive(self, configured: &str) -> String {
        match self {
            Self::Quiet => "warn".to_string(),
            Self::Verbose => "debug".to_string(),
            Self::Normal => configured.to_string(),
        }
    }
}

/// Keeps the file writer alive; drop it last so buffered events are flushed
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. `RUST_LOG` overrides the level from config and flags.
pub fn init_tracing(config: &LoggingConfig, verbosity: Verbosity) -> Result<LogGuard, LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(verbosity.directive(&config.level))?,
    };

    let stderr = if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    };

    let (file, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::Directory {
                path: dir.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init()?;

    Ok(LogGuard { _file: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Verbose);
    }

    #[test]
    fn test_directive() {
        assert_eq!(Verbosity::Normal.directive("loggerlink=trace"), "loggerlink=trace");
        assert_eq!(Verbosity::Quiet.directive("info"), "warn");
        assert_eq!(Verbosity::Verbose.directive("info"), "debug");
    }
}
