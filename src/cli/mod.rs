//! CLI Module
//!
//! Provides the operator-facing pieces of the binary:
//! - Exit codes for automation
//! - Non-blocking stdin line reader
//! - Interactive shell and headless capture driver

pub mod capture;
pub mod exit_codes;
pub mod shell;
pub mod stdin;

pub use capture::{drive_capture, run_capture, write_summary, CaptureControl, DriveResult};
pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use shell::{OperatorCommand, Shell};
pub use stdin::{InputPoll, StdinLineReader};

use crate::core::session::SessionError;
use thiserror::Error;

/// Output format for non-interactive commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human readable text
    #[default]
    Text,
    /// JSON
    Json,
}

/// Failures that end a CLI command
#[derive(Error, Debug)]
pub enum ShellError {
    /// Engine error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Terminal output failed
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output failed
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}
