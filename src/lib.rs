//! # Loggerlink Core Library
//!
//! Host-side session protocol for a serial sensor data logger. The device
//! streams CSV rows at a fixed rate once told to; this library decides when a
//! labelled capture is active and persists exactly the rows that belong to it.
//!
//! ## Features
//!
//! - Line-oriented command/response protocol (`STATUS`, `START:<label>`, `STOP`)
//! - Classifier-first handling of every inbound line
//! - Validated capture state machine with bounded waits
//! - CSV capture files per label, flushed line by line
//! - Serial, scripted and simulated transports
//! - CLI with an interactive shell and exit codes for automation
//!
//! ## Example
//!
//! ```rust,no_run
//! use loggerlink_core::core::logger::CsvFileSink;
//! use loggerlink_core::core::session::{CaptureEngine, EndOutcome, StepOutcome};
//! use loggerlink_core::core::transport::{SerialConfig, SerialTransport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = SerialTransport::new(SerialConfig::new("/dev/ttyUSB0", 115_200));
//!     let mut engine = CaptureEngine::new(transport, Box::new(CsvFileSink::new("collected_data")));
//!
//!     engine.connect().await?;
//!     engine.begin_capture("normal").await?;
//!
//!     loop {
//!         match engine.stream_step().await? {
//!             StepOutcome::Sample { count } if count >= 500 => break,
//!             StepOutcome::SessionEnded(_) => break,
//!             _ => {}
//!         }
//!     }
//!
//!     if let EndOutcome::Ended(summary) = engine.end_capture().await? {
//!         println!("{} samples", summary.samples);
//!     }
//!     engine.disconnect().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::AppConfig;
pub use crate::core::logger::{CaptureSink, CsvFileSink, MemorySink, SinkError, SinkWriter};
pub use crate::core::protocol::{classify, ClassifiedLine, Command, LineKind};
pub use crate::core::session::{
    CaptureEngine, CaptureSummary, CaptureTiming, EndOutcome, SessionError, StepOutcome, StopReason,
};
pub use crate::core::simulator::{SimulatedLogger, SimulatorConfig};
pub use crate::core::state_machine::CaptureState;
pub use crate::core::transport::{
    LineTransport, ScriptedTransport, SerialConfig, SerialTransport, TransportError, TransportType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
