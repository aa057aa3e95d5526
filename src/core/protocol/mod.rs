//! Data-logger wire protocol
//!
//! Provides the pieces of the device protocol that the capture engine needs:
//! - Outbound commands (`STATUS`, `START:<label>`, `STOP`), newline terminated
//! - Reserved inbound markers and the CSV header field
//! - Line classification (control vs. data)

pub mod classify;
pub mod command;

pub use classify::{classify, ClassifiedLine, LineKind};
pub use command::{validate_label, Command, LabelError};

// ============ Inbound markers ============

/// Prefix shared by every control line the device emits
pub const CONTROL_PREFIX: &str = "DATA_LOGGER:";

/// Token announcing that the device started a session (`DATA_LOGGER:START:<label>`)
pub const SESSION_START_TOKEN: &str = "DATA_LOGGER:START";

/// Token announcing that the device stopped a session (`DATA_LOGGER:STOP:Samples=<n>`)
pub const SESSION_STOP_TOKEN: &str = "DATA_LOGGER:STOP";

/// Leading field name of the CSV header line
pub const HEADER_FIELD: &str = "timestamp_ms";

/// Key carrying the device-side sample count in the stop marker
pub const SAMPLES_KEY: &str = "Samples=";

// ============ Outbound ============

/// Command delimiter
pub const COMMAND_TERMINATOR: u8 = b'\n';

/// Separator between a command name and its argument
pub const FIELD_SEPARATOR: char = ':';

/// Column separator used by device data rows
pub const CSV_SEPARATOR: char = ',';
