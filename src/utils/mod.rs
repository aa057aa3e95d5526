//! Utility functions and helpers

pub mod logging;
pub mod ports;

pub use logging::{init_tracing, LogGuard, LoggingError, Verbosity};
pub use ports::{available_ports, select_port, PortEntry};
