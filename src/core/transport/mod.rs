//! Transport layer for the device link
//!
//! Supports:
//! - Serial ports (USB-Serial adapters, on-board UARTs)
//! - Scripted in-memory links for tests and dry runs
//! - The simulated data logger (see [`crate::core::simulator`])

mod scripted;
mod serial;

pub use scripted::{ScriptedHandle, ScriptedTransport};
pub use serial::{list_ports, SerialConfig, SerialParity, SerialTransport};

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Serial port
    Serial,
    /// Scripted in-memory link
    Scripted,
    /// Simulated data logger
    Simulated,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Scripted => write!(f, "Scripted"),
            Self::Simulated => write!(f, "Simulated"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Operation requires an open channel
    #[error("Not connected")]
    NotConnected,

    /// Channel closed underneath us
    #[error("Disconnected")]
    Disconnected,
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Lines received
    pub lines_received: u64,
    /// Commands sent
    pub commands_sent: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Line-buffered, timeout-capable link to the device.
///
/// Reads never block longer than the timeout they are given, so a caller can
/// observe cancellation between calls.
#[async_trait]
pub trait LineTransport: Send {
    /// Open the channel
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Close the channel. Closing a closed channel is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if open
    fn is_open(&self) -> bool;

    /// Drop anything already buffered on the inbound side
    async fn clear_input(&mut self) -> Result<(), TransportError>;

    /// Write raw bytes (commands carry their own terminator)
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Number of inbound bytes waiting to be read
    fn pending(&mut self) -> Result<usize, TransportError>;

    /// Read one line, or `None` if no complete line arrives within `timeout`.
    ///
    /// The terminator is stripped and decoding is lossy.
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError>;

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

#[async_trait]
impl<T: LineTransport + ?Sized> LineTransport for Box<T> {
    async fn open(&mut self) -> Result<(), TransportError> {
        (**self).open().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    async fn clear_input(&mut self) -> Result<(), TransportError> {
        (**self).clear_input().await
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(data).await
    }

    fn pending(&mut self) -> Result<usize, TransportError> {
        (**self).pending()
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        (**self).read_line(timeout).await
    }

    fn transport_type(&self) -> TransportType {
        (**self).transport_type()
    }

    fn connection_info(&self) -> String {
        (**self).connection_info()
    }

    fn stats(&self) -> TransportStats {
        (**self).stats()
    }
}
