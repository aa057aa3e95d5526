//! Serial port transport implementation

use super::{LineTransport, TransportError, TransportStats, TransportType};
use crate::core::codec::LineCodec;
use async_trait::async_trait;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

/// Idle delay between polls of an empty port
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(format!("unknown parity: {other}")),
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
}

impl SerialConfig {
    /// Create a new serial configuration with 8N1 framing
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("", 115_200)
    }
}

/// Serial port transport
pub struct SerialTransport {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    buffer: BytesMut,
    codec: LineCodec,
    stats: TransportStats,
    connected_at: Option<Instant>,
}

impl SerialTransport {
    /// Create a new serial transport (the port is opened by [`LineTransport::open`])
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: None,
            buffer: BytesMut::with_capacity(4096),
            codec: LineCodec::new(),
            stats: TransportStats::default(),
            connected_at: None,
        }
    }

    /// Port configuration
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Move whatever the OS has buffered into our line buffer
    fn fill(&mut self) -> Result<usize, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        let available = port.bytes_to_read().map_err(io_error)? as usize;
        if available == 0 {
            return Ok(0);
        }

        let mut chunk = vec![0u8; available.min(4096)];
        match port.read(&mut chunk) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                self.stats.bytes_received += n as u64;
                Ok(n)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(TransportError::IoError(e)),
        }
    }
}

fn io_error(e: serialport::Error) -> TransportError {
    TransportError::IoError(std::io::Error::other(e))
}

#[async_trait]
impl LineTransport for SerialTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let data_bits = match self.config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match self.config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match self.config.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => {
                    TransportError::PortNotFound(self.config.port.clone())
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                    TransportError::PortNotFound(self.config.port.clone())
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(self.config.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        self.port = Some(port);
        self.buffer.clear();
        self.codec.reset();
        self.connected_at = Some(Instant::now());
        self.stats = TransportStats::default();

        debug!(port = %self.config.port, baud = self.config.baud_rate, "serial port opened");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            debug!(port = %self.config.port, "serial port closed");
        }
        self.connected_at = None;
        self.buffer.clear();
        self.codec.reset();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn clear_input(&mut self) -> Result<(), TransportError> {
        self.port_mut()?
            .clear(ClearBuffer::Input)
            .map_err(io_error)?;
        self.buffer.clear();
        self.codec.reset();
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port_mut()?;
        port.write_all(data)?;
        port.flush()?;

        self.stats.bytes_sent += data.len() as u64;
        self.stats.commands_sent += 1;
        trace!(bytes = data.len(), "serial write");
        Ok(())
    }

    fn pending(&mut self) -> Result<usize, TransportError> {
        let os_pending = self.port_mut()?.bytes_to_read().map_err(io_error)? as usize;
        Ok(self.buffer.len() + os_pending)
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(line) = self.codec.decode(&mut self.buffer)? {
                self.stats.lines_received += 1;
                return Ok(Some(line));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            if self.fill()? == 0 {
                tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
            }
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    fn connection_info(&self) -> String {
        format!(
            "{} @ {} baud ({}{}{})",
            self.config.port,
            self.config.baud_rate,
            self.config.data_bits,
            match self.config.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.config.stop_bits,
        )
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_parse() {
        assert_eq!("N".parse::<SerialParity>(), Ok(SerialParity::None));
        assert_eq!("even".parse::<SerialParity>(), Ok(SerialParity::Even));
        assert!("mark".parse::<SerialParity>().is_err());
    }

    #[test]
    fn test_connection_info() {
        let transport = SerialTransport::new(SerialConfig::new("/dev/ttyUSB0", 115_200));
        assert_eq!(transport.connection_info(), "/dev/ttyUSB0 @ 115200 baud (8N1)");
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_operations_require_open_port() {
        let mut transport = SerialTransport::new(SerialConfig::default());
        assert!(matches!(
            transport.write(b"STATUS\n").await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(transport.pending(), Err(TransportError::NotConnected)));
        assert!(transport.close().await.is_ok());
    }
}
