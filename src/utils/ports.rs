//! Serial port enumeration and operator selection

use crate::core::transport::{list_ports, TransportError};
use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};

/// One enumerated port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortEntry {
    /// OS name (COM3, /dev/ttyUSB0)
    pub name: String,
    /// Port kind
    pub kind: String,
    /// USB details when known
    pub description: Option<String>,
}

impl From<SerialPortInfo> for PortEntry {
    fn from(info: SerialPortInfo) -> Self {
        let (kind, description) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let mut details = format!("{:04x}:{:04x}", usb.vid, usb.pid);
                for part in [usb.manufacturer, usb.product].into_iter().flatten() {
                    details.push(' ');
                    details.push_str(&part);
                }
                ("usb", Some(details))
            }
            SerialPortType::PciPort => ("pci", None),
            SerialPortType::BluetoothPort => ("bluetooth", None),
            SerialPortType::Unknown => ("unknown", None),
        };

        Self {
            name: info.port_name,
            kind: kind.to_string(),
            description,
        }
    }
}

/// Ports present on this machine
pub fn available_ports() -> Result<Vec<PortEntry>, TransportError> {
    Ok(list_ports()?.into_iter().map(PortEntry::from).collect())
}

/// Resolve operator input to a port name: a 1-based index into `ports`, or
/// anything else taken literally. Blank input selects nothing.
pub fn select_port(choice: &str, ports: &[PortEntry]) -> Option<String> {
    let choice = choice.trim();
    if choice.is_empty() {
        return None;
    }

    match choice.parse::<usize>() {
        Ok(index) if (1..=ports.len()).contains(&index) => Some(ports[index - 1].name.clone()),
        _ => Some(choice.to_string()),
    }
}
