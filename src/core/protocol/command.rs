//! Outbound device commands

use super::{COMMAND_TERMINATOR, CSV_SEPARATOR, FIELD_SEPARATOR};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Label validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    /// Label is empty (or only whitespace)
    #[error("label must not be empty")]
    Empty,

    /// Label contains a character reserved by the device protocol
    #[error("label {label:?} contains reserved character {ch:?}")]
    ReservedCharacter {
        /// Offending label
        label: String,
        /// Reserved character found
        ch: char,
    },
}

/// Check that a label can be carried in a `START` command.
///
/// Newlines would terminate the command early, `:` is the command field
/// separator and `,` would shift the label column in the device's CSV rows.
pub fn validate_label(label: &str) -> Result<(), LabelError> {
    if label.trim().is_empty() {
        return Err(LabelError::Empty);
    }

    let reserved = ['\n', '\r', FIELD_SEPARATOR, CSV_SEPARATOR];
    if let Some(ch) = label.chars().find(|c| reserved.contains(c)) {
        return Err(LabelError::ReservedCharacter {
            label: label.to_string(),
            ch,
        });
    }

    Ok(())
}

/// Command sent to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the device to report its state
    Status,
    /// Start a labelled capture session
    Start(String),
    /// Stop the current capture session
    Stop,
}

impl Command {
    /// Build a `START` command, validating the label first
    pub fn start(label: &str) -> Result<Self, LabelError> {
        validate_label(label)?;
        Ok(Self::Start(label.to_string()))
    }

    /// Wire encoding, including the trailing newline
    pub fn encode(&self) -> Bytes {
        let text = self.to_string();
        let mut buf = BytesMut::with_capacity(text.len() + 1);
        buf.put_slice(text.as_bytes());
        buf.put_u8(COMMAND_TERMINATOR);
        buf.freeze()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => write!(f, "STATUS"),
            Self::Start(label) => write!(f, "START{FIELD_SEPARATOR}{label}"),
            Self::Stop => write!(f, "STOP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_encoding() {
        assert_eq!(&Command::Status.encode()[..], b"STATUS\n");
        assert_eq!(&Command::Stop.encode()[..], b"STOP\n");
        assert_eq!(
            &Command::start("normal").unwrap().encode()[..],
            b"START:normal\n"
        );
    }

    #[test]
    fn test_label_validation() {
        assert!(validate_label("fall_forward").is_ok());
        assert!(validate_label("walk 2").is_ok());
        assert_eq!(validate_label(""), Err(LabelError::Empty));
        assert_eq!(validate_label("   "), Err(LabelError::Empty));

        for bad in ["a\nb", "a\rb", "a:b", "a,b"] {
            assert!(
                matches!(validate_label(bad), Err(LabelError::ReservedCharacter { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_start_rejects_reserved() {
        assert!(Command::start("x:y").is_err());
    }
}
