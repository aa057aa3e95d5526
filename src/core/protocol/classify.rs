//! Line classification
//!
//! The device interleaves control markers and CSV payload on a single stream
//! with no framing byte, so every decoded line is tagged by an ordered rule
//! list. Rule order matters: markers win over the header check, and the header
//! check runs before the leading-digit data check.

use super::{CONTROL_PREFIX, HEADER_FIELD, SAMPLES_KEY, SESSION_START_TOKEN, SESSION_STOP_TOKEN};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of an inbound line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineKind {
    /// Any other `DATA_LOGGER:` control line (READY, ERROR, status replies)
    StatusResponse,
    /// Device acknowledged a `START`
    SessionStart,
    /// Device stopped the session
    SessionStop,
    /// CSV header announcing the column layout
    HeaderLine,
    /// CSV sample row
    DataLine,
    /// Anything else (boot noise, debug prints, blank lines)
    Unrecognized,
}

impl LineKind {
    /// Whether this line is protocol signalling rather than payload
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::StatusResponse | Self::SessionStart | Self::SessionStop
        )
    }
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusResponse => write!(f, "status"),
            Self::SessionStart => write!(f, "session-start"),
            Self::SessionStop => write!(f, "session-stop"),
            Self::HeaderLine => write!(f, "header"),
            Self::DataLine => write!(f, "data"),
            Self::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

/// A line tagged with its category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedLine {
    /// Category
    pub kind: LineKind,
    /// Line text with surrounding whitespace removed
    pub text: String,
}

impl ClassifiedLine {
    /// Sample count reported in a stop marker (`DATA_LOGGER:STOP:Samples=42`)
    pub fn reported_samples(&self) -> Option<u64> {
        if self.kind != LineKind::SessionStop {
            return None;
        }
        let start = self.text.find(SAMPLES_KEY)? + SAMPLES_KEY.len();
        let digits: String = self.text[start..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    }
}

impl fmt::Display for ClassifiedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.text)
    }
}

/// Classify a raw line. Total: unmatched input is `Unrecognized`.
pub fn classify(raw: &str) -> ClassifiedLine {
    let text = raw.trim();
    ClassifiedLine {
        kind: kind_of(text),
        text: text.to_string(),
    }
}

// Markers count only at the start of a line; a row with a leading digit is data
// whatever follows it.
fn kind_of(text: &str) -> LineKind {
    if text.starts_with(SESSION_START_TOKEN) {
        LineKind::SessionStart
    } else if text.starts_with(SESSION_STOP_TOKEN) {
        LineKind::SessionStop
    } else if text.starts_with(CONTROL_PREFIX) {
        LineKind::StatusResponse
    } else if text.starts_with(HEADER_FIELD) {
        LineKind::HeaderLine
    } else if text.as_bytes().first().is_some_and(u8::is_ascii_digit) {
        LineKind::DataLine
    } else {
        LineKind::Unrecognized
    }
}
