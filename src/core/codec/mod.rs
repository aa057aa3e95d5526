//! Inbound stream framing
//!
//! The device stream is newline delimited text. Bytes are accumulated until a
//! full line is available and decoded permissively: malformed UTF-8 is
//! replaced, never fatal.

mod line;

pub use line::{LineCodec, DEFAULT_MAX_LINE_LENGTH};

/// Decode a byte slice as text, replacing invalid sequences
pub fn decode_lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_lossy() {
        assert_eq!(decode_lossy(b"abc"), "abc");
        assert_eq!(decode_lossy(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }
}
