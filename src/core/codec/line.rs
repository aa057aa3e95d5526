//! Newline framing codec

use super::decode_lossy;
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Longest line kept before the codec starts discarding
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Splits a byte stream on `\n`, stripping a trailing `\r`.
///
/// Lines longer than the configured maximum are dropped up to the next
/// newline so a device that never terminates its output cannot grow the
/// buffer without bound.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Already scanned prefix of the buffer that holds no newline
    next_index: usize,
    discarding: bool,
    discarded: u64,
}

impl LineCodec {
    /// Create a codec with the default maximum line length
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a codec with a custom maximum line length
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
            discarded: 0,
        }
    }

    /// Number of over-long lines dropped so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Whether `buf` holds a complete line
    pub fn has_line(&self, buf: &BytesMut) -> bool {
        buf[self.next_index.min(buf.len())..].contains(&b'\n')
    }

    /// Forget any partial line state
    pub fn reset(&mut self) {
        self.next_index = 0;
        self.discarding = false;
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let scan_from = self.next_index.min(buf.len());
            let newline = buf[scan_from..].iter().position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(scan_from + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(buf.len());
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(offset)) => {
                    let end = scan_from + offset;
                    let line = buf.split_to(end + 1);
                    self.next_index = 0;
                    let mut content = &line[..end];
                    if let Some(stripped) = content.strip_suffix(b"\r") {
                        content = stripped;
                    }
                    return Ok(Some(decode_lossy(content)));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                    self.discarded += 1;
                }
                (false, None) => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() || self.discarding {
            buf.clear();
            self.reset();
            return Ok(None);
        }
        let rest = buf.split_to(buf.len());
        self.reset();
        Ok(Some(decode_lossy(&rest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"DATA_LOGGER:READY\r\n12,0.1\npart"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("DATA_LOGGER:READY"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("12,0.1"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(!codec.has_line(&buf));

        buf.extend_from_slice(b"ial\n");
        assert!(codec.has_line(&buf));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("partial"));
    }

    #[test]
    fn test_lossy_decoding() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&[b'1', 0xC3, 0x28, b'\n'][..]);
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert!(line.starts_with('1'));
        assert!(line.contains('\u{FFFD}'));
    }

    #[test]
    fn test_discards_overlong_line() {
        let mut codec = LineCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.discarded(), 1);

        buf.extend_from_slice(b"tail\nok\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("ok"));
    }

    #[test]
    fn test_decode_eof_flushes_partial() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"STOP"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("STOP"));
        assert!(buf.is_empty());
    }
}
