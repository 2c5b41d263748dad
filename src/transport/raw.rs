//! Unframed diagnostic passthrough.
//!
//! Bytes are written verbatim: no framing, no checksum, no response.

use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::protocol::Result;

/// Time given to the UART to drain before the port is released.
pub const RAW_SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Caller input for [`send_raw`](super::send_raw).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawInput<'a> {
    /// Hex text such as `"AC 53 04 00 01 01 50 f2"`; whitespace is ignored.
    Hex(&'a str),
    /// Bytes to send as-is.
    Bytes(&'a [u8]),
}

impl RawInput<'_> {
    /// Resolve to the bytes that go on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Hex(text) => parse_hex(text),
            Self::Bytes(bytes) => Ok(bytes.to_vec()),
        }
    }
}

/// Decode a hex string, ignoring any whitespace between digits.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|ch| !ch.is_whitespace()).collect();
    Ok(hex::decode(compact)?)
}

/// Write `bytes` to `link`, flush, and let the line settle.
pub fn write_raw<W: Write + ?Sized>(link: &mut W, bytes: &[u8]) -> io::Result<()> {
    link.write_all(bytes)?;
    link.flush()?;
    debug!(len = bytes.len(), data = %hex::encode(bytes), "raw bytes written");
    thread::sleep(RAW_SETTLE_DELAY);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Error;

    #[test]
    fn test_parse_hex_ignores_whitespace() {
        let bytes = parse_hex(" AC 53\n03 00\t01 01 59 ").unwrap();
        assert_eq!(bytes, vec![0xAC, 0x53, 0x03, 0x00, 0x01, 0x01, 0x59]);
        assert_eq!(parse_hex("ac53").unwrap(), vec![0xAC, 0x53]);
        assert!(parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_hex_rejects_bad_input() {
        assert!(matches!(parse_hex("ABC"), Err(Error::InvalidHex(_))));
        assert!(matches!(parse_hex("zz"), Err(Error::InvalidHex(_))));
    }

    #[test]
    fn test_raw_input() {
        assert_eq!(RawInput::Hex("0a0B").to_bytes().unwrap(), vec![0x0A, 0x0B]);
        assert_eq!(RawInput::Bytes(b"G90").to_bytes().unwrap(), b"G90".to_vec());
    }

    #[test]
    fn test_write_raw_is_verbatim() {
        let mut sink = Vec::new();
        write_raw(&mut sink, &[0xAC, 0x53, 0xFF]).unwrap();
        assert_eq!(sink, vec![0xAC, 0x53, 0xFF]);
    }
}
