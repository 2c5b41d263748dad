//! Frame codec (encode/decode)
//!
//! Encoding is a pure function of the frame fields. Decoding comes in two
//! flavours: [`decode`] parses a complete frame already held in memory, and
//! [`FrameScanner`] pulls bytes from a live link, resynchronizing on the sync
//! pair and giving up once its deadline passes.
//!
//! There is no byte stuffing: a `SYNC1 SYNC2` pair inside a payload is
//! indistinguishable from a frame start. The wire format is fixed by the
//! worker firmware.

use std::io::{self, ErrorKind, Read};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::checksum::{Crc8Digest, crc8};
use super::{
    BODY_HEADER_SIZE, DEFAULT_RESPONSE_TIMEOUT, Error, FRAME_OVERHEAD, Frame, MAX_LENGTH,
    MAX_PAYLOAD_SIZE, MIN_LENGTH, Result, SYNC1, SYNC2,
};

/// Encode a frame to bytes
///
/// # Format
///
/// ```text
/// [SYNC1] [SYNC2] [LEN] [SQN] [ADDR] [ACK] [DATA (0..250)] [CRC8]
/// ```
///
/// # Errors
///
/// Returns [`Error::PayloadTooLarge`] when `payload` exceeds 250 bytes. No
/// bytes are produced in that case.
pub fn encode(sequence: u8, payload: &[u8], address: u8, ack: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(FRAME_OVERHEAD + BODY_HEADER_SIZE + payload.len());
    encode_into(&mut bytes, sequence, payload, address, ack)?;
    Ok(bytes)
}

/// Append an encoded frame to `out`
///
/// `out` is left untouched on error.
pub fn encode_into(
    out: &mut Vec<u8>,
    sequence: u8,
    payload: &[u8],
    address: u8,
    ack: u8,
) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    // Fits in a byte: at most 3 + 250.
    let length = (BODY_HEADER_SIZE + payload.len()) as u8;
    let start = out.len();

    out.reserve(FRAME_OVERHEAD + length as usize);
    out.extend_from_slice(&[SYNC1, SYNC2, length, sequence, address, ack]);
    out.extend_from_slice(payload);

    // CRC covers LEN and body, not the sync pair.
    let checksum = crc8(&out[start + 2..]);
    out.push(checksum);

    Ok(())
}

/// Decode one frame from the start of `bytes`
///
/// Returns the frame and the number of bytes consumed.
///
/// # Errors
///
/// Returns an error if:
/// - Buffer is too small
/// - Sync pair is missing
/// - Declared length is out of range
/// - Checksum doesn't match
pub fn decode(bytes: &[u8]) -> Result<(Frame, usize)> {
    let minimum = FRAME_OVERHEAD + MIN_LENGTH as usize;
    if bytes.len() < minimum {
        return Err(Error::BufferTooSmall {
            needed: minimum,
            got: bytes.len(),
        });
    }

    if bytes[0] != SYNC1 || bytes[1] != SYNC2 {
        return Err(Error::InvalidSync {
            found: u16::from_be_bytes([bytes[0], bytes[1]]),
        });
    }

    let length = bytes[2];
    check_length(length)?;

    let total = FRAME_OVERHEAD + length as usize;
    if bytes.len() < total {
        return Err(Error::BufferTooSmall {
            needed: total,
            got: bytes.len(),
        });
    }

    let covered = &bytes[2..total - 1];
    let found = bytes[total - 1];
    let expected = crc8(covered);
    if expected != found {
        return Err(Error::ChecksumMismatch { expected, found });
    }

    Ok((frame_from_body(&covered[1..]), total))
}

fn check_length(length: u8) -> Result<()> {
    if (MIN_LENGTH..=MAX_LENGTH).contains(&length) {
        Ok(())
    } else {
        Err(Error::InvalidLength {
            length,
            min: MIN_LENGTH,
            max: MAX_LENGTH,
        })
    }
}

fn frame_from_body(body: &[u8]) -> Frame {
    Frame::from_parts(body[0], body[1], body[2], body[BODY_HEADER_SIZE..].to_vec())
}

/// Why a scan produced no usable frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoFrameReason {
    /// No sync pair before the deadline
    Timeout,
    /// Sync found but the link stopped delivering mid-frame
    Truncated,
    /// Sync found but `LEN` cannot describe a valid body
    InvalidLength(u8),
}

/// Result of scanning a link for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete frame whose checksum verified
    Frame(Frame),
    /// A structurally complete frame that failed verification
    BadChecksum {
        /// Checksum computed over the received bytes
        expected: u8,
        /// Checksum carried by the frame
        found: u8,
    },
    /// Nothing trustworthy arrived
    NoFrame(NoFrameReason),
}

impl ReadOutcome {
    /// The decoded frame, if one arrived intact
    #[must_use]
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            Self::Frame(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Resynchronizing reader that extracts frames from a byte stream
#[derive(Debug, Clone)]
pub struct FrameScanner {
    timeout: Duration,
    body: Vec<u8>,
}

impl FrameScanner {
    /// Create a scanner with the given overall deadline for finding sync
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            body: Vec::with_capacity(MAX_LENGTH as usize),
        }
    }

    /// Configured deadline
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Scan `reader` for the next frame
    ///
    /// Bytes preceding a `SYNC1 SYNC2` pair are discarded. A read that
    /// returns nothing, or fails with `TimedOut`/`WouldBlock`, counts as
    /// silence on the line.
    ///
    /// # Errors
    ///
    /// Any other I/O failure is a transport error and is returned as-is.
    pub fn scan<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<ReadOutcome> {
        let started = Instant::now();
        let mut skipped = 0usize;

        loop {
            if started.elapsed() >= self.timeout {
                debug!(skipped, timeout = ?self.timeout, "no sync before deadline");
                return Ok(ReadOutcome::NoFrame(NoFrameReason::Timeout));
            }
            let Some(byte) = read_byte(reader)? else {
                continue;
            };
            if byte != SYNC1 {
                skipped += 1;
                continue;
            }
            match read_byte(reader)? {
                Some(SYNC2) => break,
                Some(_) => skipped += 2,
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            trace!(skipped, "resynchronized on frame start");
        }

        let Some(length) = read_byte(reader)? else {
            return Ok(ReadOutcome::NoFrame(NoFrameReason::Truncated));
        };
        if check_length(length).is_err() {
            debug!(length, "frame length out of range");
            return Ok(ReadOutcome::NoFrame(NoFrameReason::InvalidLength(length)));
        }

        self.body.clear();
        self.body.resize(length as usize, 0);
        if !read_full(reader, &mut self.body)? {
            return Ok(ReadOutcome::NoFrame(NoFrameReason::Truncated));
        }
        let Some(found) = read_byte(reader)? else {
            return Ok(ReadOutcome::NoFrame(NoFrameReason::Truncated));
        };

        let mut digest = Crc8Digest::new();
        digest.update(&[length]);
        digest.update(&self.body);
        let expected = digest.finalize();
        if expected != found {
            debug!(expected, found, "response checksum mismatch");
            return Ok(ReadOutcome::BadChecksum { expected, found });
        }

        let frame = frame_from_body(&self.body);
        trace!(
            sequence = frame.sequence(),
            address = frame.address(),
            ack = frame.ack(),
            len = frame.payload().len(),
            "frame received"
        );
        Ok(ReadOutcome::Frame(frame))
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_TIMEOUT)
    }
}

/// Upper bound on bytes [`discard_pending`] will swallow in one call
const DISCARD_LIMIT: usize = 4 * MAX_LENGTH as usize;

/// Drop whatever input is already waiting on `reader`
///
/// Reads until the link goes quiet, so a reply that missed an earlier
/// deadline is not mistaken for the answer to the next request. Returns the
/// number of bytes discarded.
///
/// # Errors
///
/// Any I/O failure other than silence is returned as-is.
pub fn discard_pending<R: Read + ?Sized>(reader: &mut R) -> io::Result<usize> {
    let mut scratch = [0u8; 64];
    let mut discarded = 0;
    while discarded < DISCARD_LIMIT {
        match reader.read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => discarded += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) if is_silence(&err) => break,
            Err(err) => return Err(err),
        }
    }
    if discarded > 0 {
        debug!(discarded, "stale input discarded");
    }
    Ok(discarded)
}

/// Scan `reader` for one frame within `timeout`
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, timeout: Duration) -> io::Result<ReadOutcome> {
    FrameScanner::new(timeout).scan(reader)
}

fn is_silence(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

fn read_byte<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) if is_silence(&err) => return Ok(None),
            Err(err) => return Err(err),
        }
    }
}

/// Fill `buf` completely; `false` if the link went quiet first.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) if is_silence(&err) => return Ok(false),
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}
