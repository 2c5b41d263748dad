//! Wire-format error types

use thiserror::Error;

/// Protocol errors raised while building or parsing frames
#[derive(Error, Debug)]
pub enum Error {
    /// Payload does not fit the one-byte length field
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Buffer too small
    #[error("buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall {
        /// Needed size
        needed: usize,
        /// Actual size
        got: usize,
    },

    /// Buffer does not start with the sync pair
    #[error("invalid sync bytes: {found:#06x}")]
    InvalidSync {
        /// First two bytes found, big-endian
        found: u16,
    },

    /// Declared length outside the representable body range
    #[error("invalid frame length: {length} (valid {min}..={max})")]
    InvalidLength {
        /// Declared `LEN` byte
        length: u8,
        /// Smallest valid value
        min: u8,
        /// Largest valid value
        max: u8,
    },

    /// Checksum mismatch
    #[error("checksum mismatch: expected {expected:#04x}, got {found:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes
        expected: u8,
        /// Checksum carried by the frame
        found: u8,
    },

    /// Chunk size cannot be represented by a single frame
    #[error("chunk size {size} out of range (valid 1..={max})")]
    ChunkSizeOutOfRange {
        /// Requested chunk size
        size: usize,
        /// Largest chunk a frame can carry
        max: usize,
    },

    /// Delivery needs at least one attempt per chunk
    #[error("retry count must be at least 1")]
    ZeroRetries,

    /// Command text contains a character outside the single-byte range
    #[error("non-ASCII character {ch:?} in line {line} at column {column}")]
    NonAscii {
        /// Offending character
        ch: char,
        /// Zero-based line index
        line: usize,
        /// Zero-based character index within the line
        column: usize,
    },

    /// Raw input is not a valid hex string
    #[error("invalid hex input: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
