//! Wire format for the controller/worker serial protocol
//!
//! This module provides the frame layout, ack codes, CRC-8 and codec.

pub mod checksum;
mod codec;
mod error;
mod frame;
mod types;

pub use checksum::{Crc8Digest, crc8};
pub use codec::{
    FrameScanner, NoFrameReason, ReadOutcome, decode, discard_pending, encode, encode_into,
    read_frame,
};
pub use error::{Error, Result};
pub use frame::Frame;
pub use types::AckCode;

use std::time::Duration;

/// First synchronization byte of every frame
pub const SYNC1: u8 = 0xAC;

/// Second synchronization byte of every frame
pub const SYNC2: u8 = 0x53;

/// Receiver address used when the caller does not supply one
pub const DEFAULT_ADDRESS: u8 = 0x01;

/// Maximum payload carried by a single frame
pub const MAX_PAYLOAD_SIZE: usize = 250;

/// Fixed body fields preceding the payload (SQN, ADDR, ACK)
pub const BODY_HEADER_SIZE: usize = 3;

/// Smallest `LEN` value that still holds the fixed body fields
pub const MIN_LENGTH: u8 = BODY_HEADER_SIZE as u8;

/// Largest `LEN` value (fixed body fields plus a full payload)
pub const MAX_LENGTH: u8 = (BODY_HEADER_SIZE + MAX_PAYLOAD_SIZE) as u8;

/// Bytes outside the body: sync pair, `LEN` and CRC
pub const FRAME_OVERHEAD: usize = 4;

/// Largest encoded frame on the wire
pub const MAX_FRAME_SIZE: usize = FRAME_OVERHEAD + MAX_LENGTH as usize;

/// Default deadline for locating and reading a response frame
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(50);
