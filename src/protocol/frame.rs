//! Frame value type

use bytes::Bytes;

use super::{AckCode, BODY_HEADER_SIZE, DEFAULT_ADDRESS, FRAME_OVERHEAD, Result};

/// One protocol message, in either direction
///
/// # Wire Format
///
/// ```text
/// +-------+-------+-----+-----+------+-----+--------------+------+
/// | SYNC1 | SYNC2 | LEN | SQN | ADDR | ACK | DATA (0..250)| CRC8 |
/// | 0xAC  | 0x53  |     |     |      |     |              |      |
/// +-------+-------+-----+-----+------+-----+--------------+------+
///                 |<--------------- CRC8 covers ------------>|
/// ```
///
/// `LEN = 3 + len(DATA)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    sequence: u8,
    address: u8,
    ack: u8,
    payload: Bytes,
}

impl Frame {
    /// Create a frame for the default receiver with an OK ack field
    pub fn new(sequence: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            address: DEFAULT_ADDRESS,
            ack: AckCode::Ok.as_u8(),
            payload: payload.into(),
        }
    }

    /// Create a frame from raw field values
    pub fn from_parts(sequence: u8, address: u8, ack: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            address,
            ack,
            payload: payload.into(),
        }
    }

    /// Replace the receiver address
    #[must_use]
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Replace the ack byte
    #[must_use]
    pub fn with_ack(mut self, ack: u8) -> Self {
        self.ack = ack;
        self
    }

    /// Sequence number
    #[must_use]
    pub const fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Receiver address
    #[must_use]
    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Raw ack byte
    #[must_use]
    pub const fn ack(&self) -> u8 {
        self.ack
    }

    /// Ack byte interpreted as a known code
    #[must_use]
    pub fn ack_code(&self) -> Option<AckCode> {
        AckCode::from_u8(self.ack)
    }

    /// Payload bytes
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Value of the `LEN` field for this frame
    #[must_use]
    pub fn body_len(&self) -> usize {
        BODY_HEADER_SIZE + self.payload.len()
    }

    /// Size of the frame on the wire
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.body_len()
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        super::encode(self.sequence, &self.payload, self.address, self.ack)
    }

    /// Decode one frame from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        super::decode(bytes).map(|(frame, _)| frame)
    }
}
