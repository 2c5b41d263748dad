//! CRC-8 integrity check shared with the worker firmware
//!
//! Polynomial 0x31 (x⁸+x⁵+x⁴+1), initial register 0x00, MSB-first, no
//! reflection and no final XOR. The checksum of a frame covers `LEN` and the
//! body, never the sync pair.

use crc::{Algorithm, Crc, Digest};

/// CRC-8 parameters used on the link.
pub const CRC_8_LINK: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0x31,
    init: 0x00,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0xa2,
    residue: 0x00,
};

static LINK_CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_LINK);

/// Compute the link checksum over `data`.
#[must_use]
pub fn crc8(data: &[u8]) -> u8 {
    LINK_CRC.checksum(data)
}

/// Incremental checksum for data that arrives in pieces.
pub struct Crc8Digest {
    inner: Digest<'static, u8>,
}

impl Crc8Digest {
    /// Start a new digest.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: LINK_CRC.digest(),
        }
    }

    /// Feed more bytes.
    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    /// Finish and return the checksum.
    #[must_use]
    pub fn finalize(self) -> u8 {
        self.inner.finalize()
    }
}

impl Default for Crc8Digest {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Crc8Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc8Digest").finish_non_exhaustive()
    }
}
