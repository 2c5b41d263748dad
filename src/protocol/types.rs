//! Acknowledgement codes returned by the worker

use std::fmt;

/// Status code carried in the ACK field of a response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AckCode {
    /// Frame accepted and decoded
    Ok = 0x01,
    /// Frame addressed to another receiver
    BadAddress = 0x02,
    /// Worker computed a different checksum
    BadChecksum = 0x03,
    /// Payload rejected by the worker
    BadParameter = 0x04,
}

impl AckCode {
    /// Convert from byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Ok),
            0x02 => Some(Self::BadAddress),
            0x03 => Some(Self::BadChecksum),
            0x04 => Some(Self::BadParameter),
            _ => None,
        }
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Resending the same frame cannot succeed
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::BadAddress | Self::BadParameter)
    }

    /// Resending the same frame may succeed
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::BadChecksum)
    }
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::BadAddress => "BAD_ADDR",
            Self::BadChecksum => "BAD_CRC",
            Self::BadParameter => "BAD_PARAM",
        };
        write!(f, "{name}")
    }
}

impl TryFrom<u8> for AckCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_code_roundtrip() {
        for code in [
            AckCode::Ok,
            AckCode::BadAddress,
            AckCode::BadChecksum,
            AckCode::BadParameter,
        ] {
            assert_eq!(AckCode::from_u8(code.as_u8()), Some(code));
        }
        assert_eq!(AckCode::from_u8(0x00), None);
        assert_eq!(AckCode::try_from(0x05), Err(0x05));
    }

    #[test]
    fn test_classification() {
        assert!(!AckCode::Ok.is_fatal());
        assert!(!AckCode::Ok.is_recoverable());
        assert!(AckCode::BadAddress.is_fatal());
        assert!(AckCode::BadParameter.is_fatal());
        assert!(AckCode::BadChecksum.is_recoverable());
        assert!(!AckCode::BadChecksum.is_fatal());
    }

    #[test]
    fn test_display() {
        assert_eq!(AckCode::BadParameter.to_string(), "BAD_PARAM");
    }
}
