//! Order lifecycle state.

use crate::storage::record::{Record, RecordError};

/// State of a ticket order.
///
/// Stored as one tag byte. `Refunded` keeps the byte `0xff` that a signed
/// `-1` status occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum OrderStatus {
    /// Waiting for seats to free up.
    #[default]
    Pending = 0x00,
    Success = 0x01,
    Refunded = 0xff,
}

impl TryFrom<u8> for OrderStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Pending),
            0x01 => Ok(Self::Success),
            0xff => Ok(Self::Refunded),
            _ => Err(value),
        }
    }
}

impl Record for OrderStatus {
    const SIZE: usize = 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        Self::try_from(buf[0]).map_err(|tag| RecordError::InvalidTag {
            type_name: "OrderStatus",
            tag,
        })
    }
}
