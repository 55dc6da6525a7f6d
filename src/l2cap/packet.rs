//! L2CAP Basic Header
//!
//! Every L2CAP frame carried over ACL starts with a 4-byte header holding the payload
//! length and the destination channel identifier. On an LE link the protocols this
//! stack serves run on fixed channels, so the channel identifier alone selects the
//! handler.

use crate::buffer::{BufferError, FlipBuffer};

/// L2CAP Channel Identifier (CID)
///
/// - 0x0000: Reserved, shall not be used
/// - 0x0004: Attribute protocol
/// - 0x0005: LE signaling channel
/// - 0x0006: Security Manager protocol
/// - 0x0040-0x007F: LE dynamically allocated
pub type ChannelId = u16;

/// LE fixed channel identifiers
pub mod cid {
    use super::ChannelId;

    /// Reserved - shall not be used
    pub const NULL: ChannelId = 0x0000;
    /// Attribute protocol
    pub const ATT: ChannelId = 0x0004;
    /// LE signaling channel
    pub const LE_SIGNALING: ChannelId = 0x0005;
    /// Security Manager protocol
    pub const SECURITY_MANAGER: ChannelId = 0x0006;

    /// First dynamically allocated CID
    pub const DYNAMIC_START: ChannelId = 0x0040;
}

/// L2CAP Basic Header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct L2capHeader {
    /// Length of the payload (not including the header itself)
    pub length: u16,
    /// Channel identifier of the intended recipient
    pub channel_id: ChannelId,
}

impl L2capHeader {
    /// Size of the L2CAP header in bytes
    pub const SIZE: usize = 4;

    /// Create a new L2CAP header
    #[must_use]
    pub fn new(length: u16, channel_id: ChannelId) -> Self {
        Self { length, channel_id }
    }

    /// Parse L2CAP header from byte slice
    ///
    /// # Errors
    /// Returns [`BufferError::Underflow`] if the slice is less than 4 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BufferError> {
        if bytes.len() < Self::SIZE {
            return Err(BufferError::Underflow);
        }

        let length = u16::from_le_bytes([bytes[0], bytes[1]]);
        let channel_id = u16::from_le_bytes([bytes[2], bytes[3]]);

        Ok(Self::new(length, channel_id))
    }

    /// Read the header at the cursor of `buffer`, leaving it on the payload
    ///
    /// # Errors
    /// Returns [`BufferError::Underflow`] if fewer than 4 bytes remain
    pub fn read(buffer: &mut FlipBuffer<'_>) -> Result<Self, BufferError> {
        let length = buffer.read_u16()?;
        let channel_id = buffer.read_u16()?;
        Ok(Self::new(length, channel_id))
    }

    /// Convert header to bytes (little-endian)
    #[must_use]
    pub fn to_bytes(self) -> [u8; 4] {
        let mut bytes = [0u8; 4];
        bytes[0..2].copy_from_slice(&self.length.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.channel_id.to_le_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2cap_header_serialization() {
        let header = L2capHeader::new(0x1234, 0x5678);
        let bytes = header.to_bytes();
        assert_eq!(bytes, [0x34, 0x12, 0x78, 0x56]); // Little-endian

        let parsed = L2capHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_l2cap_header_parsing_errors() {
        let short_bytes = [0x01, 0x02, 0x03];
        assert_eq!(
            L2capHeader::from_bytes(&short_bytes),
            Err(BufferError::Underflow)
        );
    }

    #[test]
    fn test_read_from_buffer() {
        let mut storage = [0u8; 8];
        let mut buffer = FlipBuffer::new(&mut storage);
        buffer.write(&[0x03, 0x00, 0x04, 0x00, 0x0A, 0x01, 0x00]).unwrap();
        buffer.flip();

        let header = L2capHeader::read(&mut buffer).unwrap();
        assert_eq!(header, L2capHeader::new(3, cid::ATT));
        assert_eq!(buffer.position(), L2capHeader::SIZE);
        assert_eq!(buffer.remaining(), 3);
    }
}
