//! ACL Data Header
//!
//! The 4-byte header that follows the `0x02` H4 indicator on every ACL data packet:
//! a 12-bit connection handle, the packet boundary and broadcast flags, and the
//! length of the L2CAP data that follows.

use crate::buffer::{BufferError, FlipBuffer};

/// ACL Packet Boundary flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketBoundary {
    /// First non-automatically-flushable packet (host to controller on LE)
    FirstNonFlushable = 0x00,
    /// Continuing fragment
    ContinuingFragment = 0x01,
    /// First automatically-flushable packet (controller to host)
    FirstFlushable = 0x02,
    /// Complete L2CAP PDU
    CompletePdu = 0x03,
}

impl PacketBoundary {
    /// Decode the two flag bits
    #[must_use]
    pub fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0x00 => Self::FirstNonFlushable,
            0x01 => Self::ContinuingFragment,
            0x02 => Self::FirstFlushable,
            _ => Self::CompletePdu,
        }
    }

    /// True for either "first fragment" variant
    #[must_use]
    pub fn starts_pdu(self) -> bool {
        matches!(self, Self::FirstNonFlushable | Self::FirstFlushable | Self::CompletePdu)
    }
}

/// ACL Broadcast flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BroadcastFlag {
    /// Point-to-point
    PointToPoint = 0x00,
    /// Active broadcast
    ActiveBroadcast = 0x01,
    /// Piconet broadcast
    PiconetBroadcast = 0x02,
    /// Reserved
    Reserved = 0x03,
}

impl BroadcastFlag {
    /// Decode the two flag bits
    #[must_use]
    pub fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0x00 => Self::PointToPoint,
            0x01 => Self::ActiveBroadcast,
            0x02 => Self::PiconetBroadcast,
            _ => Self::Reserved,
        }
    }
}

/// ACL Data packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AclHeader {
    /// Connection handle (12 bits)
    pub connection_handle: u16,
    /// Packet boundary flag (2 bits)
    pub packet_boundary: PacketBoundary,
    /// Broadcast flag (2 bits)
    pub broadcast_flag: BroadcastFlag,
    /// Data total length
    pub data_length: u16,
}

impl AclHeader {
    /// Size of the header in bytes, without the H4 indicator
    pub const SIZE: usize = 4;

    /// Create a header, masking the handle to 12 bits
    #[must_use]
    pub fn new(
        connection_handle: u16,
        packet_boundary: PacketBoundary,
        broadcast_flag: BroadcastFlag,
        data_length: u16,
    ) -> Self {
        Self {
            connection_handle: connection_handle & 0x0FFF,
            packet_boundary,
            broadcast_flag,
            data_length,
        }
    }

    /// Parse from the first four bytes of `bytes`
    ///
    /// # Errors
    /// Returns [`BufferError::Underflow`] if fewer than four bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BufferError> {
        if bytes.len() < Self::SIZE {
            return Err(BufferError::Underflow);
        }
        let handle_and_flags = u16::from_le_bytes([bytes[0], bytes[1]]);
        let data_length = u16::from_le_bytes([bytes[2], bytes[3]]);
        Ok(Self::new(
            handle_and_flags,
            PacketBoundary::from_bits((handle_and_flags >> 12) as u8),
            BroadcastFlag::from_bits((handle_and_flags >> 14) as u8),
            data_length,
        ))
    }

    /// Read the header at the cursor.
    ///
    /// # Errors
    /// Returns [`BufferError::Underflow`] if fewer than four bytes remain.
    pub fn read(buffer: &mut FlipBuffer<'_>) -> Result<Self, BufferError> {
        Self::from_bytes(buffer.take(Self::SIZE)?)
    }

    /// Encode the handle and flags field
    #[must_use]
    pub fn handle_and_flags(self) -> u16 {
        self.connection_handle
            | ((self.packet_boundary as u16) << 12)
            | ((self.broadcast_flag as u16) << 14)
    }

    /// Encode as little-endian bytes
    #[must_use]
    pub fn to_bytes(self) -> [u8; 4] {
        let mut bytes = [0u8; 4];
        bytes[0..2].copy_from_slice(&self.handle_and_flags().to_le_bytes());
        bytes[2..4].copy_from_slice(&self.data_length.to_le_bytes());
        bytes
    }
}
