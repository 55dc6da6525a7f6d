//! HCI Packets
//!
//! A [`Packet`] is a [`FlipBuffer`] over one pool slot that also knows the H4 framing
//! of the bytes it carries. Outgoing frames are built in two phases: a `begin_*` call
//! writes the header with zeroed length fields, the payload is written at the cursor,
//! and [`Packet::finish_frame`] fills in the lengths from the final cursor position
//! and rewinds to 0 so the whole frame can be handed to the transport.
//!
//! ```text
//! command: [0x01][opcode:u16][param_len:u8][params...]
//! event:   [0x04][event_code:u8][param_len:u8][params...]
//! acl:     [0x02][handle+flags:u16][data_len:u16][l2cap_len:u16][cid:u16][payload...]
//! ```

use crate::acl::{AclHeader, BroadcastFlag, PacketBoundary};
use crate::buffer::{BufferError, FlipBuffer};
use crate::constants::{ACL_HEADER_SIZE, COMMAND_HEADER_SIZE, L2CAP_HEADER_SIZE};
use crate::pool::PoolId;
use core::ops::{Deref, DerefMut};

/// H4 packet indicator, the first byte of every frame on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketKind {
    /// HCI command (host to controller)
    Command = 0x01,
    /// ACL data
    Acl = 0x02,
    /// Synchronous (SCO) data
    Sync = 0x03,
    /// HCI event (controller to host)
    Event = 0x04,
    /// eHCILL: controller wants to sleep
    GoToSleepInd = 0x30,
    /// eHCILL: host agrees to sleep
    GoToSleepAck = 0x31,
    /// eHCILL: wake-up request
    WakeUpInd = 0x32,
    /// eHCILL: wake-up acknowledgement
    WakeUpAck = 0x33,
}

impl PacketKind {
    /// Classify an indicator byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Command),
            0x02 => Some(Self::Acl),
            0x03 => Some(Self::Sync),
            0x04 => Some(Self::Event),
            0x30 => Some(Self::GoToSleepInd),
            0x31 => Some(Self::GoToSleepAck),
            0x32 => Some(Self::WakeUpInd),
            0x33 => Some(Self::WakeUpAck),
            _ => None,
        }
    }

    /// True for the vendor sleep-protocol indicators
    #[must_use]
    pub fn is_sleep_indicator(self) -> bool {
        matches!(
            self,
            Self::GoToSleepInd | Self::GoToSleepAck | Self::WakeUpInd | Self::WakeUpAck
        )
    }
}

/// A framed packet living in a pool slot
///
/// Not `Clone`: the slot it wraps can only be in one place at a time, and it goes back
/// to its pool by value.
#[derive(Debug)]
pub struct Packet<'a> {
    buffer: FlipBuffer<'a>,
    origin: PoolId,
}

impl<'a> Packet<'a> {
    /// Wrap storage that belongs to `origin`.
    #[must_use]
    pub fn new(storage: &'a mut [u8], origin: PoolId) -> Self {
        Self {
            buffer: FlipBuffer::new(storage),
            origin,
        }
    }

    /// Wrap storage that belongs to no pool, such as a stack buffer.
    #[must_use]
    pub fn unpooled(storage: &'a mut [u8]) -> Self {
        Self::new(storage, PoolId::Unpooled)
    }

    /// Pool this packet must be returned to
    #[must_use]
    pub fn origin(&self) -> PoolId {
        self.origin
    }

    pub(crate) fn into_storage(self) -> &'a mut [u8] {
        self.buffer.into_inner()
    }

    /// Indicator in byte 0, if the frame has one
    #[must_use]
    pub fn kind(&self) -> Option<PacketKind> {
        self.buffer.get(0).and_then(PacketKind::from_u8)
    }

    /// Reset and write an HCI command header with a zero parameter length.
    ///
    /// # Errors
    /// Returns [`BufferError::Overflow`] if the slot is smaller than a command header.
    pub fn begin_command(&mut self, opcode: u16) -> Result<(), BufferError> {
        self.buffer.reset();
        self.buffer.write_u8(PacketKind::Command as u8)?;
        self.buffer.write_u16(opcode)?;
        self.buffer.write_u8(0)
    }

    /// Reset and write an ACL header with a zero data length.
    ///
    /// # Errors
    /// Returns [`BufferError::Overflow`] if the slot is smaller than an ACL header.
    pub fn begin_acl(
        &mut self,
        handle: u16,
        boundary: PacketBoundary,
        broadcast: BroadcastFlag,
    ) -> Result<(), BufferError> {
        self.buffer.reset();
        self.buffer.write_u8(PacketKind::Acl as u8)?;
        self.buffer
            .write(&AclHeader::new(handle, boundary, broadcast, 0).to_bytes())
    }

    /// Reset and write ACL + L2CAP headers addressed to `cid` on `handle`.
    ///
    /// # Errors
    /// Returns [`BufferError::Overflow`] if the slot is smaller than an L2CAP header.
    pub fn begin_l2cap(&mut self, handle: u16, cid: u16) -> Result<(), BufferError> {
        self.begin_acl(
            handle,
            PacketBoundary::FirstNonFlushable,
            BroadcastFlag::PointToPoint,
        )?;
        self.buffer.write_u16(0)?;
        self.buffer.write_u16(cid)
    }

    /// Reuse the ACL + L2CAP headers already in this packet for a reply on the same
    /// channel: the limit is moved to `limit` and the cursor placed after the headers.
    /// Payload bytes of the request stay in the slot until the reply overwrites them.
    /// The boundary flag is rewritten for the host-to-controller direction.
    ///
    /// # Errors
    /// Returns [`BufferError::InvalidLimit`] if `limit` is shorter than the headers or
    /// larger than the slot.
    pub fn begin_l2cap_reply(&mut self, limit: usize) -> Result<(), BufferError> {
        if limit < L2CAP_HEADER_SIZE {
            return Err(BufferError::InvalidLimit);
        }
        self.buffer.reset_to(limit)?;
        self.rewrite_boundary()?;
        self.buffer.seek(L2CAP_HEADER_SIZE)
    }

    /// Copy the ACL + L2CAP headers of `request` into this packet and prepare it as
    /// a reply, as [`Packet::begin_l2cap_reply`] does.
    ///
    /// # Errors
    /// Returns [`BufferError`] if either slot is too small.
    pub fn begin_l2cap_reply_to(
        &mut self,
        request: &Packet<'_>,
        limit: usize,
    ) -> Result<(), BufferError> {
        self.buffer
            .copy_prefix_from(&request.buffer, L2CAP_HEADER_SIZE)?;
        self.begin_l2cap_reply(limit)
    }

    fn rewrite_boundary(&mut self) -> Result<(), BufferError> {
        let header = AclHeader::from_bytes(&self.buffer.as_written()[1..ACL_HEADER_SIZE])?;
        let reply = AclHeader::new(
            header.connection_handle,
            PacketBoundary::FirstNonFlushable,
            BroadcastFlag::PointToPoint,
            0,
        );
        self.buffer.patch(1, &reply.to_bytes())
    }

    /// Close a frame started with one of the `begin_*` calls: flip if anything was
    /// written, fill in the length fields implied by the limit and rewind to 0.
    ///
    /// # Errors
    /// Returns [`BufferError::Underflow`] if the frame is shorter than its header, or
    /// [`BufferError::Overflow`] if a command carries more than 255 parameter bytes.
    pub fn finish_frame(&mut self) -> Result<(), BufferError> {
        if self.buffer.position() != 0 {
            self.buffer.flip();
        }
        let limit = self.buffer.limit();

        match self.kind() {
            Some(PacketKind::Command) => {
                let length = limit
                    .checked_sub(COMMAND_HEADER_SIZE)
                    .ok_or(BufferError::Underflow)?;
                let length = u8::try_from(length).map_err(|_| BufferError::Overflow)?;
                self.buffer.patch(3, &[length])?;
            }
            Some(PacketKind::Acl) => {
                let data_length = limit
                    .checked_sub(ACL_HEADER_SIZE)
                    .ok_or(BufferError::Underflow)?;
                let data_length = u16::try_from(data_length).map_err(|_| BufferError::Overflow)?;
                self.buffer.patch(3, &data_length.to_le_bytes())?;
                if let Some(l2cap_length) = limit.checked_sub(L2CAP_HEADER_SIZE) {
                    let l2cap_length =
                        u16::try_from(l2cap_length).map_err(|_| BufferError::Overflow)?;
                    self.buffer.patch(5, &l2cap_length.to_le_bytes())?;
                }
            }
            _ => {}
        }

        self.buffer.seek(0)
    }
}

impl<'a> Deref for Packet<'a> {
    type Target = FlipBuffer<'a>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for Packet<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frame_length_is_patched() {
        let mut storage = [0u8; 32];
        let mut packet = Packet::unpooled(&mut storage);

        packet.begin_command(0x0C03).unwrap();
        packet.write(&[0xAA, 0xBB, 0xCC]).unwrap();
        packet.finish_frame().unwrap();

        assert_eq!(packet.position(), 0);
        assert_eq!(packet.kind(), Some(PacketKind::Command));
        assert_eq!(packet.as_slice(), &[0x01, 0x03, 0x0C, 0x03, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_command_without_parameters() {
        let mut storage = [0u8; 8];
        let mut packet = Packet::unpooled(&mut storage);

        packet.begin_command(0x1009).unwrap();
        packet.finish_frame().unwrap();
        assert_eq!(packet.as_slice(), &[0x01, 0x09, 0x10, 0x00]);
    }

    #[test]
    fn test_l2cap_frame_lengths_are_consistent() {
        let mut storage = [0u8; 64];
        let mut packet = Packet::unpooled(&mut storage);

        packet.begin_l2cap(0x0040, 0x0004).unwrap();
        packet.write(&[0x0A, 0x03, 0x00]).unwrap();
        packet.finish_frame().unwrap();

        let frame = packet.as_slice();
        assert_eq!(frame.len(), 12);
        assert_eq!(frame[0], 0x02);
        assert_eq!(u16::from_le_bytes([frame[1], frame[2]]), 0x0040);
        // data total length covers the L2CAP header and payload
        assert_eq!(u16::from_le_bytes([frame[3], frame[4]]), 7);
        // L2CAP length covers the payload only
        assert_eq!(u16::from_le_bytes([frame[5], frame[6]]), 3);
        assert_eq!(u16::from_le_bytes([frame[7], frame[8]]), 0x0004);
    }

    #[test]
    fn test_finish_frame_twice_keeps_lengths() {
        let mut storage = [0u8; 16];
        let mut packet = Packet::unpooled(&mut storage);
        packet.begin_command(0x200A).unwrap();
        packet.write_u8(0x01).unwrap();
        packet.finish_frame().unwrap();
        packet.finish_frame().unwrap();
        assert_eq!(packet.as_slice(), &[0x01, 0x0A, 0x20, 0x01, 0x01]);
    }

    #[test]
    fn test_reply_reuses_headers() {
        let mut storage = [0u8; 64];
        let mut packet = Packet::unpooled(&mut storage);
        // request as received from the controller: first flushable, handle 0x0001
        packet
            .write(&[0x02, 0x01, 0x20, 0x07, 0x00, 0x03, 0x00, 0x04, 0x00, 0x02, 0x17, 0x00])
            .unwrap();
        packet.flip();

        packet.begin_l2cap_reply(9 + 23).unwrap();
        assert_eq!(packet.position(), 9);
        assert_eq!(packet.remaining(), 23);
        // the request opcode is still there until overwritten
        assert_eq!(packet.get(9), Some(0x02));
        packet.write(&[0x03, 0x17, 0x00]).unwrap();
        packet.finish_frame().unwrap();

        assert_eq!(
            packet.as_slice(),
            &[0x02, 0x01, 0x00, 0x07, 0x00, 0x03, 0x00, 0x04, 0x00, 0x03, 0x17, 0x00]
        );
    }

    #[test]
    fn test_reply_to_other_packet() {
        let mut request_storage = [0u8; 16];
        let mut request = Packet::unpooled(&mut request_storage);
        request
            .write(&[0x02, 0x05, 0x20, 0x05, 0x00, 0x01, 0x00, 0x04, 0x00, 0x0A])
            .unwrap();
        request.flip();

        let mut reply_storage = [0u8; 32];
        let mut reply = Packet::unpooled(&mut reply_storage);
        reply.begin_l2cap_reply_to(&request, 32).unwrap();
        reply.write_u8(0x0B).unwrap();
        reply.finish_frame().unwrap();

        assert_eq!(
            reply.as_slice(),
            &[0x02, 0x05, 0x00, 0x05, 0x00, 0x01, 0x00, 0x04, 0x00, 0x0B]
        );
    }

    #[test]
    fn test_reply_limit_must_cover_headers() {
        let mut storage = [0u8; 16];
        let mut packet = Packet::unpooled(&mut storage);
        assert_eq!(packet.begin_l2cap_reply(4), Err(BufferError::InvalidLimit));
        assert_eq!(packet.begin_l2cap_reply(17), Err(BufferError::InvalidLimit));
    }

    #[test]
    fn test_oversized_command_is_rejected() {
        let mut storage = [0u8; 300];
        let mut packet = Packet::unpooled(&mut storage);
        packet.begin_command(0xFC00).unwrap();
        packet.write(&[0u8; 256]).unwrap();
        assert_eq!(packet.finish_frame(), Err(BufferError::Overflow));
    }

    #[test]
    fn test_indicator_classification() {
        assert_eq!(PacketKind::from_u8(0x04), Some(PacketKind::Event));
        assert_eq!(PacketKind::from_u8(0x30), Some(PacketKind::GoToSleepInd));
        assert!(PacketKind::WakeUpAck.is_sleep_indicator());
        assert!(!PacketKind::Acl.is_sleep_indicator());
        assert_eq!(PacketKind::from_u8(0x05), None);
    }
}
