//! ATT request handling
//!
//! [`AttServer::handle`] takes a received L2CAP frame positioned at the ATT opcode and
//! rewrites it in place into the response, reusing the ACL and L2CAP headers. Only
//! Find By Type Value needs a second buffer, since its request value must stay
//! readable while matches are written.

use super::opcode::{
    COMMAND_FLAG, ERROR_RSP, EXCHANGE_MTU_REQ, EXCHANGE_MTU_RSP, FIND_BY_TYPE_VALUE_REQ,
    FIND_BY_TYPE_VALUE_RSP, FIND_INFORMATION_REQ, FIND_INFORMATION_RSP, HANDLE_VALUE_CFM,
    READ_BLOB_REQ, READ_BLOB_RSP, READ_BY_GROUP_TYPE_REQ, READ_BY_GROUP_TYPE_RSP,
    READ_BY_TYPE_REQ, READ_BY_TYPE_RSP, READ_REQ, READ_RSP,
};
use super::{AttErrorCode, AttributeTable, is_grouping_type};
use crate::buffer::BufferError;
use crate::constants::{ACL_PACKET_SIZE, ATT_DEFAULT_MTU, L2CAP_HEADER_SIZE};
use crate::packet::Packet;
use crate::pool::{PacketAllocator, PoolId};
use crate::uuid::Uuid;

/// Offset of the byte following the opcode in an ATT response
const AFTER_OPCODE: usize = L2CAP_HEADER_SIZE + 1;

/// Find Information format: 16-bit UUIDs
const FORMAT_16BIT: u8 = 0x01;
/// Find Information format: 128-bit UUIDs
const FORMAT_128BIT: u8 = 0x02;

/// A request that ends in an Error Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct Failure {
    code: AttErrorCode,
    handle: u16,
}

impl Failure {
    fn new(code: AttErrorCode, handle: u16) -> Self {
        Self { code, handle }
    }
}

impl From<BufferError> for Failure {
    fn from(_: BufferError) -> Self {
        Self::new(AttErrorCode::InvalidPdu, 0)
    }
}

/// Attribute server bound to one L2CAP channel
#[derive(Debug)]
pub struct AttServer<'d> {
    table: &'d AttributeTable<'d>,
    server_mtu: u16,
    mtu: u16,
}

impl<'d> AttServer<'d> {
    /// Serve `table`, offering `server_mtu` in MTU exchanges. The offer is clamped to
    /// what an ACL slot can hold and never goes below the default MTU.
    #[must_use]
    pub fn new(table: &'d AttributeTable<'d>, server_mtu: u16) -> Self {
        let ceiling = u16::try_from(ACL_PACKET_SIZE - L2CAP_HEADER_SIZE).unwrap_or(u16::MAX);
        Self {
            table,
            server_mtu: server_mtu.clamp(ATT_DEFAULT_MTU, ceiling),
            mtu: ATT_DEFAULT_MTU,
        }
    }

    /// Current ATT MTU
    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// MTU offered to clients
    #[must_use]
    pub fn server_mtu(&self) -> u16 {
        self.server_mtu
    }

    /// Back to the default MTU, as on a new connection
    pub fn reset(&mut self) {
        self.mtu = ATT_DEFAULT_MTU;
    }

    /// Handle one request. `request` must be positioned at the ATT opcode.
    ///
    /// Returns the finished response frame, or `None` when the PDU calls for no
    /// response (commands, confirmations, stray responses), in which case `request` has
    /// gone back to `pools`.
    pub fn handle<'a>(
        &mut self,
        mut request: Packet<'a>,
        pools: &impl PacketAllocator<'a>,
    ) -> Option<Packet<'a>> {
        let Ok(opcode) = request.read_u8() else {
            debug!("[ATT] empty PDU");
            pools.release(request);
            return None;
        };

        let outcome = match opcode {
            EXCHANGE_MTU_REQ => self.exchange_mtu(&mut request),
            FIND_INFORMATION_REQ => self.find_information(&mut request),
            FIND_BY_TYPE_VALUE_REQ => return self.find_by_type_value(request, pools),
            READ_BY_TYPE_REQ => self.read_by_type(&mut request),
            READ_REQ => self.read(&mut request),
            READ_BLOB_REQ => self.read_blob(&mut request),
            READ_BY_GROUP_TYPE_REQ => self.read_by_group_type(&mut request),
            HANDLE_VALUE_CFM | ERROR_RSP => {
                pools.release(request);
                return None;
            }
            _ if opcode & COMMAND_FLAG != 0 => {
                debug!("[ATT] ignoring command {:#x}", opcode);
                pools.release(request);
                return None;
            }
            _ if opcode & 0x01 != 0 => {
                debug!("[ATT] ignoring response {:#x}", opcode);
                pools.release(request);
                return None;
            }
            _ => Err(Failure::new(AttErrorCode::RequestNotSupported, 0)),
        };

        let written = match outcome {
            Ok(()) => Ok(()),
            Err(failure) => {
                debug!(
                    "[ATT] request {:#x} failed: {:?} at {:#x}",
                    opcode, failure.code, failure.handle
                );
                self.write_error(&mut request, opcode, failure)
            }
        };
        self.finish(request, written, pools)
    }

    fn finish<'a>(
        &self,
        mut response: Packet<'a>,
        written: Result<(), BufferError>,
        pools: &impl PacketAllocator<'a>,
    ) -> Option<Packet<'a>> {
        match written.and_then(|()| response.finish_frame()) {
            Ok(()) => Some(response),
            Err(e) => {
                warn!("[ATT] could not build response: {:?}", e);
                pools.release(response);
                None
            }
        }
    }

    /// Largest response frame: headers plus one MTU of ATT payload
    fn response_limit(&self) -> usize {
        L2CAP_HEADER_SIZE + usize::from(self.mtu)
    }

    fn begin_response(&self, packet: &mut Packet<'_>, opcode: u8) -> Result<(), BufferError> {
        packet.begin_l2cap_reply(self.response_limit())?;
        packet.write_u8(opcode)
    }

    fn write_error(
        &self,
        packet: &mut Packet<'_>,
        request_opcode: u8,
        failure: Failure,
    ) -> Result<(), BufferError> {
        self.begin_response(packet, ERROR_RSP)?;
        packet.write_u8(request_opcode)?;
        packet.write_u16(failure.handle)?;
        packet.write_u8(failure.code as u8)
    }

    fn exchange_mtu(&mut self, packet: &mut Packet<'_>) -> Result<(), Failure> {
        let client_mtu = packet.read_u16()?;
        self.begin_response(packet, EXCHANGE_MTU_RSP)?;
        packet.write_u16(self.server_mtu)?;
        self.mtu = client_mtu.min(self.server_mtu).max(ATT_DEFAULT_MTU);
        debug!("[ATT] MTU {} (client offered {})", self.mtu, client_mtu);
        Ok(())
    }

    fn find_information(&self, packet: &mut Packet<'_>) -> Result<(), Failure> {
        let (start, end) = read_handle_range(packet)?;
        self.begin_response(packet, FIND_INFORMATION_RSP)?;
        packet.write_u8(0)?;

        let mut width = None;
        for attribute in self.table.range(start, end) {
            let uuid = attribute.uuid();
            let bytes = uuid.wire_bytes();
            if *width.get_or_insert(bytes.len()) != bytes.len()
                || packet.remaining() < 2 + bytes.len()
            {
                break;
            }
            packet.write_u16(attribute.handle())?;
            packet.write(bytes)?;
        }

        let format = match width {
            None => return Err(Failure::new(AttErrorCode::AttributeNotFound, start)),
            Some(Uuid::SHORT_SIZE) => FORMAT_16BIT,
            Some(_) => FORMAT_128BIT,
        };
        packet.patch(AFTER_OPCODE, &[format])?;
        Ok(())
    }

    fn find_by_type_value<'a>(
        &self,
        mut request: Packet<'a>,
        pools: &impl PacketAllocator<'a>,
    ) -> Option<Packet<'a>> {
        let parsed = read_handle_range(&mut request).and_then(|range| {
            let uuid = Uuid::from_u16(request.read_u16()?);
            Ok((range, uuid))
        });
        let ((start, end), uuid) = match parsed {
            Ok(parsed) => parsed,
            Err(failure) => {
                let written = self.write_error(&mut request, FIND_BY_TYPE_VALUE_REQ, failure);
                return self.finish(request, written, pools);
            }
        };

        let Some(mut response) = pools.allocate(PoolId::Acl) else {
            warn!("[ATT] no buffer for Find By Type Value response");
            let failure = Failure::new(AttErrorCode::InsufficientResources, start);
            let written = self.write_error(&mut request, FIND_BY_TYPE_VALUE_REQ, failure);
            return self.finish(request, written, pools);
        };

        let written = self.write_matches(&mut response, &request, start, end, uuid);
        match written {
            Ok(0) => {
                pools.release(response);
                let failure = Failure::new(AttErrorCode::AttributeNotFound, start);
                let written = self.write_error(&mut request, FIND_BY_TYPE_VALUE_REQ, failure);
                self.finish(request, written, pools)
            }
            Ok(_) => {
                pools.release(request);
                self.finish(response, Ok(()), pools)
            }
            Err(e) => {
                pools.release(request);
                self.finish(response, Err(e), pools)
            }
        }
    }

    /// Fill `response` with (found, group end) pairs for attributes of type `uuid` whose
    /// value equals the rest of `request`.
    fn write_matches(
        &self,
        response: &mut Packet<'_>,
        request: &Packet<'_>,
        start: u16,
        end: u16,
        uuid: Uuid,
    ) -> Result<usize, BufferError> {
        response.begin_l2cap_reply_to(request, self.response_limit())?;
        response.write_u8(FIND_BY_TYPE_VALUE_RSP)?;

        let value = request.as_slice();
        let mut found = 0;
        let mut next = self.table.find_by_type_value(start, end, uuid, value);
        while let Some(attribute) = next {
            if response.remaining() < 4 {
                break;
            }
            next = attribute
                .handle()
                .checked_add(1)
                .and_then(|from| self.table.find_by_type_value(from, end, uuid, value));
            let group_end = if attribute.group_end() == attribute.handle() && next.is_none() {
                0xFFFF
            } else {
                attribute.group_end()
            };
            response.write_u16(attribute.handle())?;
            response.write_u16(group_end)?;
            found += 1;
        }
        Ok(found)
    }

    fn read_by_type(&self, packet: &mut Packet<'_>) -> Result<(), Failure> {
        let (start, end) = read_handle_range(packet)?;
        let uuid = read_attribute_type(packet)?;

        self.begin_response(packet, READ_BY_TYPE_RSP)?;
        packet.write_u8(0)?;
        let ceiling = record_ceiling(packet.remaining());

        let mut record = None;
        let mut from = Some(start);
        while let Some(attribute) = from.and_then(|h| self.table.find_by_type(h, end, uuid)) {
            let value = attribute.value();
            let length = (value.len() + 2).min(ceiling);
            if *record.get_or_insert(length) != length || packet.remaining() < length {
                break;
            }
            packet.write_u16(attribute.handle())?;
            packet.write(&value[..length - 2])?;
            from = attribute.handle().checked_add(1);
        }

        let Some(length) = record else {
            return Err(Failure::new(AttErrorCode::AttributeNotFound, start));
        };
        // bounded by record_ceiling
        packet.patch(AFTER_OPCODE, &[length as u8])?;
        Ok(())
    }

    fn read_by_group_type(&self, packet: &mut Packet<'_>) -> Result<(), Failure> {
        let (start, end) = read_handle_range(packet)?;
        let uuid = read_attribute_type(packet)?;
        if !is_grouping_type(uuid) {
            return Err(Failure::new(AttErrorCode::UnsupportedGroupType, start));
        }

        self.begin_response(packet, READ_BY_GROUP_TYPE_RSP)?;
        packet.write_u8(0)?;
        let ceiling = record_ceiling(packet.remaining());

        let mut record = None;
        let mut from = Some(start);
        while let Some(attribute) = from.and_then(|h| self.table.find_by_type(h, end, uuid)) {
            let value = attribute.value();
            let length = (value.len() + 4).min(ceiling);
            if *record.get_or_insert(length) != length || packet.remaining() < length {
                break;
            }
            packet.write_u16(attribute.handle())?;
            packet.write_u16(attribute.group_end())?;
            packet.write(&value[..length - 4])?;
            from = attribute.group_end().max(attribute.handle()).checked_add(1);
        }

        let Some(length) = record else {
            return Err(Failure::new(AttErrorCode::AttributeNotFound, start));
        };
        packet.patch(AFTER_OPCODE, &[length as u8])?;
        Ok(())
    }

    fn read(&self, packet: &mut Packet<'_>) -> Result<(), Failure> {
        let handle = packet.read_u16()?;
        let attribute = self
            .table
            .get(handle)
            .ok_or(Failure::new(AttErrorCode::InvalidHandle, handle))?;

        self.begin_response(packet, READ_RSP)?;
        let value = attribute.value();
        let length = value.len().min(packet.remaining());
        packet.write(&value[..length])?;
        Ok(())
    }

    fn read_blob(&self, packet: &mut Packet<'_>) -> Result<(), Failure> {
        let handle = packet.read_u16()?;
        let offset = usize::from(packet.read_u16()?);
        let attribute = self
            .table
            .get(handle)
            .ok_or(Failure::new(AttErrorCode::InvalidHandle, handle))?;

        let value = attribute.value();
        if value.len() <= usize::from(self.mtu) - 1 {
            return Err(Failure::new(AttErrorCode::AttributeNotLong, handle));
        }
        if offset > value.len() {
            return Err(Failure::new(AttErrorCode::InvalidOffset, handle));
        }

        self.begin_response(packet, READ_BLOB_RSP)?;
        let tail = &value[offset..];
        let length = tail.len().min(packet.remaining());
        packet.write(&tail[..length])?;
        Ok(())
    }
}

/// Starting and ending handle of a ranged request
fn read_handle_range(packet: &mut Packet<'_>) -> Result<(u16, u16), Failure> {
    let start = packet.read_u16()?;
    let end = packet.read_u16()?;
    if start == 0 || start > end {
        return Err(Failure::new(AttErrorCode::InvalidHandle, start));
    }
    Ok((start, end))
}

/// Trailing 2- or 16-byte attribute type
fn read_attribute_type(packet: &mut Packet<'_>) -> Result<Uuid, Failure> {
    let length = packet.remaining();
    let bytes = packet.take(length)?;
    Uuid::from_slice(bytes).ok_or(Failure::new(AttErrorCode::InvalidPdu, 0))
}

/// Largest record a length-prefixed list may carry: the one-byte length field caps it
/// at 255 and the response after its length byte caps it at `room`
fn record_ceiling(room: usize) -> usize {
    room.min(usize::from(u8::MAX))
}
