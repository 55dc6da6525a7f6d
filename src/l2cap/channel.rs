//! L2CAP Channel Registry
//!
//! Each registered channel is a fixed CID bound to one of a small closed set of
//! handlers. A received frame is handed to its channel positioned at the first payload
//! byte; the channel either turns it into a reply frame or gives it back to the pool.

use super::packet::{ChannelId, cid};
use crate::Error;
use crate::att::{AttServer, AttributeTable};
use crate::constants::{L2CAP_HEADER_SIZE, MAX_L2CAP_CHANNELS};
use crate::fmt::Bytes;
use crate::packet::Packet;
use crate::pool::PacketAllocator;
use heapless::FnvIndexMap;

/// Security Manager opcodes and reasons used by the pairing stub
mod smp {
    /// Pairing Request
    pub const PAIRING_REQUEST: u8 = 0x01;
    /// Pairing Failed
    pub const PAIRING_FAILED: u8 = 0x05;
    /// Reason: Pairing Not Supported
    pub const PAIRING_NOT_SUPPORTED: u8 = 0x05;
    /// Fixed MTU of the Security Manager channel
    pub const MTU: usize = 23;
}

/// What a channel does with the frames it receives
#[derive(Debug)]
pub enum ChannelKind<'d> {
    /// Attribute protocol server
    Attribute(AttServer<'d>),
    /// LE signaling; frames are logged and discarded
    Signaling,
    /// Security Manager stub that refuses every pairing attempt
    SecurityManager,
    /// Anything else; frames are logged and discarded
    Generic,
}

/// A fixed L2CAP channel
#[derive(Debug)]
pub struct Channel<'d> {
    id: ChannelId,
    kind: ChannelKind<'d>,
}

impl<'d> Channel<'d> {
    /// Bind `kind` to channel `id`
    #[must_use]
    pub fn new(id: ChannelId, kind: ChannelKind<'d>) -> Self {
        Self { id, kind }
    }

    /// Attribute server on the ATT fixed channel
    #[must_use]
    pub fn attribute(table: &'d AttributeTable<'d>, mtu: u16) -> Self {
        Self::new(cid::ATT, ChannelKind::Attribute(AttServer::new(table, mtu)))
    }

    /// Channel identifier
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Handler
    #[must_use]
    pub fn kind(&self) -> &ChannelKind<'d> {
        &self.kind
    }

    /// Handle a frame positioned at its L2CAP payload. Returns the reply to transmit,
    /// if any; otherwise the frame has been released.
    pub fn receive<'a>(
        &mut self,
        packet: Packet<'a>,
        pools: &impl PacketAllocator<'a>,
    ) -> Option<Packet<'a>> {
        match &mut self.kind {
            ChannelKind::Attribute(server) => server.handle(packet, pools),
            ChannelKind::SecurityManager => security_manager_receive(packet, pools),
            ChannelKind::Signaling | ChannelKind::Generic => {
                debug!(
                    "[L2CAP] discarding on CID {:#x}: {:?}",
                    self.id,
                    Bytes(packet.as_slice())
                );
                pools.release(packet);
                None
            }
        }
    }

    /// Forget per-connection state
    pub fn reset(&mut self) {
        if let ChannelKind::Attribute(server) = &mut self.kind {
            server.reset();
        }
    }
}

fn security_manager_receive<'a>(
    mut packet: Packet<'a>,
    pools: &impl PacketAllocator<'a>,
) -> Option<Packet<'a>> {
    let code = packet.read_u8().ok();
    if code != Some(smp::PAIRING_REQUEST) {
        debug!("[L2CAP] ignoring SMP code {:?}", code);
        pools.release(packet);
        return None;
    }

    info!("[L2CAP] pairing requested, refusing");
    let written = packet
        .begin_l2cap_reply(L2CAP_HEADER_SIZE + smp::MTU)
        .and_then(|()| packet.write(&[smp::PAIRING_FAILED, smp::PAIRING_NOT_SUPPORTED]))
        .and_then(|()| packet.finish_frame());
    match written {
        Ok(()) => Some(packet),
        Err(e) => {
            warn!("[L2CAP] could not build Pairing Failed: {:?}", e);
            pools.release(packet);
            None
        }
    }
}

/// Fixed channels registered on the stack
#[derive(Debug)]
pub struct ChannelRegistry<'d> {
    channels: FnvIndexMap<ChannelId, Channel<'d>, MAX_L2CAP_CHANNELS>,
}

impl Default for ChannelRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'d> ChannelRegistry<'d> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: FnvIndexMap::new(),
        }
    }

    /// The LE fixed channels: ATT serving `table`, LE signaling and the Security
    /// Manager stub
    ///
    /// # Errors
    /// Returns [`Error::TableFull`] if the registry cannot hold the three channels.
    pub fn le_fixed(table: &'d AttributeTable<'d>, att_mtu: u16) -> Result<Self, Error> {
        let mut registry = Self::new();
        registry.register(Channel::attribute(table, att_mtu))?;
        registry.register(Channel::new(cid::LE_SIGNALING, ChannelKind::Signaling))?;
        registry.register(Channel::new(
            cid::SECURITY_MANAGER,
            ChannelKind::SecurityManager,
        ))?;
        Ok(registry)
    }

    /// Register `channel`, replacing any channel already bound to its identifier
    ///
    /// # Errors
    /// Returns [`Error::TableFull`] when `MAX_L2CAP_CHANNELS` are registered.
    pub fn register(&mut self, channel: Channel<'d>) -> Result<(), Error> {
        self.channels
            .insert(channel.id, channel)
            .map(|_| ())
            .map_err(|_| Error::TableFull)
    }

    /// Remove a channel
    pub fn remove(&mut self, id: ChannelId) -> Option<Channel<'d>> {
        self.channels.remove(&id)
    }

    /// Get a channel by identifier
    #[must_use]
    pub fn find(&self, id: ChannelId) -> Option<&Channel<'d>> {
        self.channels.get(&id)
    }

    /// Get a mutable channel by identifier
    pub fn find_mut(&mut self, id: ChannelId) -> Option<&mut Channel<'d>> {
        self.channels.get_mut(&id)
    }

    /// Number of registered channels
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// True if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Route a frame positioned at its L2CAP payload to channel `id`. Frames for
    /// unknown channels are released.
    pub fn receive<'a>(
        &mut self,
        id: ChannelId,
        packet: Packet<'a>,
        pools: &impl PacketAllocator<'a>,
    ) -> Option<Packet<'a>> {
        match self.channels.get_mut(&id) {
            Some(channel) => channel.receive(packet, pools),
            None => {
                warn!("[L2CAP] no channel for CID {:#x}", id);
                pools.release(packet);
                None
            }
        }
    }

    /// Forget per-connection state on every channel
    pub fn reset(&mut self) {
        for channel in self.channels.values_mut() {
            channel.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt;
    use crate::pool::{PacketPools, PacketStorage, PoolId};
    use core::cell::RefCell;

    fn frame<'a>(pools: &RefCell<PacketPools<'a>>, channel: ChannelId, payload: &[u8]) -> Packet<'a> {
        let mut packet = pools.allocate(PoolId::Acl).unwrap();
        packet.begin_l2cap(0x0040, channel).unwrap();
        packet.write(payload).unwrap();
        packet.finish_frame().unwrap();
        packet.seek(L2CAP_HEADER_SIZE).unwrap();
        packet
    }

    #[test]
    fn test_le_fixed_channels() {
        let table = AttributeTable::new();
        let registry = ChannelRegistry::le_fixed(&table, 23).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(matches!(
            registry.find(cid::ATT).unwrap().kind(),
            ChannelKind::Attribute(_)
        ));
        assert!(matches!(
            registry.find(cid::LE_SIGNALING).unwrap().kind(),
            ChannelKind::Signaling
        ));
        assert!(registry.find(0x0040).is_none());
    }

    #[test]
    fn test_registry_capacity() {
        let mut registry = ChannelRegistry::new();
        for id in 0..MAX_L2CAP_CHANNELS as u16 {
            registry
                .register(Channel::new(cid::DYNAMIC_START + id, ChannelKind::Generic))
                .unwrap();
        }
        assert_eq!(
            registry.register(Channel::new(0x0070, ChannelKind::Generic)),
            Err(Error::TableFull)
        );
        // rebinding an existing identifier does not need a new slot
        registry
            .register(Channel::new(cid::DYNAMIC_START, ChannelKind::Signaling))
            .unwrap();
        assert!(registry.remove(cid::DYNAMIC_START).is_some());
        assert_eq!(registry.len(), MAX_L2CAP_CHANNELS - 1);
    }

    #[test]
    fn test_unknown_channel_releases_frame() {
        let mut storage = PacketStorage::new();
        let pools = RefCell::new(PacketPools::new(&mut storage));
        let table = AttributeTable::new();
        let mut registry = ChannelRegistry::le_fixed(&table, 23).unwrap();

        let before = pools.borrow().available(PoolId::Acl);
        let packet = frame(&pools, 0x0041, &[0x01, 0x02]);
        assert!(registry.receive(0x0041, packet, &pools).is_none());
        let packet = frame(&pools, cid::LE_SIGNALING, &[0x12, 0x01, 0x08, 0x00]);
        assert!(registry.receive(cid::LE_SIGNALING, packet, &pools).is_none());
        assert_eq!(pools.borrow().available(PoolId::Acl), before);
    }

    #[test]
    fn test_pairing_request_is_refused() {
        let mut storage = PacketStorage::new();
        let pools = RefCell::new(PacketPools::new(&mut storage));
        let table = AttributeTable::new();
        let mut registry = ChannelRegistry::le_fixed(&table, 23).unwrap();

        let packet = frame(
            &pools,
            cid::SECURITY_MANAGER,
            &[0x01, 0x03, 0x00, 0x01, 0x10, 0x07, 0x07],
        );
        let reply = registry
            .receive(cid::SECURITY_MANAGER, packet, &pools)
            .unwrap();
        assert_eq!(
            reply.as_slice(),
            &[0x02, 0x40, 0x00, 0x06, 0x00, 0x02, 0x00, 0x06, 0x00, 0x05, 0x05]
        );

        // anything but a pairing request is dropped
        let packet = frame(&pools, cid::SECURITY_MANAGER, &[0x0B, 0x01]);
        assert!(registry.receive(cid::SECURITY_MANAGER, packet, &pools).is_none());
    }

    #[test]
    fn test_attribute_channel_answers_and_resets() {
        let mut storage = PacketStorage::new();
        let pools = RefCell::new(PacketPools::new(&mut storage));
        let mut table = AttributeTable::new();
        gatt::add_gap_service(&mut table, "gattbird", None).unwrap();
        let mut registry = ChannelRegistry::le_fixed(&table, 64).unwrap();

        let packet = frame(&pools, cid::ATT, &[0x02, 0x40, 0x00]);
        let reply = registry.receive(cid::ATT, packet, &pools).unwrap();
        assert_eq!(&reply.as_slice()[9..], &[0x03, 0x40, 0x00]);
        let mtu = |registry: &ChannelRegistry<'_>| match registry.find(cid::ATT).unwrap().kind() {
            ChannelKind::Attribute(server) => server.mtu(),
            _ => 0,
        };
        assert_eq!(mtu(&registry), 64);

        registry.reset();
        assert_eq!(mtu(&registry), 23);
    }
}
