//! Packet Pools
//!
//! Fixed-size allocators handing out [`Packet`]s over pre-sized slots. Each pool keeps
//! the exclusive borrows of its free slots on a stack, so allocation and deallocation
//! are O(1) and a slot can only ever be in one place: on the free stack or inside a
//! live `Packet`. Returning a packet moves it back, which makes a double free
//! impossible to express; packets that belong to a different pool are refused.
//!
//! Exhaustion is reported as `None`; the caller decides whether to drop, retry later
//! or answer with an error.

use crate::constants::{
    ACL_PACKET_COUNT, ACL_PACKET_SIZE, COMMAND_PACKET_COUNT, COMMAND_PACKET_SIZE,
};
use crate::packet::Packet;
use heapless::Vec;

/// Identifies which pool a packet was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PoolId {
    /// HCI commands and events
    Command,
    /// ACL data
    Acl,
    /// Caller-owned storage outside any pool
    Unpooled,
}

/// Fixed-capacity packet allocator over `N` slots
#[derive(Debug)]
pub struct PacketPool<'a, const N: usize> {
    id: PoolId,
    slot_size: usize,
    free: Vec<&'a mut [u8], N>,
}

impl<'a, const N: usize> PacketPool<'a, N> {
    /// Build a pool over `slots`; every slot starts out free.
    #[must_use]
    pub fn new<const SIZE: usize>(id: PoolId, slots: &'a mut [[u8; SIZE]; N]) -> Self {
        let mut free = Vec::new();
        for slot in slots {
            let slot: &'a mut [u8] = slot;
            if free.push(slot).is_err() {
                warn!("[POOL] {:?} free list is full", id);
            }
        }
        Self {
            id,
            slot_size: SIZE,
            free,
        }
    }

    /// Pool identity stamped on every packet it hands out
    #[must_use]
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Total number of slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        N
    }

    /// Bytes per slot
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Slots currently free
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Take a free slot, reset to `position = 0, limit = capacity`.
    pub fn allocate(&mut self) -> Option<Packet<'a>> {
        self.free.pop().map(|storage| Packet::new(storage, self.id))
    }

    /// Put a packet's slot back on the free stack.
    ///
    /// # Errors
    /// Hands the packet back unchanged if it belongs to another pool.
    pub fn deallocate(&mut self, packet: Packet<'a>) -> Result<(), Packet<'a>> {
        if packet.origin() != self.id || self.free.is_full() {
            return Err(packet);
        }
        self.free.push(packet.into_storage()).map_err(|storage| Packet::new(storage, self.id))
    }
}

/// Backing storage for the two standard pools
///
/// Large; place it in a `static` (for example through `static_cell`) on target.
#[derive(Debug)]
pub struct PacketStorage {
    command: [[u8; COMMAND_PACKET_SIZE]; COMMAND_PACKET_COUNT],
    acl: [[u8; ACL_PACKET_SIZE]; ACL_PACKET_COUNT],
}

impl PacketStorage {
    /// Zeroed storage
    #[must_use]
    pub const fn new() -> Self {
        Self {
            command: [[0; COMMAND_PACKET_SIZE]; COMMAND_PACKET_COUNT],
            acl: [[0; ACL_PACKET_SIZE]; ACL_PACKET_COUNT],
        }
    }
}

impl Default for PacketStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// The command/event pool and the ACL pool, routed by [`PoolId`]
#[derive(Debug)]
pub struct PacketPools<'a> {
    command: PacketPool<'a, COMMAND_PACKET_COUNT>,
    acl: PacketPool<'a, ACL_PACKET_COUNT>,
}

impl<'a> PacketPools<'a> {
    /// Carve both pools out of `storage`
    #[must_use]
    pub fn new(storage: &'a mut PacketStorage) -> Self {
        Self {
            command: PacketPool::new(PoolId::Command, &mut storage.command),
            acl: PacketPool::new(PoolId::Acl, &mut storage.acl),
        }
    }

    /// Allocate from the pool named by `id`; `None` when exhausted.
    pub fn allocate(&mut self, id: PoolId) -> Option<Packet<'a>> {
        match id {
            PoolId::Command => self.command.allocate(),
            PoolId::Acl => self.acl.allocate(),
            PoolId::Unpooled => None,
        }
    }

    /// Return a packet to the pool it came from.
    ///
    /// # Errors
    /// Hands back packets that do not belong to either pool.
    pub fn deallocate(&mut self, packet: Packet<'a>) -> Result<(), Packet<'a>> {
        match packet.origin() {
            PoolId::Command => self.command.deallocate(packet),
            PoolId::Acl => self.acl.deallocate(packet),
            PoolId::Unpooled => Err(packet),
        }
    }

    /// Free slots in the pool named by `id`
    #[must_use]
    pub fn available(&self, id: PoolId) -> usize {
        match id {
            PoolId::Command => self.command.available(),
            PoolId::Acl => self.acl.available(),
            PoolId::Unpooled => 0,
        }
    }

    /// Total slots in the pool named by `id`
    #[must_use]
    pub fn capacity(&self, id: PoolId) -> usize {
        match id {
            PoolId::Command => self.command.capacity(),
            PoolId::Acl => self.acl.capacity(),
            PoolId::Unpooled => 0,
        }
    }
}

/// Allocation seam between protocol code and whoever owns the pools
pub trait PacketAllocator<'a> {
    /// Allocate from pool `id`; `None` when exhausted.
    fn allocate(&self, id: PoolId) -> Option<Packet<'a>>;

    /// Return `packet` to its pool. Packets that belong to no pool are dropped.
    fn release(&self, packet: Packet<'a>);
}

impl<'a> PacketAllocator<'a> for core::cell::RefCell<PacketPools<'a>> {
    fn allocate(&self, id: PoolId) -> Option<Packet<'a>> {
        self.borrow_mut().allocate(id)
    }

    fn release(&self, packet: Packet<'a>) {
        if let Err(packet) = self.borrow_mut().deallocate(packet) {
            warn!("[POOL] dropping packet from {:?}", packet.origin());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ACL_PACKET_SIZE, COMMAND_PACKET_SIZE};

    #[test]
    fn test_allocate_until_exhausted() {
        let mut slots = [[0u8; 8]; 3];
        let mut pool = PacketPool::new(PoolId::Command, &mut slots);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        assert!(pool.allocate().is_none());
        assert_eq!(pool.available(), 0);

        // distinct slots
        let pa = a.as_written().as_ptr();
        let pb = b.as_written().as_ptr();
        let pc = c.as_written().as_ptr();
        assert_ne!(pa, pb);
        assert_ne!(pb, pc);
        assert_ne!(pa, pc);

        pool.deallocate(b).unwrap();
        assert_eq!(pool.available(), 1);
        let again = pool.allocate().unwrap();
        assert_eq!(again.as_written().as_ptr(), pb);

        pool.deallocate(a).unwrap();
        pool.deallocate(c).unwrap();
        pool.deallocate(again).unwrap();
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_allocated_packet_is_reset() {
        let mut slots = [[0u8; 16]; 1];
        let mut pool = PacketPool::new(PoolId::Acl, &mut slots);

        let mut packet = pool.allocate().unwrap();
        packet.write(&[1, 2, 3]).unwrap();
        packet.flip();
        pool.deallocate(packet).unwrap();

        let packet = pool.allocate().unwrap();
        assert_eq!(packet.position(), 0);
        assert_eq!(packet.limit(), 16);
        assert_eq!(packet.capacity(), 16);
        assert_eq!(packet.origin(), PoolId::Acl);
    }

    #[test]
    fn test_foreign_packet_is_refused() {
        let mut storage = [0u8; 4];
        let mut command_slots = [[0u8; 4]; 1];
        let mut acl_slots = [[0u8; 4]; 1];
        let mut command = PacketPool::new(PoolId::Command, &mut command_slots);
        let mut acl = PacketPool::new(PoolId::Acl, &mut acl_slots);

        let packet = acl.allocate().unwrap();
        let packet = command.deallocate(packet).unwrap_err();
        assert_eq!(command.available(), 1);
        acl.deallocate(packet).unwrap();
        assert_eq!(acl.available(), 1);

        assert!(command.deallocate(Packet::unpooled(&mut storage)).is_err());
    }

    #[test]
    fn test_free_count_moves_by_one() {
        let mut slots = [[0u8; 4]; 4];
        let mut pool = PacketPool::new(PoolId::Command, &mut slots);
        let mut held: heapless::Vec<Packet<'_>, 4> = heapless::Vec::new();

        for expected in (0..4).rev() {
            held.push(pool.allocate().unwrap()).unwrap();
            assert_eq!(pool.available(), expected);
        }
        for expected in 1..=4 {
            pool.deallocate(held.pop().unwrap()).unwrap();
            assert_eq!(pool.available(), expected);
        }
    }

    #[test]
    fn test_count_is_conserved_across_queue_moves() {
        let mut storage = PacketStorage::new();
        let mut pools = PacketPools::new(&mut storage);
        let mut queue: heapless::Deque<Packet<'_>, 8> = heapless::Deque::new();

        for _ in 0..3 {
            let packet = pools.allocate(PoolId::Acl).unwrap();
            queue.push_back(packet).unwrap();
            assert_eq!(
                pools.available(PoolId::Acl) + queue.len(),
                pools.capacity(PoolId::Acl)
            );
        }
        while let Some(packet) = queue.pop_front() {
            pools.deallocate(packet).unwrap();
            assert_eq!(
                pools.available(PoolId::Acl) + queue.len(),
                pools.capacity(PoolId::Acl)
            );
        }
    }

    #[test]
    fn test_standard_pools_geometry() {
        let mut storage = PacketStorage::new();
        let mut pools = PacketPools::new(&mut storage);

        let event = pools.allocate(PoolId::Command).unwrap();
        let acl = pools.allocate(PoolId::Acl).unwrap();
        assert_eq!(event.capacity(), COMMAND_PACKET_SIZE);
        assert_eq!(acl.capacity(), ACL_PACKET_SIZE);
        assert!(pools.allocate(PoolId::Unpooled).is_none());

        pools.deallocate(event).unwrap();
        pools.deallocate(acl).unwrap();
        assert_eq!(pools.available(PoolId::Command), pools.capacity(PoolId::Command));
    }

    #[test]
    fn test_refcell_allocator_releases() {
        let mut storage = PacketStorage::new();
        let pools = core::cell::RefCell::new(PacketPools::new(&mut storage));

        let packet = PacketAllocator::allocate(&pools, PoolId::Command).unwrap();
        assert_eq!(pools.borrow().available(PoolId::Command), 3);
        pools.release(packet);
        assert_eq!(pools.borrow().available(PoolId::Command), 4);
    }
}
