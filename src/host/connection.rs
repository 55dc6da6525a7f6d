//! LE connection bookkeeping

use crate::BluetoothAddress;
use crate::Error;
use crate::constants::{MAX_CONNECTION_HANDLE, MAX_CONNECTIONS};
use bt_hci::param::{AddrKind, ConnHandle, LeConnRole};
use heapless::FnvIndexMap;

/// One LE connection, as reported by LE Connection Complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Connection {
    /// Connection handle
    pub handle: ConnHandle,
    /// Local role
    pub role: LeConnRole,
    /// Peer address type
    pub peer_address_kind: AddrKind,
    /// Peer address
    pub peer_address: BluetoothAddress,
    /// Connection interval in 1.25 ms units
    pub interval: u16,
    /// Peripheral latency in connection events
    pub latency: u16,
    /// Supervision timeout in 10 ms units
    pub supervision_timeout: u16,
    /// Packets the controller reported as completed on this connection
    pub completed_packets: u32,
}

/// Open connections keyed by handle
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: FnvIndexMap<u16, Connection, MAX_CONNECTIONS>,
}

impl ConnectionTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: FnvIndexMap::new(),
        }
    }

    /// Record a new connection, replacing a stale entry with the same handle
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for handles above 0x0EFF and
    /// [`Error::TableFull`] when `MAX_CONNECTIONS` are open.
    pub fn insert(&mut self, connection: Connection) -> Result<(), Error> {
        let handle = connection.handle.raw();
        if handle > MAX_CONNECTION_HANDLE {
            return Err(Error::InvalidHandle);
        }
        self.connections
            .insert(handle, connection)
            .map(|_| ())
            .map_err(|_| Error::TableFull)
    }

    /// Forget a connection
    pub fn remove(&mut self, handle: ConnHandle) -> Option<Connection> {
        self.connections.remove(&handle.raw())
    }

    /// Look up a connection
    #[must_use]
    pub fn get(&self, handle: ConnHandle) -> Option<&Connection> {
        self.connections.get(&handle.raw())
    }

    /// Add `count` to the completed packet total of `handle`; false if unknown
    pub fn record_completed(&mut self, handle: ConnHandle, count: u16) -> bool {
        match self.connections.get_mut(&handle.raw()) {
            Some(connection) => {
                connection.completed_packets =
                    connection.completed_packets.saturating_add(u32::from(count));
                true
            }
            None => false,
        }
    }

    /// Number of open connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True if nothing is connected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Iterate over open connections
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(handle: u16) -> Connection {
        Connection {
            handle: ConnHandle::new(handle),
            role: LeConnRole::Peripheral,
            peer_address_kind: AddrKind::RANDOM,
            peer_address: BluetoothAddress::new([1, 2, 3, 4, 5, 0xC6]),
            interval: 24,
            latency: 0,
            supervision_timeout: 72,
            completed_packets: 0,
        }
    }

    #[test]
    fn test_insert_and_remove() {
        let mut table = ConnectionTable::new();
        let handle = ConnHandle::new(0x0040);
        table.insert(connection(0x0040)).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(handle).unwrap().handle, handle);

        assert!(table.remove(handle).is_some());
        assert!(table.remove(handle).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_limits() {
        let mut table = ConnectionTable::new();
        for handle in 0..MAX_CONNECTIONS as u16 {
            table.insert(connection(handle)).unwrap();
        }
        assert_eq!(table.insert(connection(0x0100)), Err(Error::TableFull));
        // same handle replaces
        table.insert(connection(0)).unwrap();
        assert_eq!(table.len(), MAX_CONNECTIONS);
        assert_eq!(table.iter().count(), MAX_CONNECTIONS);
    }

    #[test]
    fn test_completed_packets_accumulate() {
        let mut table = ConnectionTable::new();
        let handle = ConnHandle::new(0x0001);
        table.insert(connection(0x0001)).unwrap();
        assert!(table.record_completed(handle, 2));
        assert!(table.record_completed(handle, 3));
        assert!(!table.record_completed(ConnHandle::new(0x0002), 1));
        assert_eq!(table.get(handle).unwrap().completed_packets, 5);
    }
}
