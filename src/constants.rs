//! `Gattbird` Constants
//!
//! This module contains the limits, pool geometry and Bluetooth wire constants used
//! throughout the `Gattbird` library. Opcode and event tables live next to the code
//! that decodes them (see [`crate::hci`] and [`crate::att`]).

/// Size of one command/event pool slot (indicator + 3-byte header + 255 parameter bytes)
pub const COMMAND_PACKET_SIZE: usize = 259;

/// Number of slots in the command/event pool
pub const COMMAND_PACKET_COUNT: usize = 4;

/// Size of one ACL pool slot
pub const ACL_PACKET_SIZE: usize = 1000;

/// Number of slots in the ACL pool
pub const ACL_PACKET_COUNT: usize = 4;

/// Depth of the queue between the H4 receiver and the host controller
pub const RECEIVE_QUEUE_DEPTH: usize = COMMAND_PACKET_COUNT + ACL_PACKET_COUNT;

/// Depth of the pending-transmit queue
pub const TRANSMIT_QUEUE_DEPTH: usize = COMMAND_PACKET_COUNT + ACL_PACKET_COUNT;

/// Scratch space used to swallow frames that could not be buffered
pub const DISCARD_CHUNK_SIZE: usize = 32;

/// H4 indicator size
pub const INDICATOR_SIZE: usize = 1;

/// Indicator + opcode + parameter length
pub const COMMAND_HEADER_SIZE: usize = 4;

/// Indicator + event code + parameter length
pub const EVENT_HEADER_SIZE: usize = 3;

/// Indicator + handle/flags + data total length
pub const ACL_HEADER_SIZE: usize = 5;

/// ACL header + L2CAP length + channel id
pub const L2CAP_HEADER_SIZE: usize = 9;

/// Default and minimum ATT MTU for LE
pub const ATT_DEFAULT_MTU: u16 = 23;

/// Maximum number of attributes in one attribute table
pub const MAX_ATTRIBUTES: usize = 32;

/// Largest attribute value stored inline (characteristic declaration with a 128-bit UUID)
pub const INLINE_VALUE_SIZE: usize = 19;

/// Maximum number of registered L2CAP channels
pub const MAX_L2CAP_CHANNELS: usize = 4;

/// Maximum number of simultaneous LE connections tracked
pub const MAX_CONNECTIONS: usize = 4;

/// Highest valid connection handle
pub const MAX_CONNECTION_HANDLE: u16 = 0x0EFF;

/// `BD_ADDR` length in bytes
pub const BD_ADDR_LENGTH: usize = 6;

/// Page timeout unit in microseconds
pub const PAGE_TIMEOUT_UNIT_US: u32 = 625;
