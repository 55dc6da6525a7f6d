//! ATT (Attribute Protocol) Server
//!
//! The attribute protocol gives a client request/response access to a table of
//! attributes, each addressed by a 16-bit handle and typed by a UUID. This module holds
//! the table ([`AttributeTable`]) and the request transducer ([`AttServer`]) that turns
//! one request PDU into one response PDU.

mod attribute;
mod server;

pub use attribute::{Attribute, AttributeKind, AttributeTable, AttributeValue};
pub use server::AttServer;

/// ATT PDU opcodes
pub mod opcode {
    /// Error Response
    pub const ERROR_RSP: u8 = 0x01;
    /// Exchange MTU Request
    pub const EXCHANGE_MTU_REQ: u8 = 0x02;
    /// Exchange MTU Response
    pub const EXCHANGE_MTU_RSP: u8 = 0x03;
    /// Find Information Request
    pub const FIND_INFORMATION_REQ: u8 = 0x04;
    /// Find Information Response
    pub const FIND_INFORMATION_RSP: u8 = 0x05;
    /// Find By Type Value Request
    pub const FIND_BY_TYPE_VALUE_REQ: u8 = 0x06;
    /// Find By Type Value Response
    pub const FIND_BY_TYPE_VALUE_RSP: u8 = 0x07;
    /// Read By Type Request
    pub const READ_BY_TYPE_REQ: u8 = 0x08;
    /// Read By Type Response
    pub const READ_BY_TYPE_RSP: u8 = 0x09;
    /// Read Request
    pub const READ_REQ: u8 = 0x0A;
    /// Read Response
    pub const READ_RSP: u8 = 0x0B;
    /// Read Blob Request
    pub const READ_BLOB_REQ: u8 = 0x0C;
    /// Read Blob Response
    pub const READ_BLOB_RSP: u8 = 0x0D;
    /// Read By Group Type Request
    pub const READ_BY_GROUP_TYPE_REQ: u8 = 0x10;
    /// Read By Group Type Response
    pub const READ_BY_GROUP_TYPE_RSP: u8 = 0x11;
    /// Handle Value Confirmation
    pub const HANDLE_VALUE_CFM: u8 = 0x1E;

    /// Set on opcodes that are commands (no response expected)
    pub const COMMAND_FLAG: u8 = 0x40;
}

/// Error codes carried in an ATT Error Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AttErrorCode {
    /// The handle is 0, past the table, or the range is inverted
    InvalidHandle = 0x01,
    /// The request is malformed
    InvalidPdu = 0x04,
    /// The server does not implement the request
    RequestNotSupported = 0x06,
    /// The blob offset lies past the end of the value
    InvalidOffset = 0x07,
    /// Nothing in the range matched
    AttributeNotFound = 0x0A,
    /// The value fits in a single Read Response
    AttributeNotLong = 0x0B,
    /// The type in a Read By Group Type request is not a grouping type
    UnsupportedGroupType = 0x10,
    /// No buffer was available to build the response
    InsufficientResources = 0x11,
}

/// GATT declaration types that may be used in Read By Group Type
#[must_use]
pub fn is_grouping_type(uuid: crate::uuid::Uuid) -> bool {
    uuid == crate::gatt::uuids::PRIMARY_SERVICE || uuid == crate::gatt::uuids::SECONDARY_SERVICE
}
