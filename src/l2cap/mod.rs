//! L2CAP (Logical Link Control and Adaptation Protocol) Implementation
//!
//! On an LE link L2CAP multiplexes the attribute protocol, the LE signaling channel and
//! the Security Manager over fixed channel identifiers. Frames are routed to the
//! registered [`Channel`] by identifier; unknown identifiers are logged and dropped.

pub mod channel;
pub mod packet;

pub use channel::{Channel, ChannelKind, ChannelRegistry};
pub use packet::{ChannelId, L2capHeader, cid};
