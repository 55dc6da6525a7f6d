#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(dead_code, clippy::unused_async, clippy::too_many_lines)]

mod fmt;

pub mod acl;
mod address;
pub mod att;
pub mod bts;
pub mod buffer;
pub mod constants;
pub mod gatt;
pub mod h4;
pub mod hci;
pub mod host;
pub mod l2cap;
#[cfg(test)]
mod mock_transport;
pub mod packet;
pub mod pool;
pub mod processor;
pub mod script;
pub mod uuid;

use crate::buffer::BufferError;
use crate::constants::ATT_DEFAULT_MTU;
use crate::h4::RxError;
use crate::pool::PoolId;
use crate::uuid::UuidParseError;
use core::fmt::{Display, Formatter};

pub use address::BluetoothAddress;
pub use att::{AttServer, AttributeTable};
pub use h4::H4;
pub use host::HostController;
pub use packet::Packet;
pub use script::Script;
pub use uuid::Uuid;

/// Errors surfaced by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Cursor error while encoding or decoding a frame
    Buffer(BufferError),
    /// No free packet in the named pool
    PoolExhausted(PoolId),
    /// An indicator byte a controller never sends
    UnexpectedIndicator(u8),
    /// The byte stream failed or ended
    Transport,
    /// A command completion did not arrive in time
    Timeout,
    /// A script or service pack record is damaged
    MalformedScript,
    /// A command is still waiting for its completion
    CommandPending,
    /// A fixed-capacity table is full
    TableFull,
    /// Handle out of range or not of the expected kind
    InvalidHandle,
    /// Invalid parameter provided (e.g., malformed address or oversized value)
    InvalidParameter,
    /// A UUID string is not in canonical form
    InvalidUuid,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Buffer(e) => write!(f, "Buffer error: {e}"),
            Self::PoolExhausted(pool) => write!(f, "Packet pool {pool:?} exhausted"),
            Self::UnexpectedIndicator(byte) => write!(f, "Unexpected H4 indicator {byte:#04x}"),
            Self::Transport => write!(f, "Transport failed"),
            Self::Timeout => write!(f, "Timed out waiting for the controller"),
            Self::MalformedScript => write!(f, "Malformed script"),
            Self::CommandPending => write!(f, "Command still pending"),
            Self::TableFull => write!(f, "Table full"),
            Self::InvalidHandle => write!(f, "Invalid handle"),
            Self::InvalidParameter => write!(f, "Invalid parameter"),
            Self::InvalidUuid => write!(f, "Invalid UUID"),
        }
    }
}

impl From<BufferError> for Error {
    fn from(error: BufferError) -> Self {
        Self::Buffer(error)
    }
}

impl From<RxError> for Error {
    fn from(error: RxError) -> Self {
        match error {
            RxError::UnexpectedIndicator(byte) => Self::UnexpectedIndicator(byte),
        }
    }
}

impl From<UuidParseError> for Error {
    fn from(_: UuidParseError) -> Self {
        Self::InvalidUuid
    }
}

/// Local device information collected from Command Complete events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LocalDeviceInfo {
    /// Local Bluetooth device address
    pub bd_addr: Option<BluetoothAddress>,
    /// HCI version information
    pub hci_version: Option<u8>,
    /// HCI revision
    pub hci_revision: Option<u16>,
    /// LMP version
    pub lmp_version: Option<u8>,
    /// Manufacturer name
    pub manufacturer_name: Option<u16>,
    /// LMP subversion
    pub lmp_subversion: Option<u16>,
    /// Local supported features (8 bytes)
    pub local_features: Option<[u8; 8]>,
    /// ACL data packet length
    pub acl_data_packet_length: Option<u16>,
    /// SCO data packet length
    pub sco_data_packet_length: Option<u8>,
    /// Total number of ACL data packets
    pub total_num_acl_data_packets: Option<u16>,
    /// Total number of SCO data packets
    pub total_num_sco_data_packets: Option<u16>,
    /// LE ACL data packet length
    pub le_acl_data_packet_length: Option<u16>,
    /// Total number of LE ACL data packets
    pub total_num_le_acl_data_packets: Option<u8>,
    /// LE supported states bit field
    pub le_supported_states: Option<[u8; 8]>,
    /// Page timeout in microseconds
    pub page_timeout_us: Option<u32>,
}

/// Options for configuring a [`HostController`]
///
/// # Examples
///
/// ```rust
/// use gattbird::HostOptions;
///
/// // Larger ATT MTU, stay quiet after a disconnection
/// let options = HostOptions {
///     att_mtu: 185,
///     readvertise_on_disconnect: false,
///     ..HostOptions::default()
/// };
/// assert_eq!(options.max_baud_rate, None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HostOptions {
    /// ATT MTU the server can receive
    ///
    /// Values below the protocol minimum of 23 are raised to it.
    pub att_mtu: u16,
    /// Send `LE_Set_Advertise_Enable` when a connection drops
    pub readvertise_on_disconnect: bool,
    /// Upper bound for baud rate changes issued by scripts
    pub max_baud_rate: Option<u32>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            att_mtu: ATT_DEFAULT_MTU,
            readvertise_on_disconnect: true,
            max_baud_rate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_device_info_default() {
        let info = LocalDeviceInfo::default();

        assert_eq!(info.bd_addr, None);
        assert_eq!(info.hci_version, None);
        assert_eq!(info.manufacturer_name, None);
        assert_eq!(info.local_features, None);
        assert_eq!(info.acl_data_packet_length, None);
        assert_eq!(info.le_acl_data_packet_length, None);
        assert_eq!(info.le_supported_states, None);
        assert_eq!(info.page_timeout_us, None);
    }

    #[test]
    fn test_host_options() {
        let options = HostOptions::default();
        assert_eq!(options.att_mtu, 23);
        assert!(options.readvertise_on_disconnect);
        assert_eq!(options.max_baud_rate, None);
    }

    #[test]
    fn test_error_conversions() {
        assert_eq!(
            Error::from(BufferError::Underflow),
            Error::Buffer(BufferError::Underflow)
        );
        assert_eq!(
            Error::from(RxError::UnexpectedIndicator(0x7F)),
            Error::UnexpectedIndicator(0x7F)
        );
        assert_eq!(
            "not-a-uuid".parse::<Uuid>().map_err(Error::from),
            Err(Error::InvalidUuid)
        );
    }

    #[test]
    fn test_error_display() {
        use core::fmt::Write;

        let mut text: heapless::String<64> = heapless::String::new();
        write!(text, "{}", Error::PoolExhausted(PoolId::Acl)).unwrap();
        assert_eq!(text.as_str(), "Packet pool Acl exhausted");

        text.clear();
        write!(text, "{}", Error::Buffer(BufferError::Overflow)).unwrap();
        assert_eq!(text.as_str(), "Buffer error: Write past buffer limit");
    }
}
