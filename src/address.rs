//! Bluetooth device address
//!
//! Addresses travel over HCI least-significant byte first and are shown to people
//! most-significant byte first. [`BluetoothAddress`] stores the wire order; the text
//! conversions reverse it.

use crate::Error;
use core::fmt;

/// A Bluetooth Device Address (`BD_ADDR`) in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BluetoothAddress(pub [u8; 6]);

impl BluetoothAddress {
    /// Create a new Bluetooth address from wire-order bytes
    #[must_use]
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Format the address as a colon-separated hex string, most significant byte first
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        const HEX: [char; 16] = [
            '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F',
        ];
        let mut result = heapless::String::new();
        for (i, byte) in self.0.iter().rev().enumerate() {
            if i > 0 {
                result.push(':').ok();
            }
            result.push(HEX[usize::from(byte >> 4)]).ok();
            result.push(HEX[usize::from(byte & 0x0F)]).ok();
        }
        result
    }

    /// Parse a colon-separated hex string, most significant byte first
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] if the string is not exactly 17 characters
    /// long or contains invalid characters
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        if hex.len() != 17 || !hex.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return Err(Error::InvalidParameter);
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in hex.split(':').enumerate() {
            if i >= 6 || byte.len() != 2 {
                return Err(Error::InvalidParameter);
            }
            bytes[5 - i] = u8::from_str_radix(byte, 16).map_err(|_| Error::InvalidParameter)?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_hex())
    }
}

impl From<[u8; 6]> for BluetoothAddress {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<BluetoothAddress> for [u8; 6] {
    fn from(addr: BluetoothAddress) -> Self {
        addr.0
    }
}

impl From<BluetoothAddress> for bt_hci::param::BdAddr {
    fn from(addr: BluetoothAddress) -> Self {
        bt_hci::param::BdAddr::new(addr.0)
    }
}

impl TryFrom<&str> for BluetoothAddress {
    type Error = Error;

    fn try_from(hex: &str) -> Result<Self, Self::Error> {
        BluetoothAddress::from_hex(hex)
    }
}

impl TryFrom<&[u8]> for BluetoothAddress {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        <[u8; 6]>::try_from(bytes)
            .map(Self)
            .map_err(|_| Error::InvalidParameter)
    }
}

impl TryFrom<bt_hci::param::BdAddr> for BluetoothAddress {
    type Error = Error;

    fn try_from(bd_addr: bt_hci::param::BdAddr) -> Result<Self, Self::Error> {
        bd_addr.raw().try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    #[test]
    fn test_format_is_most_significant_first() {
        let addr = BluetoothAddress::new([0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(addr.format_hex().as_str(), "12:34:56:78:9A:BC");

        let mut shown: heapless::String<17> = heapless::String::new();
        write!(shown, "{addr}").unwrap();
        assert_eq!(shown.as_str(), "12:34:56:78:9A:BC");
    }

    #[test]
    fn test_format_hex_edge_cases() {
        let addr_zero = BluetoothAddress::new([0x00; 6]);
        assert_eq!(addr_zero.format_hex().as_str(), "00:00:00:00:00:00");

        let addr_max = BluetoothAddress::new([0xFF; 6]);
        assert_eq!(addr_max.format_hex().as_str(), "FF:FF:FF:FF:FF:FF");
    }

    #[test]
    fn test_parse_reverses_into_wire_order() {
        let addr = BluetoothAddress::from_hex("0A:B1:2C:D3:4E:F5").unwrap();
        assert_eq!(addr.as_bytes(), &[0xF5, 0x4E, 0xD3, 0x2C, 0xB1, 0x0A]);
        assert_eq!(addr.format_hex().as_str(), "0A:B1:2C:D3:4E:F5");

        assert_eq!(
            BluetoothAddress::from_hex("0A:B1:2C:D3:4E"),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            BluetoothAddress::from_hex("0A:B1:2C:D3:4E:G5"),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            BluetoothAddress::from_hex("0AB:1:2C:D3:4E:F5"),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn test_conversions() {
        let bytes = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];

        let addr: BluetoothAddress = bytes.into();
        assert_eq!(addr.as_bytes(), &bytes);

        let converted_bytes: [u8; 6] = addr.into();
        assert_eq!(converted_bytes, bytes);

        let bd_addr: bt_hci::param::BdAddr = addr.into();
        assert_eq!(bd_addr.raw(), bytes);
        assert_eq!(BluetoothAddress::try_from(bd_addr), Ok(addr));
    }

    #[test]
    fn test_try_from_slice() {
        let bytes = &[0x12u8, 0x34, 0x56, 0x78, 0x9A, 0xBC][..];
        let addr = BluetoothAddress::try_from(bytes).unwrap();
        assert_eq!(addr.as_bytes(), &[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);

        assert!(BluetoothAddress::try_from(&bytes[..3]).is_err());
        assert!(BluetoothAddress::try_from(&[0u8; 8][..]).is_err());
    }
}
