//! Bluetooth UUIDs
//!
//! A UUID is stored as 16 bytes in wire (little-endian) order. A 16-bit "short" UUID
//! is the Bluetooth base UUID `0000xxxx-0000-1000-8000-00805F9B34FB` with the short
//! value spliced into bytes 12 and 13.

use core::fmt;
use core::str::FromStr;

/// Bluetooth base UUID in wire order, short value zeroed
const BASE: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset of the short value inside the base UUID
const SHORT_OFFSET: usize = 12;

/// A 128-bit Bluetooth UUID
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uuid([u8; 16]);

/// Error returned when parsing a textual UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UuidParseError;

impl fmt::Display for UuidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed UUID string")
    }
}

impl Uuid {
    /// Width of a short UUID on the wire
    pub const SHORT_SIZE: usize = 2;
    /// Width of a full UUID on the wire
    pub const LONG_SIZE: usize = 16;

    /// Short UUID on the Bluetooth base
    #[must_use]
    pub const fn from_u16(short: u16) -> Self {
        let mut bytes = BASE;
        let le = short.to_le_bytes();
        bytes[SHORT_OFFSET] = le[0];
        bytes[SHORT_OFFSET + 1] = le[1];
        Self(bytes)
    }

    /// Full UUID from wire-order bytes
    #[must_use]
    pub const fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Parse a 2- or 16-byte wire representation.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            Self::SHORT_SIZE => Some(Self::from_u16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            Self::LONG_SIZE => {
                let mut full = [0u8; 16];
                full.copy_from_slice(bytes);
                Some(Self(full))
            }
            _ => None,
        }
    }

    /// Wire-order bytes
    #[must_use]
    pub const fn as_le_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// True if every byte outside the short value matches the base UUID
    #[must_use]
    pub fn is_16bit(&self) -> bool {
        self.0[..SHORT_OFFSET] == BASE[..SHORT_OFFSET]
            && self.0[SHORT_OFFSET + 2..] == BASE[SHORT_OFFSET + 2..]
    }

    /// The short value, if this is a base UUID
    #[must_use]
    pub fn as_u16(&self) -> Option<u16> {
        self.is_16bit()
            .then(|| u16::from_le_bytes([self.0[SHORT_OFFSET], self.0[SHORT_OFFSET + 1]]))
    }

    /// Bytes this UUID occupies in an ATT PDU: 2 for base UUIDs, otherwise 16
    #[must_use]
    pub fn wire_size(&self) -> usize {
        if self.is_16bit() {
            Self::SHORT_SIZE
        } else {
            Self::LONG_SIZE
        }
    }

    /// The compact wire form: two bytes for base UUIDs, otherwise all sixteen
    #[must_use]
    pub fn wire_bytes(&self) -> &[u8] {
        if self.is_16bit() {
            &self.0[SHORT_OFFSET..SHORT_OFFSET + 2]
        } else {
            &self.0
        }
    }
}

impl From<u16> for Uuid {
    fn from(short: u16) -> Self {
        Self::from_u16(short)
    }
}

impl TryFrom<Uuid> for u16 {
    type Error = Uuid;

    fn try_from(uuid: Uuid) -> Result<Self, Self::Error> {
        uuid.as_u16().ok_or(uuid)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl fmt::Display for Uuid {
    /// Canonical dashed form, most significant byte first
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().rev().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u16() {
            Some(short) => write!(f, "Uuid({short:#06x})"),
            None => write!(f, "Uuid({self})"),
        }
    }
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    /// Accepts `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX` in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.as_bytes();
        if text.len() != 36 {
            return Err(UuidParseError);
        }

        let mut bytes = [0u8; 16];
        let mut index = 16;
        let mut digits = text.iter().enumerate().filter_map(|(i, &c)| {
            if matches!(i, 8 | 13 | 18 | 23) {
                None
            } else {
                Some(c)
            }
        });
        for (i, &c) in text.iter().enumerate() {
            if matches!(i, 8 | 13 | 18 | 23) && c != b'-' {
                return Err(UuidParseError);
            }
        }
        while let (Some(hi), Some(lo)) = (digits.next(), digits.next()) {
            index -= 1;
            bytes[index] = (hex_value(hi)? << 4) | hex_value(lo)?;
        }
        Ok(Self(bytes))
    }
}

fn hex_value(c: u8) -> Result<u8, UuidParseError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(UuidParseError),
    }
}
