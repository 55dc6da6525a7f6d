//! GATT database construction
//!
//! Helpers that lay out services and characteristics in an [`AttributeTable`] the way
//! GATT expects: a service declaration followed by its characteristics, each a
//! declaration attribute followed by the value attribute. The mandatory GAP and GATT
//! services are provided ready-made.

use crate::Error;
use crate::att::{AttributeKind, AttributeTable, AttributeValue};
use crate::constants::MAX_ATTRIBUTES;
use crate::uuid::Uuid;
use core::ops::BitOr;

/// Assigned numbers used by the built-in services
pub mod uuids {
    use crate::uuid::Uuid;

    /// Primary Service declaration
    pub const PRIMARY_SERVICE: Uuid = Uuid::from_u16(0x2800);
    /// Secondary Service declaration
    pub const SECONDARY_SERVICE: Uuid = Uuid::from_u16(0x2801);
    /// Characteristic declaration
    pub const CHARACTERISTIC: Uuid = Uuid::from_u16(0x2803);
    /// Generic Access service
    pub const GENERIC_ACCESS: Uuid = Uuid::from_u16(0x1800);
    /// Generic Attribute service
    pub const GENERIC_ATTRIBUTE: Uuid = Uuid::from_u16(0x1801);
    /// Device Name characteristic
    pub const DEVICE_NAME: Uuid = Uuid::from_u16(0x2A00);
    /// Appearance characteristic
    pub const APPEARANCE: Uuid = Uuid::from_u16(0x2A01);
    /// Service Changed characteristic
    pub const SERVICE_CHANGED: Uuid = Uuid::from_u16(0x2A05);
}

/// Characteristic property bits, as carried in the declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    /// Value may be broadcast
    pub const BROADCAST: Self = Self(0x01);
    /// Value may be read
    pub const READ: Self = Self(0x02);
    /// Value may be written without response
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    /// Value may be written
    pub const WRITE: Self = Self(0x08);
    /// Value changes are notified
    pub const NOTIFY: Self = Self(0x10);
    /// Value changes are indicated
    pub const INDICATE: Self = Self(0x20);

    /// Raw bit field
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True if every bit of `other` is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Handles allocated for one characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicHandles {
    /// Characteristic declaration
    pub declaration: u16,
    /// Characteristic value
    pub value: u16,
}

/// Handles of the Generic Access service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GapService {
    /// Service declaration
    pub service: u16,
    /// Device Name characteristic
    pub device_name: CharacteristicHandles,
    /// Appearance characteristic, if registered
    pub appearance: Option<CharacteristicHandles>,
}

/// Handles of the Generic Attribute service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GattService {
    /// Service declaration
    pub service: u16,
    /// Service Changed characteristic
    pub service_changed: CharacteristicHandles,
}

/// Open a primary service. Its group ends at the service handle until
/// [`finish_service`] is called.
///
/// # Errors
/// Returns [`Error::TableFull`] when the table is full.
pub fn add_primary_service(
    table: &mut AttributeTable<'_>,
    uuid: impl Into<Uuid>,
) -> Result<u16, Error> {
    add_service(table, uuids::PRIMARY_SERVICE, uuid.into())
}

/// Open a secondary service.
///
/// # Errors
/// Returns [`Error::TableFull`] when the table is full.
pub fn add_secondary_service(
    table: &mut AttributeTable<'_>,
    uuid: impl Into<Uuid>,
) -> Result<u16, Error> {
    add_service(table, uuids::SECONDARY_SERVICE, uuid.into())
}

fn add_service(
    table: &mut AttributeTable<'_>,
    declaration: Uuid,
    uuid: Uuid,
) -> Result<u16, Error> {
    let value = AttributeValue::inline(uuid.wire_bytes())?;
    let handle = table.next_handle();
    table.push(declaration, value, AttributeKind::Service { group_end: handle })
}

/// Close the service opened at `service`: its group now covers every attribute
/// added since.
///
/// # Errors
/// Returns [`Error::InvalidHandle`] if `service` is not a service declaration.
pub fn finish_service(table: &mut AttributeTable<'_>, service: u16) -> Result<(), Error> {
    match table.get(service).map(|attribute| attribute.kind()) {
        Some(AttributeKind::Service { .. }) => {
            let group_end = table.last_handle();
            table.set_kind(service, AttributeKind::Service { group_end })
        }
        _ => Err(Error::InvalidHandle),
    }
}

/// Add a characteristic declaration and its value attribute.
///
/// # Errors
/// Returns [`Error::TableFull`] if the table cannot hold both attributes.
pub fn add_characteristic<'d>(
    table: &mut AttributeTable<'d>,
    uuid: impl Into<Uuid>,
    properties: CharacteristicProperties,
    value: impl Into<AttributeValue<'d>>,
) -> Result<CharacteristicHandles, Error> {
    // declaration and value go in together or not at all
    if table.len() + 2 > MAX_ATTRIBUTES {
        return Err(Error::TableFull);
    }
    let uuid = uuid.into();
    let declaration = table.next_handle();
    let value_handle = declaration + 1;

    let uuid_bytes = uuid.wire_bytes();
    let length = 3 + uuid_bytes.len();
    let mut bytes = [0u8; 3 + Uuid::LONG_SIZE];
    bytes[0] = properties.bits();
    bytes[1..3].copy_from_slice(&value_handle.to_le_bytes());
    bytes[3..length].copy_from_slice(uuid_bytes);

    table.push(
        uuids::CHARACTERISTIC,
        AttributeValue::inline(&bytes[..length])?,
        AttributeKind::CharacteristicDeclaration { value_handle },
    )?;
    let value = table.add_value(uuid, value)?;
    Ok(CharacteristicHandles {
        declaration,
        value,
    })
}

/// Register the Generic Access service with the device name and, optionally, the
/// appearance.
///
/// # Errors
/// Returns [`Error::TableFull`] when the table is full.
pub fn add_gap_service<'d>(
    table: &mut AttributeTable<'d>,
    device_name: &'d str,
    appearance: Option<u16>,
) -> Result<GapService, Error> {
    let service = add_primary_service(table, uuids::GENERIC_ACCESS)?;
    let device_name = add_characteristic(
        table,
        uuids::DEVICE_NAME,
        CharacteristicProperties::READ,
        device_name,
    )?;
    let appearance = appearance
        .map(|appearance| {
            add_characteristic(
                table,
                uuids::APPEARANCE,
                CharacteristicProperties::READ,
                appearance,
            )
        })
        .transpose()?;
    finish_service(table, service)?;

    Ok(GapService {
        service,
        device_name,
        appearance,
    })
}

/// Register the Generic Attribute service with its Service Changed characteristic,
/// covering the whole handle range.
///
/// # Errors
/// Returns [`Error::TableFull`] when the table is full.
pub fn add_gatt_service(table: &mut AttributeTable<'_>) -> Result<GattService, Error> {
    let service = add_primary_service(table, uuids::GENERIC_ATTRIBUTE)?;
    let service_changed = add_characteristic(
        table,
        uuids::SERVICE_CHANGED,
        CharacteristicProperties::INDICATE,
        AttributeValue::inline(&[0x01, 0x00, 0xFF, 0xFF])?,
    )?;
    finish_service(table, service)?;

    Ok(GattService {
        service,
        service_changed,
    })
}
