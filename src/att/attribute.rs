//! Attribute table
//!
//! A flat table of attributes. Handles are assigned in insertion order starting at 1
//! and never reused; handle 0 means "none". Values are either borrowed for the life of
//! the table or stored inline when they are computed at build time (declarations,
//! small scalars).

use crate::Error;
use crate::constants::{INLINE_VALUE_SIZE, MAX_ATTRIBUTES};
use crate::uuid::Uuid;
use heapless::Vec;

/// Storage for an attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue<'d> {
    /// Borrowed bytes
    Borrowed(&'d [u8]),
    /// Small value stored in the table
    Inline(Vec<u8, INLINE_VALUE_SIZE>),
}

impl AttributeValue<'_> {
    /// Value bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Borrowed(bytes) => bytes,
            Self::Inline(bytes) => bytes,
        }
    }

    /// Copy `bytes` inline.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] if `bytes` is longer than the inline capacity.
    pub fn inline(bytes: &[u8]) -> Result<Self, Error> {
        Vec::from_slice(bytes)
            .map(Self::Inline)
            .map_err(|()| Error::InvalidParameter)
    }
}

impl<'d> From<&'d [u8]> for AttributeValue<'d> {
    fn from(bytes: &'d [u8]) -> Self {
        Self::Borrowed(bytes)
    }
}

impl<'d, const N: usize> From<&'d [u8; N]> for AttributeValue<'d> {
    fn from(bytes: &'d [u8; N]) -> Self {
        Self::Borrowed(bytes)
    }
}

impl<'d> From<&'d str> for AttributeValue<'d> {
    fn from(text: &'d str) -> Self {
        Self::Borrowed(text.as_bytes())
    }
}

impl From<u16> for AttributeValue<'_> {
    fn from(value: u16) -> Self {
        let mut bytes = Vec::new();
        // two bytes always fit
        let _ = bytes.extend_from_slice(&value.to_le_bytes());
        Self::Inline(bytes)
    }
}

/// What an attribute is, beyond its type and value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttributeKind {
    /// Plain value
    Value,
    /// Service declaration spanning the handles up to `group_end`
    Service {
        /// Last handle belonging to the service
        group_end: u16,
    },
    /// Characteristic declaration pointing at its value attribute
    CharacteristicDeclaration {
        /// Handle of the characteristic value
        value_handle: u16,
    },
}

/// One attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute<'d> {
    handle: u16,
    uuid: Uuid,
    value: AttributeValue<'d>,
    kind: AttributeKind,
}

impl<'d> Attribute<'d> {
    /// Handle
    #[must_use]
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// Attribute type
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Value bytes
    #[must_use]
    pub fn value(&self) -> &[u8] {
        self.value.as_bytes()
    }

    /// Kind
    #[must_use]
    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    /// Last handle of the group this attribute starts; its own handle unless it is a
    /// service declaration
    #[must_use]
    pub fn group_end(&self) -> u16 {
        match self.kind {
            AttributeKind::Service { group_end } => group_end,
            _ => self.handle,
        }
    }
}

/// Handle-indexed attribute table
#[derive(Debug, Default)]
pub struct AttributeTable<'d> {
    attributes: Vec<Attribute<'d>, MAX_ATTRIBUTES>,
}

impl<'d> AttributeTable<'d> {
    /// Empty table
    #[must_use]
    pub const fn new() -> Self {
        Self {
            attributes: Vec::new(),
        }
    }

    /// Append an attribute and return its handle.
    ///
    /// # Errors
    /// Returns [`Error::TableFull`] when `MAX_ATTRIBUTES` are registered.
    pub fn push(
        &mut self,
        uuid: Uuid,
        value: impl Into<AttributeValue<'d>>,
        kind: AttributeKind,
    ) -> Result<u16, Error> {
        let handle = self.next_handle();
        self.attributes
            .push(Attribute {
                handle,
                uuid,
                value: value.into(),
                kind,
            })
            .map_err(|_| Error::TableFull)?;
        Ok(handle)
    }

    /// Append a plain value attribute.
    ///
    /// # Errors
    /// Returns [`Error::TableFull`] when the table is full.
    pub fn add_value(
        &mut self,
        uuid: impl Into<Uuid>,
        value: impl Into<AttributeValue<'d>>,
    ) -> Result<u16, Error> {
        self.push(uuid.into(), value, AttributeKind::Value)
    }

    /// Handle the next attribute will get
    #[must_use]
    pub fn next_handle(&self) -> u16 {
        self.last_handle() + 1
    }

    /// Highest handle in use, 0 when empty
    #[must_use]
    pub fn last_handle(&self) -> u16 {
        // MAX_ATTRIBUTES is far below u16::MAX
        self.attributes.len() as u16
    }

    /// Number of attributes
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// True when no attribute is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Look up a handle; `None` for 0 and for handles past the table
    #[must_use]
    pub fn get(&self, handle: u16) -> Option<&Attribute<'d>> {
        let index = usize::from(handle).checked_sub(1)?;
        self.attributes.get(index)
    }

    /// Attributes with handles in `start..=end`
    pub fn range(&self, start: u16, end: u16) -> impl Iterator<Item = &Attribute<'d>> {
        let first = usize::from(start.max(1)) - 1;
        let last = usize::from(end).min(self.attributes.len());
        self.attributes
            .get(first..last)
            .unwrap_or_default()
            .iter()
    }

    /// First attribute of type `uuid` in `start..=end`
    #[must_use]
    pub fn find_by_type(&self, start: u16, end: u16, uuid: Uuid) -> Option<&Attribute<'d>> {
        self.range(start, end).find(|attribute| attribute.uuid == uuid)
    }

    /// First attribute of type `uuid` whose value equals `value` in `start..=end`
    #[must_use]
    pub fn find_by_type_value(
        &self,
        start: u16,
        end: u16,
        uuid: Uuid,
        value: &[u8],
    ) -> Option<&Attribute<'d>> {
        self.range(start, end)
            .find(|attribute| attribute.uuid == uuid && attribute.value() == value)
    }

    /// Replace the value of an existing attribute.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] if `handle` is not in the table.
    pub fn set_value(
        &mut self,
        handle: u16,
        value: impl Into<AttributeValue<'d>>,
    ) -> Result<(), Error> {
        let index = usize::from(handle)
            .checked_sub(1)
            .ok_or(Error::InvalidHandle)?;
        let attribute = self
            .attributes
            .get_mut(index)
            .ok_or(Error::InvalidHandle)?;
        attribute.value = value.into();
        Ok(())
    }

    pub(crate) fn set_kind(&mut self, handle: u16, kind: AttributeKind) -> Result<(), Error> {
        let index = usize::from(handle)
            .checked_sub(1)
            .ok_or(Error::InvalidHandle)?;
        let attribute = self
            .attributes
            .get_mut(index)
            .ok_or(Error::InvalidHandle)?;
        attribute.kind = kind;
        Ok(())
    }
}
