//! Flip Buffer
//!
//! A cursor over borrowed byte storage with a `position` (read/write cursor) and a
//! `limit` (end of valid data). Producers write up to the limit, [`FlipBuffer::flip`]
//! turns the written bytes into a readable span starting at 0, and consumers read them
//! back without copying the storage.
//!
//! All multi-byte integers are little-endian, matching the HCI wire format.
//!
//! Invariant: `0 <= position <= limit <= capacity`.

/// Cursor errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
    /// A write would cross the limit
    Overflow,
    /// A read would cross the limit
    Underflow,
    /// Requested position lies beyond the limit
    InvalidPosition,
    /// Requested limit lies beyond the capacity
    InvalidLimit,
}

impl core::fmt::Display for BufferError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Overflow => write!(f, "Write past buffer limit"),
            Self::Underflow => write!(f, "Read past buffer limit"),
            Self::InvalidPosition => write!(f, "Position beyond buffer limit"),
            Self::InvalidLimit => write!(f, "Limit beyond buffer capacity"),
        }
    }
}

/// Byte cursor over borrowed storage
#[derive(Debug)]
pub struct FlipBuffer<'a> {
    storage: &'a mut [u8],
    position: usize,
    limit: usize,
}

impl<'a> FlipBuffer<'a> {
    /// Wrap `storage`; the whole capacity is writable.
    #[must_use]
    pub fn new(storage: &'a mut [u8]) -> Self {
        let limit = storage.len();
        Self {
            storage,
            position: 0,
            limit,
        }
    }

    /// Give the storage back.
    #[must_use]
    pub fn into_inner(self) -> &'a mut [u8] {
        self.storage
    }

    /// Total size of the underlying storage
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Current cursor
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// End of valid data
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes between the cursor and the limit
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// `position = 0`, `limit = capacity`
    pub fn reset(&mut self) {
        self.position = 0;
        self.limit = self.storage.len();
    }

    /// `position = 0`, `limit = limit`
    ///
    /// # Errors
    /// Returns [`BufferError::InvalidLimit`] if `limit` exceeds the capacity.
    pub fn reset_to(&mut self, limit: usize) -> Result<(), BufferError> {
        if limit > self.storage.len() {
            return Err(BufferError::InvalidLimit);
        }
        self.position = 0;
        self.limit = limit;
        Ok(())
    }

    /// Move the limit, pulling the cursor back if it would end up past it.
    ///
    /// # Errors
    /// Returns [`BufferError::InvalidLimit`] if `limit` exceeds the capacity.
    pub fn set_limit(&mut self, limit: usize) -> Result<(), BufferError> {
        if limit > self.storage.len() {
            return Err(BufferError::InvalidLimit);
        }
        self.limit = limit;
        self.position = self.position.min(limit);
        Ok(())
    }

    /// Switch from writing to reading: `limit = position`, `position = 0`.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Read the same data again from the start.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Reposition the cursor.
    ///
    /// # Errors
    /// Returns [`BufferError::InvalidPosition`] if `position` is past the limit.
    pub fn seek(&mut self, position: usize) -> Result<(), BufferError> {
        if position > self.limit {
            return Err(BufferError::InvalidPosition);
        }
        self.position = position;
        Ok(())
    }

    /// Advance the cursor without copying.
    ///
    /// # Errors
    /// Returns [`BufferError::Underflow`] if fewer than `count` bytes remain.
    pub fn skip(&mut self, count: usize) -> Result<(), BufferError> {
        if count > self.remaining() {
            return Err(BufferError::Underflow);
        }
        self.position += count;
        Ok(())
    }

    /// Move the cursor to the limit, as after a reader filled every byte up to it.
    pub fn advance_to_limit(&mut self) {
        self.position = self.limit;
    }

    /// Copy `bytes` in at the cursor.
    ///
    /// # Errors
    /// Returns [`BufferError::Overflow`] if `bytes` does not fit before the limit.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if bytes.len() > self.remaining() {
            return Err(BufferError::Overflow);
        }
        self.storage[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }

    /// Write one byte.
    ///
    /// # Errors
    /// Returns [`BufferError::Overflow`] at the limit.
    pub fn write_u8(&mut self, value: u8) -> Result<(), BufferError> {
        self.write(&[value])
    }

    /// Write a little-endian `u16`.
    ///
    /// # Errors
    /// Returns [`BufferError::Overflow`] if fewer than two bytes remain.
    pub fn write_u16(&mut self, value: u16) -> Result<(), BufferError> {
        self.write(&value.to_le_bytes())
    }

    /// Write a little-endian `u32`.
    ///
    /// # Errors
    /// Returns [`BufferError::Overflow`] if fewer than four bytes remain.
    pub fn write_u32(&mut self, value: u32) -> Result<(), BufferError> {
        self.write(&value.to_le_bytes())
    }

    /// Copy `out.len()` bytes out of the buffer.
    ///
    /// # Errors
    /// Returns [`BufferError::Underflow`] if not enough bytes remain.
    pub fn read(&mut self, out: &mut [u8]) -> Result<(), BufferError> {
        let bytes = self.take(out.len())?;
        out.copy_from_slice(bytes);
        Ok(())
    }

    /// Borrow the next `count` bytes and advance past them.
    ///
    /// # Errors
    /// Returns [`BufferError::Underflow`] if fewer than `count` bytes remain.
    pub fn take(&mut self, count: usize) -> Result<&[u8], BufferError> {
        if count > self.remaining() {
            return Err(BufferError::Underflow);
        }
        let start = self.position;
        self.position += count;
        Ok(&self.storage[start..start + count])
    }

    /// Read one byte.
    ///
    /// # Errors
    /// Returns [`BufferError::Underflow`] at the limit.
    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        let mut bytes = [0u8; 1];
        self.read(&mut bytes)?;
        Ok(bytes[0])
    }

    /// Read a little-endian `u16`.
    ///
    /// # Errors
    /// Returns [`BufferError::Underflow`] if fewer than two bytes remain.
    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        let mut bytes = [0u8; 2];
        self.read(&mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }

    /// Read a little-endian `u32`.
    ///
    /// # Errors
    /// Returns [`BufferError::Underflow`] if fewer than four bytes remain.
    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        let mut bytes = [0u8; 4];
        self.read(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Valid bytes from the cursor to the limit
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.position..self.limit]
    }

    /// Mutable view of the bytes from the cursor to the limit, for filling by a reader
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.position..self.limit]
    }

    /// Bytes from 0 to the limit, regardless of the cursor
    #[must_use]
    pub fn as_written(&self) -> &[u8] {
        &self.storage[..self.limit]
    }

    /// Byte at absolute index `index`, if it lies before the limit
    #[must_use]
    pub fn get(&self, index: usize) -> Option<u8> {
        self.storage[..self.limit].get(index).copied()
    }

    /// Overwrite bytes at an absolute index without moving the cursor.
    ///
    /// # Errors
    /// Returns [`BufferError::Overflow`] if the range ends past the capacity.
    pub fn patch(&mut self, index: usize, bytes: &[u8]) -> Result<(), BufferError> {
        let end = index.checked_add(bytes.len()).ok_or(BufferError::Overflow)?;
        if end > self.storage.len() {
            return Err(BufferError::Overflow);
        }
        self.storage[index..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy `count` bytes at absolute index 0 from `other` without moving either cursor.
    ///
    /// # Errors
    /// Returns [`BufferError::Overflow`] if either buffer is smaller than `count`.
    pub fn copy_prefix_from(&mut self, other: &FlipBuffer<'_>, count: usize) -> Result<(), BufferError> {
        if count > other.storage.len() || count > self.storage.len() {
            return Err(BufferError::Overflow);
        }
        self.storage[..count].copy_from_slice(&other.storage[..count]);
        Ok(())
    }
}
