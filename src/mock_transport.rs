//! Scripted byte-stream halves for driving the transport in tests.

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use embedded_io_async::{ErrorType, Read, Write};

/// Yields `bytes` in small chunks, then reports end of stream (or never returns).
pub(crate) struct MockReader<'b> {
    bytes: &'b [u8],
    chunk: usize,
    hang_when_drained: bool,
}

impl<'b> MockReader<'b> {
    pub(crate) fn new(bytes: &'b [u8]) -> Self {
        Self {
            bytes,
            chunk: 3,
            hang_when_drained: false,
        }
    }

    /// Delivers `bytes`, then blocks forever instead of reporting end of stream.
    pub(crate) fn hanging(bytes: &'b [u8]) -> Self {
        Self {
            hang_when_drained: true,
            ..Self::new(bytes)
        }
    }

    pub(crate) fn pending() -> Self {
        Self::hanging(&[])
    }
}

impl ErrorType for MockReader<'_> {
    type Error = Infallible;
}

impl Read for MockReader<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.bytes.is_empty() {
            if self.hang_when_drained {
                core::future::pending::<()>().await;
            }
            return Ok(0);
        }
        let n = buf.len().min(self.bytes.len()).min(self.chunk);
        buf[..n].copy_from_slice(&self.bytes[..n]);
        self.bytes = &self.bytes[n..];
        embassy_futures::yield_now().await;
        Ok(n)
    }
}

/// Records everything written; each write yields once so overlapping writes would show.
pub(crate) struct MockWriter {
    bytes: RefCell<heapless::Vec<u8, 1024>>,
    writes: Cell<usize>,
    active: Cell<usize>,
    max_active: Cell<usize>,
}

impl MockWriter {
    pub(crate) fn new() -> Self {
        Self {
            bytes: RefCell::new(heapless::Vec::new()),
            writes: Cell::new(0),
            active: Cell::new(0),
            max_active: Cell::new(0),
        }
    }

    pub(crate) fn bytes(&self) -> heapless::Vec<u8, 1024> {
        self.bytes.borrow().clone()
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.get()
    }

    pub(crate) fn max_concurrent_writes(&self) -> usize {
        self.max_active.get()
    }
}

impl ErrorType for &MockWriter {
    type Error = Infallible;
}

impl Write for &MockWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.active.set(self.active.get() + 1);
        self.max_active
            .set(self.max_active.get().max(self.active.get()));
        embassy_futures::yield_now().await;
        self.bytes.borrow_mut().extend_from_slice(buf).unwrap();
        self.writes.set(self.writes.get() + 1);
        self.active.set(self.active.get() - 1);
        Ok(buf.len())
    }
}
