//! H4 Transport
//!
//! Frames HCI traffic over a UART-style byte stream. The transport owns the packet
//! pools and two queues:
//!
//! * **received**: complete frames assembled by [`H4::run_receiver`], consumed by the
//!   host controller through [`H4::receive`];
//! * **outgoing**: frames queued with [`H4::send`], written one at a time by
//!   [`H4::run_transmitter`]. The next frame is only taken once the previous write and
//!   flush have finished, so exactly one transmission is outstanding and order is kept.
//!
//! The receiver and transmitter loops run concurrently with the host, sharing the
//! transport by reference. The pools sit behind a blocking mutex; the queues are
//! `embassy-sync` channels, so the raw mutex type `M` decides what may run
//! concurrently (`CriticalSectionRawMutex` on target, `NoopRawMutex` in a single
//! executor).
//!
//! # Stopping
//!
//! [`H4::stop`] makes both loops return. The frame being assembled and the frame being
//! written go back to their pools on the way out; [`H4::reset`] then returns anything
//! still queued, so every slot is accounted for exactly once.

mod receiver;

pub use receiver::{Receiver, RxError, RxState, RxStep};

use crate::Error;
use crate::constants::{RECEIVE_QUEUE_DEPTH, TRANSMIT_QUEUE_DEPTH};
use crate::fmt::Bytes;
use crate::packet::Packet;
use crate::pool::{PacketAllocator, PacketPools, PacketStorage, PoolId};
use core::cell::RefCell;
use core::future::poll_fn;
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::signal::Signal;
use embedded_io_async::{Read, Write};

/// H4 framing transport
pub struct H4<'a, M: RawMutex> {
    pools: Mutex<M, RefCell<PacketPools<'a>>>,
    received: Channel<M, Packet<'a>, RECEIVE_QUEUE_DEPTH>,
    outgoing: Channel<M, Packet<'a>, TRANSMIT_QUEUE_DEPTH>,
    stop_rx: Signal<M, ()>,
    stop_tx: Signal<M, ()>,
}

impl<'a, M: RawMutex> H4<'a, M> {
    /// Create a transport whose pools are carved out of `storage`
    #[must_use]
    pub fn new(storage: &'a mut PacketStorage) -> Self {
        Self {
            pools: Mutex::new(RefCell::new(PacketPools::new(storage))),
            received: Channel::new(),
            outgoing: Channel::new(),
            stop_rx: Signal::new(),
            stop_tx: Signal::new(),
        }
    }

    /// Take a packet from pool `id`; `None` when the pool is exhausted.
    pub fn allocate(&self, id: PoolId) -> Option<Packet<'a>> {
        self.pools.lock(|pools| pools.borrow_mut().allocate(id))
    }

    /// Return a packet to its pool.
    pub fn deallocate(&self, packet: Packet<'a>) {
        let refused = self.pools.lock(|pools| pools.borrow_mut().deallocate(packet));
        if let Err(packet) = refused {
            warn!("[H4] packet from {:?} does not belong to a pool", packet.origin());
        }
    }

    /// Free slots in pool `id`
    #[must_use]
    pub fn available(&self, id: PoolId) -> usize {
        self.pools.lock(|pools| pools.borrow().available(id))
    }

    /// Queue a finished frame for transmission.
    pub async fn send(&self, packet: Packet<'a>) {
        self.outgoing.send(packet).await;
    }

    /// Queue a finished frame without waiting.
    ///
    /// # Errors
    /// Hands the packet back if the transmit queue is full.
    pub fn try_send(&self, packet: Packet<'a>) -> Result<(), Packet<'a>> {
        self.outgoing.try_send(packet).map_err(|TrySendError::Full(packet)| packet)
    }

    /// Wait for the next complete frame, flipped for reading.
    pub async fn receive(&self) -> Packet<'a> {
        self.received.receive().await
    }

    /// Next complete frame, if one is queued.
    pub fn try_receive(&self) -> Option<Packet<'a>> {
        self.received.try_receive().ok()
    }

    /// Frames waiting to be written
    #[must_use]
    pub fn pending_transmits(&self) -> usize {
        self.outgoing.len()
    }

    /// Ask the receiver and transmitter loops to return.
    pub fn stop(&self) {
        self.stop_rx.signal(());
        self.stop_tx.signal(());
    }

    /// Return every queued frame to its pool and clear pending stop requests.
    ///
    /// Call once the loops have returned.
    pub fn reset(&self) {
        while let Ok(packet) = self.received.try_receive() {
            self.deallocate(packet);
        }
        while let Ok(packet) = self.outgoing.try_receive() {
            self.deallocate(packet);
        }
        self.stop_rx.reset();
        self.stop_tx.reset();
    }

    /// Assemble frames from `reader` until stopped or the stream fails.
    ///
    /// Unexpected indicators are logged and skipped; the stream is resynchronised on
    /// the next byte.
    ///
    /// # Errors
    /// Returns [`Error::Transport`] if the reader fails or reaches end of stream.
    pub async fn run_receiver<R: Read>(&self, mut reader: R) -> Result<(), Error> {
        let mut receiver = Receiver::new();

        let result = loop {
            let read = select(self.stop_rx.wait(), reader.read_exact(receiver.pending_mut())).await;
            match read {
                Either::First(()) => break Ok(()),
                Either::Second(Err(_)) => {
                    error!("[H4] receive failed in {:?}", receiver.state());
                    break Err(Error::Transport);
                }
                Either::Second(Ok(())) => {}
            }

            let step = self
                .pools
                .lock(|pools| receiver.advance(&mut pools.borrow_mut()));
            match step {
                Ok(RxStep::Complete(packet)) => {
                    trace!("[H4] rx {:?}", Bytes(packet.as_slice()));
                    if !self.deliver(packet).await {
                        break Ok(());
                    }
                }
                Ok(RxStep::Sleep(kind)) => {
                    debug!("[H4] controller sent {:?}", kind);
                }
                Ok(RxStep::Dropped) => {
                    warn!("[H4] frame dropped ({} so far)", receiver.dropped());
                }
                Ok(RxStep::Continue) => {}
                Err(RxError::UnexpectedIndicator(byte)) => {
                    warn!("[H4] unexpected indicator {:#x}", byte);
                }
            }
        };

        self.pools
            .lock(|pools| receiver.abort(&mut pools.borrow_mut()));
        result
    }

    /// Write queued frames to `writer`, one at a time, until stopped or the stream fails.
    ///
    /// Each frame goes back to its pool once written.
    ///
    /// # Errors
    /// Returns [`Error::Transport`] if a write or flush fails.
    pub async fn run_transmitter<W: Write>(&self, mut writer: W) -> Result<(), Error> {
        let result = loop {
            let packet = match select(self.stop_tx.wait(), self.outgoing.receive()).await {
                Either::First(()) => break Ok(()),
                Either::Second(packet) => packet,
            };

            let sent = select(self.stop_tx.wait(), transmit(&mut writer, &packet)).await;
            self.deallocate(packet);
            match sent {
                Either::First(()) => break Ok(()),
                Either::Second(Err(error)) => {
                    error!("[H4] transmit failed");
                    break Err(error);
                }
                Either::Second(Ok(())) => {}
            }
        };

        while let Ok(packet) = self.outgoing.try_receive() {
            self.deallocate(packet);
        }
        result
    }

    /// Hand a frame to the consumer, waiting for queue space. Returns `false` (and
    /// frees the frame) if a stop request arrives first.
    async fn deliver(&self, mut packet: Packet<'a>) -> bool {
        loop {
            match self.received.try_send(packet) {
                Ok(()) => return true,
                Err(TrySendError::Full(back)) => packet = back,
            }
            let space = poll_fn(|cx| self.received.poll_ready_to_send(cx));
            if let Either::First(()) = select(self.stop_rx.wait(), space).await {
                self.deallocate(packet);
                return false;
            }
        }
    }
}

impl<'a, M: RawMutex> PacketAllocator<'a> for H4<'a, M> {
    fn allocate(&self, id: PoolId) -> Option<Packet<'a>> {
        H4::allocate(self, id)
    }

    fn release(&self, packet: Packet<'a>) {
        self.deallocate(packet);
    }
}

async fn transmit<W: Write>(writer: &mut W, packet: &Packet<'_>) -> Result<(), Error> {
    trace!("[H4] tx {:?}", Bytes(packet.as_slice()));
    writer
        .write_all(packet.as_slice())
        .await
        .map_err(|_| Error::Transport)?;
    writer.flush().await.map_err(|_| Error::Transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_transport::{MockReader, MockWriter};
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    fn event(packet: &mut Packet<'_>, bytes: &[u8]) {
        packet.write(bytes).unwrap();
        packet.flip();
    }

    #[test]
    fn test_receiver_queues_frames_in_order() {
        let mut storage = PacketStorage::new();
        let h4: H4<'_, NoopRawMutex> = H4::new(&mut storage);
        let bytes = [
            0x04, 0x0E, 0x04, 0x01, 0x03, 0x0C, 0x00, // reset complete
            0x02, 0x40, 0x20, 0x01, 0x00, 0x99, // one-byte ACL
        ];
        let reader = MockReader::new(&bytes);

        let result = block_on(h4.run_receiver(reader));
        // the mock reports end of stream once drained
        assert_eq!(result, Err(Error::Transport));

        let first = h4.try_receive().unwrap();
        assert_eq!(first.as_slice(), &bytes[..7]);
        let second = h4.try_receive().unwrap();
        assert_eq!(second.as_slice(), &bytes[7..]);
        assert!(h4.try_receive().is_none());

        h4.deallocate(first);
        h4.deallocate(second);
        assert_eq!(h4.available(PoolId::Command), 4);
        assert_eq!(h4.available(PoolId::Acl), 4);
    }

    #[test]
    fn test_receiver_resyncs_after_bad_indicator() {
        let mut storage = PacketStorage::new();
        let h4: H4<'_, NoopRawMutex> = H4::new(&mut storage);
        let bytes = [0xFF, 0x04, 0x0F, 0x04, 0x00, 0x01, 0x05, 0x04];

        let _ = block_on(h4.run_receiver(MockReader::new(&bytes)));
        let packet = h4.try_receive().unwrap();
        assert_eq!(packet.as_slice(), &bytes[1..]);
        h4.deallocate(packet);
    }

    #[test]
    fn test_truncated_frame_is_returned_to_pool() {
        let mut storage = PacketStorage::new();
        let h4: H4<'_, NoopRawMutex> = H4::new(&mut storage);

        let result = block_on(h4.run_receiver(MockReader::new(&[0x04, 0x0E, 0x04, 0x01])));
        assert_eq!(result, Err(Error::Transport));
        assert_eq!(h4.available(PoolId::Command), 4);
    }

    #[test]
    fn test_transmitter_writes_in_order_and_frees() {
        let mut storage = PacketStorage::new();
        let h4: H4<'_, NoopRawMutex> = H4::new(&mut storage);
        let writer = MockWriter::new();

        for opcode in [0x0C03u16, 0x1001, 0x1009] {
            let mut packet = h4.allocate(PoolId::Command).unwrap();
            packet.begin_command(opcode).unwrap();
            packet.finish_frame().unwrap();
            h4.try_send(packet).unwrap();
        }
        assert_eq!(h4.available(PoolId::Command), 1);

        block_on(join(h4.run_transmitter(&writer), async {
            while h4.pending_transmits() > 0 || writer.writes() < 3 {
                embassy_futures::yield_now().await;
            }
            h4.stop();
        }))
        .0
        .unwrap();

        assert_eq!(
            writer.bytes(),
            &[
                0x01, 0x03, 0x0C, 0x00, 0x01, 0x01, 0x10, 0x00, 0x01, 0x09, 0x10, 0x00
            ]
        );
        assert_eq!(writer.max_concurrent_writes(), 1);
        assert_eq!(h4.available(PoolId::Command), 4);
    }

    #[test]
    fn test_stop_returns_everything() {
        let mut storage = PacketStorage::new();
        let h4: H4<'_, NoopRawMutex> = H4::new(&mut storage);

        let mut queued = h4.allocate(PoolId::Acl).unwrap();
        queued.begin_l2cap(0x0040, 0x0004).unwrap();
        queued.finish_frame().unwrap();
        h4.try_send(queued).unwrap();

        let mut received = h4.allocate(PoolId::Command).unwrap();
        event(&mut received, &[0x04, 0x05, 0x00]);
        h4.received.try_send(received).unwrap();

        h4.stop();
        let writer = MockWriter::new();
        block_on(h4.run_transmitter(&writer)).unwrap();
        block_on(h4.run_receiver(MockReader::pending())).unwrap();
        h4.reset();

        assert_eq!(h4.available(PoolId::Command), 4);
        assert_eq!(h4.available(PoolId::Acl), 4);
        assert!(writer.bytes().is_empty());
    }
}
