//! H4 receive state machine
//!
//! Frames are assembled in steps. [`Receiver::pending_mut`] names the bytes the
//! transport has to fill next; once they are in, [`Receiver::advance`] looks at them,
//! sets up the next step and hands back a packet when a frame is complete. No step
//! blocks, so the machine can be driven from an async read loop or from a receive
//! completion callback.
//!
//! ```text
//! AwaitIndicator -> EventHeader | AclHeader -> AwaitRemainingBytes -> AwaitIndicator
//! ```
//!
//! Frames that cannot be buffered (pool exhausted, body larger than a slot) are read
//! into a scratch area and dropped, so the stream stays framed.

use crate::constants::{ACL_HEADER_SIZE, DISCARD_CHUNK_SIZE, EVENT_HEADER_SIZE};
use crate::packet::{Packet, PacketKind};
use crate::pool::{PacketPools, PoolId};

/// Receive states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxState {
    /// Waiting for the one-byte packet indicator
    AwaitIndicator,
    /// Reading event code and parameter length
    EventHeader,
    /// Reading handle/flags and data length
    AclHeader,
    /// Reading the body announced by the header
    AwaitRemainingBytes,
    /// Reading the header of a frame that will be dropped
    DiscardHeader {
        /// Indicator of the dropped frame
        kind: PacketKind,
    },
    /// Reading and dropping body bytes
    DiscardBody {
        /// Bytes still to swallow
        remaining: usize,
    },
}

/// Result of one completed receive step
#[derive(Debug)]
pub enum RxStep<'a> {
    /// More bytes are needed for the current frame
    Continue,
    /// A full frame, flipped for reading
    Complete(Packet<'a>),
    /// A sleep-protocol indicator arrived
    Sleep(PacketKind),
    /// A frame was swallowed because it could not be buffered
    Dropped,
}

/// Receive-side framing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxError {
    /// The indicator byte is not one a controller sends
    UnexpectedIndicator(u8),
}

/// H4 frame assembler
#[derive(Debug)]
pub struct Receiver<'a> {
    state: RxState,
    indicator: [u8; 1],
    scratch: [u8; DISCARD_CHUNK_SIZE],
    rx: Option<Packet<'a>>,
    dropped: u32,
}

impl<'a> Receiver<'a> {
    /// Start in `AwaitIndicator`
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RxState::AwaitIndicator,
            indicator: [0],
            scratch: [0; DISCARD_CHUNK_SIZE],
            rx: None,
            dropped: 0,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> RxState {
        self.state
    }

    /// Frames dropped so far
    #[must_use]
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// The bytes the transport must fill before the next [`Receiver::advance`]
    pub fn pending_mut(&mut self) -> &mut [u8] {
        match self.state {
            RxState::AwaitIndicator => &mut self.indicator,
            RxState::EventHeader | RxState::AclHeader | RxState::AwaitRemainingBytes => {
                match self.rx.as_mut() {
                    Some(rx) => rx.unfilled_mut(),
                    None => &mut self.indicator,
                }
            }
            RxState::DiscardHeader { kind } => {
                &mut self.scratch[1..header_size(kind)]
            }
            RxState::DiscardBody { remaining } => {
                &mut self.scratch[..remaining.min(DISCARD_CHUNK_SIZE)]
            }
        }
    }

    /// Consume the bytes just placed in [`Receiver::pending_mut`].
    ///
    /// # Errors
    /// Returns [`RxError::UnexpectedIndicator`] for indicators a controller never
    /// sends; the machine is back in `AwaitIndicator` afterwards.
    pub fn advance(&mut self, pools: &mut PacketPools<'a>) -> Result<RxStep<'a>, RxError> {
        match self.state {
            RxState::AwaitIndicator => self.on_indicator(pools),
            RxState::EventHeader => Ok(self.on_event_header(pools)),
            RxState::AclHeader => Ok(self.on_acl_header(pools)),
            RxState::AwaitRemainingBytes => Ok(self.on_body()),
            RxState::DiscardHeader { kind } => Ok(self.on_discarded_header(kind)),
            RxState::DiscardBody { remaining } => {
                let remaining = remaining.saturating_sub(remaining.min(DISCARD_CHUNK_SIZE));
                if remaining == 0 {
                    self.state = RxState::AwaitIndicator;
                    Ok(RxStep::Dropped)
                } else {
                    self.state = RxState::DiscardBody { remaining };
                    Ok(RxStep::Continue)
                }
            }
        }
    }

    /// Give up the frame being assembled, returning its packet to the pools.
    pub fn abort(&mut self, pools: &mut PacketPools<'a>) {
        if let Some(rx) = self.rx.take() {
            release(pools, rx);
        }
        self.state = RxState::AwaitIndicator;
    }

    fn on_indicator(&mut self, pools: &mut PacketPools<'a>) -> Result<RxStep<'a>, RxError> {
        let byte = self.indicator[0];
        let kind = PacketKind::from_u8(byte).ok_or(RxError::UnexpectedIndicator(byte))?;

        let (pool, next, header) = match kind {
            PacketKind::Event => (PoolId::Command, RxState::EventHeader, EVENT_HEADER_SIZE),
            PacketKind::Acl => (PoolId::Acl, RxState::AclHeader, ACL_HEADER_SIZE),
            kind if kind.is_sleep_indicator() => {
                debug!("[H4] sleep indicator {:?}", kind);
                return Ok(RxStep::Sleep(kind));
            }
            _ => return Err(RxError::UnexpectedIndicator(byte)),
        };

        let Some(mut rx) = pools.allocate(pool) else {
            warn!("[H4] {:?} pool exhausted, dropping frame", pool);
            self.discard_header(kind, byte);
            return Ok(RxStep::Continue);
        };
        match rx.set_limit(header).and_then(|()| rx.write_u8(byte)) {
            Ok(()) => {
                self.rx = Some(rx);
                self.state = next;
            }
            Err(e) => {
                warn!("[H4] {:?} slot cannot hold a header: {:?}", pool, e);
                release(pools, rx);
                self.discard_header(kind, byte);
            }
        }
        Ok(RxStep::Continue)
    }

    fn on_event_header(&mut self, pools: &mut PacketPools<'a>) -> RxStep<'a> {
        let Some(rx) = self.rx.as_mut() else {
            self.state = RxState::AwaitIndicator;
            return RxStep::Continue;
        };
        rx.advance_to_limit();
        let length = usize::from(rx.get(2).unwrap_or(0));

        if length == 0 {
            return self.complete();
        }
        if rx.set_limit(EVENT_HEADER_SIZE + length).is_err() {
            self.drop_current(pools, length);
            return RxStep::Continue;
        }
        self.state = RxState::AwaitRemainingBytes;
        RxStep::Continue
    }

    fn on_acl_header(&mut self, pools: &mut PacketPools<'a>) -> RxStep<'a> {
        let Some(rx) = self.rx.as_mut() else {
            self.state = RxState::AwaitIndicator;
            return RxStep::Continue;
        };
        rx.advance_to_limit();
        let length = usize::from(u16::from_le_bytes([
            rx.get(3).unwrap_or(0),
            rx.get(4).unwrap_or(0),
        ]));

        if length == 0 {
            return self.complete();
        }
        if rx.set_limit(ACL_HEADER_SIZE + length).is_err() {
            warn!("[H4] ACL frame of {} bytes exceeds slot, dropping", length);
            self.drop_current(pools, length);
            return RxStep::Continue;
        }
        self.state = RxState::AwaitRemainingBytes;
        RxStep::Continue
    }

    fn on_body(&mut self) -> RxStep<'a> {
        if let Some(rx) = self.rx.as_mut() {
            rx.advance_to_limit();
        }
        self.complete()
    }

    fn on_discarded_header(&mut self, kind: PacketKind) -> RxStep<'a> {
        let length = match kind {
            PacketKind::Event => usize::from(self.scratch[2]),
            _ => usize::from(u16::from_le_bytes([self.scratch[3], self.scratch[4]])),
        };
        if length == 0 {
            self.state = RxState::AwaitIndicator;
            return RxStep::Dropped;
        }
        self.state = RxState::DiscardBody { remaining: length };
        RxStep::Continue
    }

    fn drop_current(&mut self, pools: &mut PacketPools<'a>, body: usize) {
        if let Some(rx) = self.rx.take() {
            release(pools, rx);
        }
        self.dropped += 1;
        self.state = RxState::DiscardBody { remaining: body };
    }

    fn discard_header(&mut self, kind: PacketKind, indicator: u8) {
        self.dropped += 1;
        self.scratch[0] = indicator;
        self.state = RxState::DiscardHeader { kind };
    }

    fn complete(&mut self) -> RxStep<'a> {
        self.state = RxState::AwaitIndicator;
        match self.rx.take() {
            Some(mut rx) => {
                rx.flip();
                RxStep::Complete(rx)
            }
            None => RxStep::Continue,
        }
    }
}

impl Default for Receiver<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn header_size(kind: PacketKind) -> usize {
    match kind {
        PacketKind::Event => EVENT_HEADER_SIZE,
        _ => ACL_HEADER_SIZE,
    }
}

fn release<'a>(pools: &mut PacketPools<'a>, packet: Packet<'a>) {
    if let Err(packet) = pools.deallocate(packet) {
        warn!("[H4] {:?} packet has no pool to return to", packet.origin());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PacketStorage;

    /// Feed `bytes` through the machine the way a transport would, collecting frames.
    fn feed<'a>(
        receiver: &mut Receiver<'a>,
        pools: &mut PacketPools<'a>,
        mut bytes: &[u8],
        frames: &mut heapless::Vec<Packet<'a>, 8>,
    ) -> Result<(), RxError> {
        while !bytes.is_empty() {
            let pending = receiver.pending_mut();
            let n = pending.len();
            assert!(n <= bytes.len(), "stream ended mid-frame");
            pending.copy_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
            if let RxStep::Complete(packet) = receiver.advance(pools)? {
                frames.push(packet).unwrap();
            }
        }
        Ok(())
    }

    #[test]
    fn test_event_frame() {
        let mut storage = PacketStorage::new();
        let mut pools = PacketPools::new(&mut storage);
        let mut receiver = Receiver::new();
        let mut frames = heapless::Vec::new();

        let bytes = [0x04, 0x0E, 0x04, 0x01, 0x03, 0x0C, 0x00];
        feed(&mut receiver, &mut pools, &bytes, &mut frames).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_slice(), &bytes);
        assert_eq!(frames[0].origin(), PoolId::Command);
        assert_eq!(receiver.state(), RxState::AwaitIndicator);
        assert_eq!(pools.available(PoolId::Command), 3);
    }

    #[test]
    fn test_empty_event_completes_after_header() {
        let mut storage = PacketStorage::new();
        let mut pools = PacketPools::new(&mut storage);
        let mut receiver = Receiver::new();
        let mut frames = heapless::Vec::new();

        feed(&mut receiver, &mut pools, &[0x04, 0x1A, 0x00], &mut frames).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_slice(), &[0x04, 0x1A, 0x00]);
    }

    #[test]
    fn test_acl_frame_and_step_sizes() {
        let mut storage = PacketStorage::new();
        let mut pools = PacketPools::new(&mut storage);
        let mut receiver = Receiver::new();

        assert_eq!(receiver.pending_mut().len(), 1);
        receiver.pending_mut()[0] = 0x02;
        assert!(matches!(receiver.advance(&mut pools), Ok(RxStep::Continue)));
        assert_eq!(receiver.state(), RxState::AclHeader);

        assert_eq!(receiver.pending_mut().len(), 4);
        receiver
            .pending_mut()
            .copy_from_slice(&[0x01, 0x20, 0x05, 0x00]);
        assert!(matches!(receiver.advance(&mut pools), Ok(RxStep::Continue)));
        assert_eq!(receiver.state(), RxState::AwaitRemainingBytes);

        assert_eq!(receiver.pending_mut().len(), 5);
        receiver
            .pending_mut()
            .copy_from_slice(&[0x01, 0x00, 0x04, 0x00, 0x0A]);
        let Ok(RxStep::Complete(packet)) = receiver.advance(&mut pools) else {
            panic!("expected a complete frame");
        };
        assert_eq!(
            packet.as_slice(),
            &[0x02, 0x01, 0x20, 0x05, 0x00, 0x01, 0x00, 0x04, 0x00, 0x0A]
        );
        assert_eq!(packet.origin(), PoolId::Acl);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut storage = PacketStorage::new();
        let mut pools = PacketPools::new(&mut storage);
        let mut receiver = Receiver::new();
        let mut frames = heapless::Vec::new();

        let bytes = [
            0x04, 0x13, 0x05, 0x01, 0x40, 0x00, 0x01, 0x00, // completed packets
            0x02, 0x40, 0x20, 0x00, 0x00, // empty ACL
            0x04, 0x0F, 0x04, 0x00, 0x01, 0x06, 0x04, // command status
        ];
        feed(&mut receiver, &mut pools, &bytes, &mut frames).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].kind(), Some(PacketKind::Event));
        assert_eq!(frames[1].kind(), Some(PacketKind::Acl));
        assert_eq!(frames[1].limit(), 5);
        assert_eq!(frames[2].get(1), Some(0x0F));
    }

    #[test]
    fn test_sleep_indicator_is_reported() {
        let mut storage = PacketStorage::new();
        let mut pools = PacketPools::new(&mut storage);
        let mut receiver = Receiver::new();

        receiver.pending_mut()[0] = 0x30;
        assert!(matches!(
            receiver.advance(&mut pools),
            Ok(RxStep::Sleep(PacketKind::GoToSleepInd))
        ));
        assert_eq!(receiver.state(), RxState::AwaitIndicator);
    }

    #[test]
    fn test_unexpected_indicator() {
        let mut storage = PacketStorage::new();
        let mut pools = PacketPools::new(&mut storage);
        let mut receiver = Receiver::new();

        receiver.pending_mut()[0] = 0x01;
        assert_eq!(
            receiver.advance(&mut pools).unwrap_err(),
            RxError::UnexpectedIndicator(0x01)
        );
        receiver.pending_mut()[0] = 0x7F;
        assert_eq!(
            receiver.advance(&mut pools).unwrap_err(),
            RxError::UnexpectedIndicator(0x7F)
        );
        assert_eq!(receiver.state(), RxState::AwaitIndicator);
    }

    #[test]
    fn test_exhausted_pool_keeps_stream_in_sync() {
        let mut storage = PacketStorage::new();
        let mut pools = PacketPools::new(&mut storage);
        let mut receiver = Receiver::new();
        let mut frames = heapless::Vec::new();

        let mut held: heapless::Vec<Packet<'_>, 4> = heapless::Vec::new();
        while let Some(packet) = pools.allocate(PoolId::Command) {
            held.push(packet).unwrap();
        }

        // an event with a 40-byte body is swallowed in scratch chunks
        let mut dropped = [0u8; 43];
        dropped[..3].copy_from_slice(&[0x04, 0x3E, 40]);
        feed(&mut receiver, &mut pools, &dropped, &mut frames).unwrap();
        assert!(frames.is_empty());
        assert_eq!(receiver.dropped(), 1);
        assert_eq!(receiver.state(), RxState::AwaitIndicator);

        // the ACL frame that follows is still framed correctly
        let acl = [0x02, 0x40, 0x20, 0x01, 0x00, 0xEE];
        feed(&mut receiver, &mut pools, &acl, &mut frames).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_slice(), &acl);

        for packet in held {
            pools.deallocate(packet).unwrap();
        }
    }

    #[test]
    fn test_oversized_acl_is_dropped() {
        let mut storage = PacketStorage::new();
        let mut pools = PacketPools::new(&mut storage);
        let mut receiver = Receiver::new();
        let mut frames = heapless::Vec::new();

        // 1200-byte body announced, slot holds 1000
        let header = [0x02, 0x40, 0x20, 0xB0, 0x04];
        feed(&mut receiver, &mut pools, &header, &mut frames).unwrap();
        assert!(matches!(receiver.state(), RxState::DiscardBody { remaining: 1200 }));
        assert_eq!(pools.available(PoolId::Acl), 4);

        let body = [0u8; 1200];
        feed(&mut receiver, &mut pools, &body, &mut frames).unwrap();
        assert!(frames.is_empty());
        assert_eq!(receiver.state(), RxState::AwaitIndicator);
    }

    #[test]
    fn test_abort_returns_packet() {
        let mut storage = PacketStorage::new();
        let mut pools = PacketPools::new(&mut storage);
        let mut receiver = Receiver::new();

        receiver.pending_mut()[0] = 0x04;
        receiver.advance(&mut pools).unwrap();
        assert_eq!(pools.available(PoolId::Command), 3);

        receiver.abort(&mut pools);
        assert_eq!(pools.available(PoolId::Command), 4);
        assert_eq!(receiver.state(), RxState::AwaitIndicator);
    }

    #[test]
    fn test_release_keeps_pools_intact() {
        let mut slot = [0u8; 8];
        let mut storage = PacketStorage::new();
        let mut pools = PacketPools::new(&mut storage);

        release(&mut pools, Packet::unpooled(&mut slot));
        assert_eq!(pools.available(PoolId::Command), 4);

        let packet = pools.allocate(PoolId::Acl).unwrap();
        release(&mut pools, packet);
        assert_eq!(pools.available(PoolId::Acl), 4);
    }
}
