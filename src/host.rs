//! Host Controller
//!
//! Consumes the frames the H4 transport assembles and turns them into state changes
//! and replies.
//!
//! ## Event Flow
//!
//! 1. [`H4::run_receiver`] queues a complete frame
//! 2. [`HostController::recv_hci`] reads the indicator and dispatches:
//!    * events are decoded into [`LocalDeviceInfo`], the [`ConnectionTable`] or a
//!      running [`Script`];
//!    * ACL frames are stripped of their ACL and L2CAP headers and handed to the
//!      [`ChannelRegistry`], which answers ATT requests in place;
//!    * anything else is logged and released.
//! 3. A reply (an ATT response, a refused pairing, the advertising re-enable after a
//!    disconnection) is queued on the transport; every other frame goes back to its
//!    pool.
//!
//! Unrecognised or malformed input is never fatal: it is logged and the frame freed.
//!
//! ## Scripts
//!
//! [`HostController::execute`] replays a [`Script`] over the same transport, waiting
//! for each command's completion before issuing the next and giving up with
//! [`Error::Timeout`] when the caller's timeout future fires first.

mod command_complete;
mod connection;
mod events;

pub use bt_hci::param::{AddrKind, ConnHandle, LeConnRole as Role};
pub use connection::{Connection, ConnectionTable};

use crate::acl::AclHeader;
use crate::att::AttributeTable;
use crate::buffer::BufferError;
use crate::fmt::Bytes;
use crate::h4::H4;
use crate::l2cap::{ChannelRegistry, L2capHeader};
use crate::packet::{Packet, PacketKind};
use crate::script::Script;
use crate::{Error, HostOptions, LocalDeviceInfo};
use core::future::Future;
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::RawMutex;

/// HCI dispatcher sitting on top of an [`H4`] transport
pub struct HostController<'h, 'a, 'd, M: RawMutex> {
    h4: &'h H4<'a, M>,
    channels: ChannelRegistry<'d>,
    connections: ConnectionTable,
    local_info: LocalDeviceInfo,
    command_credits: u8,
    options: HostOptions,
}

impl<'h, 'a, 'd, M: RawMutex> HostController<'h, 'a, 'd, M> {
    /// Host serving `table` over the LE fixed channels
    ///
    /// # Errors
    /// Returns [`Error::TableFull`] if the fixed channels cannot be registered.
    pub fn new(
        h4: &'h H4<'a, M>,
        table: &'d AttributeTable<'d>,
        options: HostOptions,
    ) -> Result<Self, Error> {
        let channels = ChannelRegistry::le_fixed(table, options.att_mtu)?;
        Ok(Self::with_channels(h4, channels, options))
    }

    /// Host routing ACL data to an already populated registry
    #[must_use]
    pub fn with_channels(
        h4: &'h H4<'a, M>,
        channels: ChannelRegistry<'d>,
        options: HostOptions,
    ) -> Self {
        Self {
            h4,
            channels,
            connections: ConnectionTable::new(),
            local_info: LocalDeviceInfo::default(),
            command_credits: 1,
            options,
        }
    }

    /// Controller information gathered from Command Complete events
    #[must_use]
    pub fn local_info(&self) -> &LocalDeviceInfo {
        &self.local_info
    }

    /// Open LE connections
    #[must_use]
    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// Registered L2CAP channels
    #[must_use]
    pub fn channels(&self) -> &ChannelRegistry<'d> {
        &self.channels
    }

    /// Registered L2CAP channels, for adding or removing channels
    pub fn channels_mut(&mut self) -> &mut ChannelRegistry<'d> {
        &mut self.channels
    }

    /// Commands the controller last said it can accept
    #[must_use]
    pub fn command_credits(&self) -> u8 {
        self.command_credits
    }

    /// Options the host was built with
    #[must_use]
    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    /// Handle one frame from the transport, queueing any reply.
    pub async fn recv_hci(&mut self, packet: Packet<'a>) {
        if let Some(reply) = self.process(packet, None) {
            self.h4.send(reply).await;
        }
    }

    /// Handle frames until the future is dropped.
    pub async fn run(&mut self) {
        loop {
            let packet = self.h4.receive().await;
            self.recv_hci(packet).await;
        }
    }

    /// Replay `script`, one command at a time.
    ///
    /// Frames arriving while a command is outstanding are handled as usual; the
    /// completion of the outstanding command goes to the script. `timeout` is called
    /// once per command and bounds the wait for its completion. A script without its
    /// own baud rate clamp picks up [`HostOptions::max_baud_rate`].
    ///
    /// # Errors
    /// * [`Error::Timeout`] if a completion does not arrive in time; the script keeps
    ///   the command pending and can be restarted
    /// * any error of [`Script::next_command`]
    pub async fn execute<F, T>(&mut self, script: &mut Script<'_>, mut timeout: F) -> Result<(), Error>
    where
        F: FnMut() -> T,
        T: Future<Output = ()>,
    {
        if script.max_baud_rate().is_none() {
            script.set_max_baud_rate(self.options.max_baud_rate);
        }
        info!("[SCRIPT] starting");
        while let Some(command) = script.next_command(self.h4)? {
            self.h4.send(command).await;
            if let Either::Second(()) = select(self.await_completion(script), timeout()).await {
                error!("[SCRIPT] no completion for {:?}", script.pending_opcode());
                return Err(Error::Timeout);
            }
        }
        Ok(())
    }

    async fn await_completion(&mut self, script: &mut Script<'_>) {
        while script.is_pending() {
            let packet = self.h4.receive().await;
            if let Some(reply) = self.process(packet, Some(&mut *script)) {
                self.h4.send(reply).await;
            }
        }
    }

    /// Dispatch on the indicator. Returns the frame to transmit, if any; otherwise the
    /// frame has been released.
    fn process(&mut self, mut packet: Packet<'a>, script: Option<&mut Script<'_>>) -> Option<Packet<'a>> {
        let indicator = packet.read_u8().ok();
        match indicator.and_then(PacketKind::from_u8) {
            Some(PacketKind::Event) => self.on_event(packet, script),
            Some(PacketKind::Acl) => self.on_acl(packet),
            _ => {
                warn!("[HCI] discarding frame with indicator {:?}", indicator);
                self.h4.deallocate(packet);
                None
            }
        }
    }

    fn on_acl(&mut self, mut packet: Packet<'a>) -> Option<Packet<'a>> {
        let acl = match AclHeader::read(&mut packet) {
            Ok(acl) if acl.packet_boundary.starts_pdu() => acl,
            Ok(acl) => {
                debug!(
                    "[HCI] dropping continuation fragment on {:#x}",
                    acl.connection_handle
                );
                self.h4.deallocate(packet);
                return None;
            }
            Err(e) => return self.malformed(packet, e),
        };
        let l2cap = match L2capHeader::read(&mut packet) {
            Ok(l2cap) => l2cap,
            Err(e) => return self.malformed(packet, e),
        };
        trace!(
            "[HCI] ACL on {:#x} for CID {:#x}",
            acl.connection_handle, l2cap.channel_id
        );
        self.channels.receive(l2cap.channel_id, packet, self.h4)
    }

    fn malformed(&self, packet: Packet<'a>, error: BufferError) -> Option<Packet<'a>> {
        warn!(
            "[HCI] malformed frame ({:?}): {:?}",
            error,
            Bytes(packet.as_written())
        );
        self.h4.deallocate(packet);
        None
    }
}
