//! HCI event decoding
//!
//! Frames are parsed with `bt-hci`; the parameters must span exactly the length the
//! event header announces or the frame is dropped.

use super::{Connection, HostController, command_complete};
use crate::BluetoothAddress;
use crate::fmt::Bytes;
use crate::packet::Packet;
use crate::script::Script;
use bt_hci::cmd::Cmd;
use bt_hci::cmd::le::LeSetAdvEnable;
use bt_hci::event::le::{LeConnectionComplete, LeEvent};
use bt_hci::event::Event;
use bt_hci::param::Status;
use bt_hci::{FromHciBytes, FromHciBytesError};
use embassy_sync::blocking_mutex::raw::RawMutex;

/// Command Complete header ahead of the status: code, length, credits, opcode
const COMMAND_COMPLETE_HEADER: usize = 5;

/// What to do with an event frame once it has been decoded
enum Followup {
    Release,
    Readvertise,
}

impl<'a, M: RawMutex> HostController<'_, 'a, '_, M> {
    /// Decode an event positioned after its indicator. Returns the frame, rewritten
    /// into a command, if it is to be transmitted.
    pub(super) fn on_event(
        &mut self,
        packet: Packet<'a>,
        script: Option<&mut Script<'_>>,
    ) -> Option<Packet<'a>> {
        let frame = packet.as_slice();
        let outcome = Event::from_hci_bytes_complete(frame)
            .and_then(|event| self.decode_event(event, frame, script));
        match outcome {
            Ok(Followup::Readvertise) => self.readvertise(packet),
            Ok(Followup::Release) => {
                self.h4.deallocate(packet);
                None
            }
            Err(e) => {
                warn!(
                    "[HCI] malformed event ({:?}): {:?}",
                    e,
                    Bytes(packet.as_written())
                );
                self.h4.deallocate(packet);
                None
            }
        }
    }

    fn decode_event(
        &mut self,
        event: Event<'_>,
        frame: &[u8],
        script: Option<&mut Script<'_>>,
    ) -> Result<Followup, FromHciBytesError> {
        match event {
            Event::CommandComplete(e) => {
                self.command_credits = e.num_hci_cmd_pkts;
                let opcode = e.cmd_opcode;
                // No Operation completions carry no status
                let (status, returns) = match frame.get(COMMAND_COMPLETE_HEADER..) {
                    Some(rest) if !rest.is_empty() => Status::from_hci_bytes(rest)?,
                    _ => (Status::SUCCESS, &[][..]),
                };
                if script.is_some_and(|script| {
                    script.recv_command_complete_event(opcode.to_raw(), status)
                }) {
                    debug!("[HCI] {:#x} complete, claimed by script", opcode.to_raw());
                }
                command_complete::apply(&mut self.local_info, opcode, status, returns)?;
            }
            Event::CommandStatus(e) => {
                self.command_credits = e.num_hci_cmd_pkts;
                let opcode = e.cmd_opcode.to_raw();
                let claimed = script
                    .is_some_and(|script| script.recv_command_status_event(opcode, e.status));
                debug!(
                    "[HCI] {:#x} status {:?}{}",
                    opcode,
                    e.status,
                    if claimed { " (script)" } else { "" }
                );
            }
            Event::DisconnectionComplete(e) => {
                let handle = e.handle;
                if let Err(err) = e.status.to_result() {
                    warn!(
                        "[HCI] disconnection of {:#x} failed: {:?}",
                        handle.raw(),
                        err
                    );
                    return Ok(Followup::Release);
                }
                info!(
                    "[HCI] {:#x} disconnected, reason {:?}",
                    handle.raw(),
                    e.reason
                );
                self.connections.remove(handle);
                self.channels.reset();
                if self.options.readvertise_on_disconnect {
                    return Ok(Followup::Readvertise);
                }
            }
            Event::Le(LeEvent::LeConnectionComplete(e)) => self.on_connection_complete(&e),
            Event::Le(_) => debug!("[HCI] ignoring LE subevent"),
            Event::NumberOfCompletedPackets(e) => {
                for entry in e.completed_packets.iter() {
                    let handle = entry.handle()?;
                    let count = entry.num_completed_packets()?;
                    if !self.connections.record_completed(handle, count) {
                        debug!(
                            "[HCI] {} completed on unknown handle {:#x}",
                            count,
                            handle.raw()
                        );
                    }
                }
            }
            Event::HardwareError(e) => {
                error!("[HCI] controller hardware error {:#x}", e.hardware_code);
            }
            Event::Vendor(_) => debug!("[HCI] ignoring vendor event"),
            _ => debug!("[HCI] ignoring event {:?}", frame.first()),
        }
        Ok(Followup::Release)
    }

    fn on_connection_complete(&mut self, e: &LeConnectionComplete) {
        let handle = e.handle.raw();
        if let Err(err) = e.status.to_result() {
            warn!("[HCI] LE connection failed: {:?}", err);
            return;
        }
        let Ok(peer_address) = BluetoothAddress::try_from(e.peer_addr) else {
            warn!("[HCI] not tracking {:#x}: bad peer address", handle);
            return;
        };

        let connection = Connection {
            handle: e.handle,
            role: e.role,
            peer_address_kind: e.peer_addr_kind,
            peer_address,
            interval: e.conn_interval.as_u16(),
            latency: e.peripheral_latency,
            supervision_timeout: e.supervision_timeout.as_u16(),
            completed_packets: 0,
        };
        info!("[HCI] connected to {} on {:#x}", connection.peer_address, handle);
        if let Err(e) = self.connections.insert(connection) {
            warn!("[HCI] not tracking {:#x}: {:?}", handle, e);
        }
    }

    /// Turn the event frame into `LE_Set_Advertise_Enable(1)`
    fn readvertise(&self, mut packet: Packet<'a>) -> Option<Packet<'a>> {
        let built = packet
            .begin_command(LeSetAdvEnable::OPCODE.to_raw())
            .and_then(|()| packet.write_u8(0x01))
            .and_then(|()| packet.finish_frame());
        match built {
            Ok(()) => {
                debug!("[HCI] re-enabling advertising");
                Some(packet)
            }
            Err(e) => self.malformed(packet, e),
        }
    }
}
