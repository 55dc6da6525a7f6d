//! Script Engine
//!
//! Replays a buffer of concatenated H4 command frames (`[0x01][opcode][len][params]`)
//! one at a time. A command is only issued once the previous one has been answered by
//! a matching Command Complete (or a failing Command Status), so at most one command
//! is ever outstanding at the controller.
//!
//! The engine is a plain state machine: [`Script::next_command`] builds the next frame
//! and the `recv_*` calls release it. [`HostController::execute`] drives it over the
//! transport with a bounded wait per command.
//!
//! [`HostController::execute`]: crate::host::HostController::execute

use crate::Error;
use crate::constants::COMMAND_HEADER_SIZE;
use crate::hci::opcode;
use crate::packet::{Packet, PacketKind};
use crate::pool::{PacketAllocator, PoolId};
use bt_hci::param::Status;

/// A linear HCI command script
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Script<'s> {
    bytes: &'s [u8],
    cursor: usize,
    pending: Option<u16>,
    last_status: Option<Status>,
    max_baud_rate: Option<u32>,
    baud_rate: Option<u32>,
}

impl<'s> Script<'s> {
    /// Script over `bytes`, positioned at the first command
    #[must_use]
    pub const fn new(bytes: &'s [u8]) -> Self {
        Self {
            bytes,
            cursor: 0,
            pending: None,
            last_status: None,
            max_baud_rate: None,
            baud_rate: None,
        }
    }

    /// Clamp any scripted PAN13xx baud rate change to `max`
    #[must_use]
    pub const fn with_max_baud_rate(mut self, max: u32) -> Self {
        self.max_baud_rate = Some(max);
        self
    }

    /// Set or clear the baud rate clamp
    pub fn set_max_baud_rate(&mut self, max: Option<u32>) {
        self.max_baud_rate = max;
    }

    /// Current baud rate clamp
    #[must_use]
    pub fn max_baud_rate(&self) -> Option<u32> {
        self.max_baud_rate
    }

    /// Build the next command frame and mark its opcode pending.
    ///
    /// Returns `Ok(None)` once every command has been issued.
    ///
    /// # Errors
    /// * [`Error::CommandPending`] while the previous command is unanswered
    /// * [`Error::MalformedScript`] if the next record is not a complete command frame
    /// * [`Error::PoolExhausted`] if no command packet is free
    /// * [`Error::Buffer`] if the command does not fit a command packet
    pub fn next_command<'a>(
        &mut self,
        pools: &impl PacketAllocator<'a>,
    ) -> Result<Option<Packet<'a>>, Error> {
        if let Some(pending) = self.pending {
            warn!("[SCRIPT] {:#x} still pending", pending);
            return Err(Error::CommandPending);
        }

        let rest = &self.bytes[self.cursor..];
        if rest.is_empty() {
            return Ok(None);
        }
        if rest.len() < COMMAND_HEADER_SIZE || rest[0] != PacketKind::Command as u8 {
            error!("[SCRIPT] bad record at offset {}", self.cursor);
            return Err(Error::MalformedScript);
        }
        let command = u16::from_le_bytes([rest[1], rest[2]]);
        let end = COMMAND_HEADER_SIZE + usize::from(rest[3]);
        let Some(params) = rest.get(COMMAND_HEADER_SIZE..end) else {
            error!("[SCRIPT] command {:#x} truncated", command);
            return Err(Error::MalformedScript);
        };

        let baud_rate = if command == opcode::PAN13XX_CHANGE_BAUD_RATE {
            let requested: [u8; 4] = params.try_into().map_err(|_| Error::MalformedScript)?;
            let requested = u32::from_le_bytes(requested);
            let clamped = self
                .max_baud_rate
                .map_or(requested, |max| requested.min(max));
            if clamped != requested {
                info!("[SCRIPT] baud rate {} clamped to {}", requested, clamped);
            }
            Some(clamped)
        } else {
            None
        };

        let mut packet = pools
            .allocate(PoolId::Command)
            .ok_or(Error::PoolExhausted(PoolId::Command))?;
        let built = match baud_rate {
            Some(baud) => build(&mut packet, command, &baud.to_le_bytes()),
            None => build(&mut packet, command, params),
        };
        if let Err(e) = built {
            pools.release(packet);
            return Err(e.into());
        }

        debug!("[SCRIPT] sending {:#x}", command);
        self.cursor += end;
        self.pending = Some(command);
        if baud_rate.is_some() {
            self.baud_rate = baud_rate;
        }
        Ok(Some(packet))
    }

    /// Offer a Command Complete; returns true if it answered the pending command.
    pub fn recv_command_complete_event(&mut self, opcode: u16, status: Status) -> bool {
        if self.pending != Some(opcode) {
            return false;
        }
        if let Err(err) = status.to_result() {
            warn!("[SCRIPT] {:#x} completed with {:?}", opcode, err);
        }
        self.pending = None;
        self.last_status = Some(status);
        if self.is_complete() {
            info!("[SCRIPT] complete");
        }
        true
    }

    /// Offer a Command Status; returns true if it concerns the pending command.
    ///
    /// A failing status ends the command since no Command Complete will follow; a
    /// successful one leaves it pending.
    pub fn recv_command_status_event(&mut self, opcode: u16, status: Status) -> bool {
        if self.pending != Some(opcode) {
            return false;
        }
        if let Err(err) = status.to_result() {
            warn!("[SCRIPT] {:#x} rejected with {:?}", opcode, err);
            self.pending = None;
            self.last_status = Some(status);
        }
        true
    }

    /// Rewind to the first command and forget the pending one
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.pending = None;
        self.last_status = None;
        self.baud_rate = None;
    }

    /// Every command issued and answered
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.bytes.len() && self.pending.is_none()
    }

    /// A command is waiting for its completion
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Opcode of the outstanding command
    #[must_use]
    pub fn pending_opcode(&self) -> Option<u16> {
        self.pending
    }

    /// Status carried by the most recent completion
    #[must_use]
    pub fn last_status(&self) -> Option<Status> {
        self.last_status
    }

    /// Baud rate requested by the last PAN13xx baud change, after clamping
    #[must_use]
    pub fn baud_rate(&self) -> Option<u32> {
        self.baud_rate
    }
}

fn build(packet: &mut Packet<'_>, command: u16, params: &[u8]) -> Result<(), crate::buffer::BufferError> {
    packet.begin_command(command)?;
    packet.write(params)?;
    packet.finish_frame()
}
