//! BTS service packs
//!
//! TI ships controller patches and init sequences as "BTSB" files: a 32-byte header
//! starting with the magic `0x42535442`, followed by action records
//!
//! ```text
//! [action:u16][size:u16][data:size]
//! ```
//!
//! where a Send Command record carries a complete H4 command frame. [`ServicePack`]
//! walks the records without copying and can flatten the commands into a buffer that
//! [`Script`](crate::script::Script) replays.

use crate::Error;
use crate::buffer::FlipBuffer;
use crate::packet::PacketKind;

/// `'BTSB'` read as a little-endian `u32`
pub const MAGIC: u32 = 0x4253_5442;
/// Bytes before the first action record
pub const HEADER_SIZE: usize = 32;
/// Bytes of `[action][size]` before each record's data
pub const RECORD_HEADER_SIZE: usize = 4;

/// Record action codes
pub mod action {
    /// Send an HCI command
    pub const SEND_COMMAND: u16 = 1;
    /// Wait for an event
    pub const WAIT_EVENT: u16 = 2;
    /// Change the UART configuration
    pub const SERIAL_PORT_PARAMETERS: u16 = 3;
    /// Chain to another script
    pub const RUN_SCRIPT: u16 = 5;
    /// Free-form comment
    pub const REMARKS: u16 = 6;
}

/// UART flow control requested by a Serial Port Parameters record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlowControl {
    /// No flow control
    None,
    /// RTS/CTS
    Hardware,
    /// Keep the current setting
    NoChange,
    /// Unrecognised value
    Unknown(u32),
}

impl From<u32> for FlowControl {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Hardware,
            0xFFFF_FFFF => Self::NoChange,
            other => Self::Unknown(other),
        }
    }
}

/// One record of a service pack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action<'b> {
    /// An H4 frame to send, indicator included
    SendCommand(&'b [u8]),
    /// Wait up to `timeout_ms` for `event`
    WaitEvent {
        /// Milliseconds to wait
        timeout_ms: u32,
        /// Expected H4 event frame
        event: &'b [u8],
    },
    /// Reconfigure the UART
    SerialPortParameters {
        /// New baud rate
        baud: u32,
        /// New flow control
        flow_control: FlowControl,
    },
    /// Name of a script to run, up to the first NUL
    RunScript(&'b [u8]),
    /// Comment text, up to the first NUL
    Remarks(&'b [u8]),
}

impl Action<'_> {
    /// Opcode of a Send Command record holding an HCI command
    #[must_use]
    pub fn command_opcode(&self) -> Option<u16> {
        match self {
            Self::SendCommand([indicator, low, high, ..])
                if *indicator == PacketKind::Command as u8 =>
            {
                Some(u16::from_le_bytes([*low, *high]))
            }
            _ => None,
        }
    }
}

/// A validated service pack
#[derive(Debug, Clone, Copy)]
pub struct ServicePack<'b> {
    records: &'b [u8],
}

impl<'b> ServicePack<'b> {
    /// Check the header of `bytes`.
    ///
    /// # Errors
    /// Returns [`Error::MalformedScript`] if the file is shorter than the header or the
    /// magic does not match.
    pub fn parse(bytes: &'b [u8]) -> Result<Self, Error> {
        let (header, records) = bytes
            .split_at_checked(HEADER_SIZE)
            .ok_or(Error::MalformedScript)?;
        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != MAGIC {
            warn!("[SCRIPT] bad BTS magic {:#x}", magic);
            return Err(Error::MalformedScript);
        }
        Ok(Self { records })
    }

    /// Iterate over the records
    #[must_use]
    pub fn actions(&self) -> Actions<'b> {
        Actions {
            rest: self.records,
        }
    }

    /// Copy every Send Command frame into `out`, back to back, skipping commands whose
    /// opcode is listed in `omit`. Returns the number of bytes written.
    ///
    /// # Errors
    /// Returns [`Error::MalformedScript`] for a damaged record and [`Error::Buffer`] if
    /// `out` is too small.
    pub fn extract_commands(&self, out: &mut [u8], omit: &[u16]) -> Result<usize, Error> {
        let mut buffer = FlipBuffer::new(out);
        for action in self.actions() {
            let action = action?;
            let Action::SendCommand(frame) = action else {
                continue;
            };
            match action.command_opcode() {
                Some(opcode) if omit.contains(&opcode) => {
                    debug!("[SCRIPT] omitting {:#x}", opcode);
                }
                Some(_) => buffer.write(frame)?,
                None => warn!("[SCRIPT] skipping non-command frame"),
            }
        }
        Ok(buffer.position())
    }
}

/// Iterator over service pack records
///
/// Yields an error once for a damaged record and then stops.
#[derive(Debug, Clone)]
pub struct Actions<'b> {
    rest: &'b [u8],
}

impl<'b> Actions<'b> {
    fn decode(&mut self) -> Result<Action<'b>, Error> {
        let (header, rest) = self
            .rest
            .split_at_checked(RECORD_HEADER_SIZE)
            .ok_or(Error::MalformedScript)?;
        let code = u16::from_le_bytes([header[0], header[1]]);
        let size = usize::from(u16::from_le_bytes([header[2], header[3]]));
        let (data, rest) = rest.split_at_checked(size).ok_or(Error::MalformedScript)?;
        self.rest = rest;

        match code {
            action::SEND_COMMAND => Ok(Action::SendCommand(data)),
            action::WAIT_EVENT => {
                let timeout_ms = le_u32(data, 0)?;
                let length = usize::try_from(le_u32(data, 4)?).map_err(|_| Error::MalformedScript)?;
                let event = data
                    .get(8..)
                    .and_then(|event| event.get(..length))
                    .ok_or(Error::MalformedScript)?;
                Ok(Action::WaitEvent { timeout_ms, event })
            }
            action::SERIAL_PORT_PARAMETERS => Ok(Action::SerialPortParameters {
                baud: le_u32(data, 0)?,
                flow_control: le_u32(data, 4)?.into(),
            }),
            action::RUN_SCRIPT => Ok(Action::RunScript(until_nul(data))),
            action::REMARKS => Ok(Action::Remarks(until_nul(data))),
            other => {
                warn!("[SCRIPT] unknown BTS action {}", other);
                Err(Error::MalformedScript)
            }
        }
    }
}

impl<'b> Iterator for Actions<'b> {
    type Item = Result<Action<'b>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let action = self.decode();
        if action.is_err() {
            self.rest = &[];
        }
        Some(action)
    }
}

fn le_u32(data: &[u8], at: usize) -> Result<u32, Error> {
    data.get(at..at + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(Error::MalformedScript)
}

fn until_nul(data: &[u8]) -> &[u8] {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    &data[..end]
}
