//! Opcodes `bt-hci` does not model
//!
//! Standard commands and events come from [`bt_hci::cmd`] and [`bt_hci::event`]. What
//! remains here are the TI vendor commands found in controller init scripts and two
//! informational commands whose return parameters are kept as raw fields.
//! An opcode packs the 6-bit OGF above the 10-bit OCF.

/// Command opcodes
pub mod opcode {
    /// `Read_Page_Timeout`
    pub const READ_PAGE_TIMEOUT: u16 = 0x0C17;
    /// `LE_Read_Supported_States`
    pub const LE_READ_SUPPORTED_STATES: u16 = 0x201C;
    /// Vendor baud rate change for PAN13xx (TI CC256x) controllers
    pub const PAN13XX_CHANGE_BAUD_RATE: u16 = 0xFF36;
    /// Vendor sleep mode configuration for TI controllers
    pub const SLEEP_MODE_CONFIGURATIONS: u16 = 0xFD0C;
    /// Vendor eHCILL parameters for TI controllers
    pub const HCILL_PARAMETERS: u16 = 0xFD2B;

    /// Opcode Group Field
    #[must_use]
    pub const fn ogf(opcode: u16) -> u8 {
        (opcode >> 10) as u8
    }

    /// Opcode Command Field
    #[must_use]
    pub const fn ocf(opcode: u16) -> u16 {
        opcode & 0x03FF
    }
}

#[cfg(test)]
mod tests {
    use super::opcode::*;
    use bt_hci::cmd::Cmd;
    use bt_hci::cmd::info::ReadBdAddr;

    #[test]
    fn test_opcode_fields() {
        assert_eq!(ogf(READ_PAGE_TIMEOUT), 0x03);
        assert_eq!(ocf(READ_PAGE_TIMEOUT), 0x0017);
        assert_eq!(ogf(LE_READ_SUPPORTED_STATES), 0x08);
        assert_eq!(ogf(PAN13XX_CHANGE_BAUD_RATE), 0x3F);
        assert_eq!(ocf(PAN13XX_CHANGE_BAUD_RATE), 0x0336);
        // same packing as the bt-hci opcodes
        assert_eq!(ogf(ReadBdAddr::OPCODE.to_raw()), 0x04);
        assert_eq!(ocf(ReadBdAddr::OPCODE.to_raw()), 0x0009);
    }
}
