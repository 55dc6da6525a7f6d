//! Command Complete return parameters
//!
//! Commands issued outside a script (or whose completion the script does not claim)
//! land here. The handful the host understands are decoded through the `bt-hci`
//! command `Return` types into [`LocalDeviceInfo`]; everything else is dropped.

use crate::constants::PAGE_TIMEOUT_UNIT_US;
use crate::hci::opcode::{LE_READ_SUPPORTED_STATES, READ_PAGE_TIMEOUT};
use crate::{BluetoothAddress, LocalDeviceInfo};
use bt_hci::cmd::info::{
    ReadBdAddr, ReadBufferSize, ReadLocalSupportedFeatures, ReadLocalVersionInformation,
};
use bt_hci::cmd::le::LeReadBufferSize;
use bt_hci::cmd::{Cmd, Opcode, SyncCmd};
use bt_hci::param::{CoreSpecificationVersion, Status};
use bt_hci::{FromHciBytes, FromHciBytesError};

/// Decode `returns`, the return parameters of `opcode` following the status byte.
///
/// Returns whether the opcode was recognised.
///
/// # Errors
/// Returns [`FromHciBytesError`] if the parameters do not match the command's return
/// layout.
pub(crate) fn apply(
    info: &mut LocalDeviceInfo,
    opcode: Opcode,
    status: Status,
    returns: &[u8],
) -> Result<bool, FromHciBytesError> {
    if let Err(err) = status.to_result() {
        warn!("[HCI] command {:#x} failed: {:?}", opcode.to_raw(), err);
        return Ok(false);
    }

    if opcode == ReadLocalVersionInformation::OPCODE {
        let version = return_params::<ReadLocalVersionInformation>(returns)?;
        info.hci_version = Some(core_spec_version_to_u8(version.hci_version));
        info.hci_revision = Some(version.hci_subversion);
        info.lmp_version = Some(core_spec_version_to_u8(version.lmp_version));
        info.manufacturer_name = Some(version.company_identifier);
        info.lmp_subversion = Some(version.lmp_subversion);
        debug!(
            "[HCI] HCI version {:?}, manufacturer {:?}",
            info.hci_version, info.manufacturer_name
        );
    } else if opcode == ReadLocalSupportedFeatures::OPCODE {
        info.local_features = Some(<[u8; 8]>::from_hci_bytes_complete(returns)?);
    } else if opcode == ReadBdAddr::OPCODE {
        let bd_addr = return_params::<ReadBdAddr>(returns)?;
        let addr =
            BluetoothAddress::try_from(bd_addr).map_err(|_| FromHciBytesError::InvalidSize)?;
        info!("[HCI] BD_ADDR {}", addr);
        info.bd_addr = Some(addr);
    } else if opcode == ReadBufferSize::OPCODE {
        let sizes = return_params::<ReadBufferSize>(returns)?;
        info.acl_data_packet_length = Some(sizes.acl_data_packet_length);
        info.sco_data_packet_length = Some(sizes.synchronous_data_packet_length);
        info.total_num_acl_data_packets = Some(sizes.total_num_acl_data_packets);
        info.total_num_sco_data_packets = Some(sizes.total_num_synchronous_data_packets);
        debug!(
            "[HCI] ACL {:?} x {:?}",
            info.total_num_acl_data_packets, info.acl_data_packet_length
        );
    } else if opcode == LeReadBufferSize::OPCODE {
        let sizes = return_params::<LeReadBufferSize>(returns)?;
        info.le_acl_data_packet_length = Some(sizes.le_acl_data_packet_length);
        info.total_num_le_acl_data_packets = Some(sizes.total_num_le_acl_data_packets);
    } else if opcode.to_raw() == READ_PAGE_TIMEOUT {
        let slots = u16::from_hci_bytes_complete(returns)?;
        let usec = u32::from(slots) * PAGE_TIMEOUT_UNIT_US;
        debug!("[HCI] page timeout {} us", usec);
        info.page_timeout_us = Some(usec);
    } else if opcode.to_raw() == LE_READ_SUPPORTED_STATES {
        info.le_supported_states = Some(<[u8; 8]>::from_hci_bytes_complete(returns)?);
    } else {
        debug!("[HCI] ignoring completion of {:#x}", opcode.to_raw());
        return Ok(false);
    }
    Ok(true)
}

fn return_params<C>(returns: &[u8]) -> Result<C::Return, FromHciBytesError>
where
    C: SyncCmd,
    C::Return: for<'de> FromHciBytes<'de>,
{
    C::Return::from_hci_bytes_complete(returns)
}

/// Version number as carried on the wire
fn core_spec_version_to_u8(version: CoreSpecificationVersion) -> u8 {
    match version {
        CoreSpecificationVersion::VERSION_1_1 => 0x01,
        CoreSpecificationVersion::VERSION_1_2 => 0x02,
        CoreSpecificationVersion::VERSION_2_0_EDR => 0x03,
        CoreSpecificationVersion::VERSION_2_1_EDR => 0x04,
        CoreSpecificationVersion::VERSION_3_0_HS => 0x05,
        CoreSpecificationVersion::VERSION_4_0 => 0x06,
        CoreSpecificationVersion::VERSION_4_1 => 0x07,
        CoreSpecificationVersion::VERSION_4_2 => 0x08,
        CoreSpecificationVersion::VERSION_5_0 => 0x09,
        CoreSpecificationVersion::VERSION_5_1 => 0x0A,
        CoreSpecificationVersion::VERSION_5_2 => 0x0B,
        CoreSpecificationVersion::VERSION_5_3 => 0x0C,
        CoreSpecificationVersion::VERSION_5_4 => 0x0D,
        _ => 0x00,
    }
}
