//! Processor - runs the transport loops and the host together
//!
//! The stack needs three long-running futures sharing one [`H4`]:
//!
//! * **receiver**: assembles frames from the UART reader ([`H4::run_receiver`])
//! * **transmitter**: writes queued frames one at a time ([`H4::run_transmitter`])
//! * **host**: dispatches received frames ([`HostController::run`])
//!
//! [`run`] joins the two transport loops and races them against the host. They can
//! equally be spawned as separate Embassy tasks when the transport lives in a `static`.
//!
//! # Example
//!
//! ```rust,ignore
//! use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
//! use gattbird::{HostOptions, att::AttributeTable, gatt, h4::H4, host::HostController};
//! use gattbird::pool::PacketStorage;
//! use gattbird::script::Script;
//!
//! static STORAGE: StaticCell<PacketStorage> = StaticCell::new();
//!
//! let mut table = AttributeTable::new();
//! gatt::add_gap_service(&mut table, "gattbird", None)?;
//! gatt::add_gatt_service(&mut table)?;
//!
//! let h4: H4<'_, CriticalSectionRawMutex> = H4::new(STORAGE.init(PacketStorage::new()));
//! let mut host = HostController::new(&h4, &table, HostOptions::default())?;
//!
//! // bring the controller up first, then serve
//! let mut init = Script::new(INIT_SCRIPT);
//! join3(
//!     h4.run_receiver(&mut rx),
//!     h4.run_transmitter(&mut tx),
//!     host.execute(&mut init, || Timer::after_millis(500)),
//! ).await;
//! gattbird::processor::run(&h4, rx, tx, &mut host).await?;
//! ```

use crate::Error;
use crate::h4::H4;
use crate::host::HostController;
use embassy_futures::join::join;
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io_async::{Read, Write};

/// Run the receiver, the transmitter and the host until the transport stops.
///
/// When either transport loop returns, the other is asked to stop as well, so both
/// hand their in-flight frames back; every frame still queued is then returned to its
/// pool before this function returns.
///
/// # Errors
/// Returns [`Error::Transport`] if the byte stream failed.
pub async fn run<'a, M: RawMutex, R: Read, W: Write>(
    h4: &H4<'a, M>,
    reader: R,
    writer: W,
    host: &mut HostController<'_, 'a, '_, M>,
) -> Result<(), Error> {
    info!("[PROCESSOR] starting");
    let transport = join(
        async {
            let result = h4.run_receiver(reader).await;
            debug!("[PROCESSOR] receiver stopped");
            h4.stop();
            result
        },
        async {
            let result = h4.run_transmitter(writer).await;
            debug!("[PROCESSOR] transmitter stopped");
            h4.stop();
            result
        },
    );

    let result = match select(transport, host.run()).await {
        Either::First((received, transmitted)) => received.and(transmitted),
        Either::Second(()) => Ok(()),
    };

    h4.reset();
    match result {
        Ok(()) => info!("[PROCESSOR] stopped"),
        Err(e) => error!("[PROCESSOR] stopped: {:?}", e),
    }
    result
}
