//! Native asynchronous serial port support for [`Interface`](crate::Interface).
//!
//! Uses the [`serial2-tokio`](https://crates.io/crates/serial2-tokio) crate.

extern crate std;

use crate::Error;
use embedded_io_adapters::tokio_1::FromTokio;
use embedded_io_async::ErrorType;
use log::debug;
use serial2_tokio::{CharSize, FlowControl, Parity, SerialPort, Settings, StopBits};

/// Serial port type implementing [`Read`](embedded_io_async::Read)
/// and [`Write`](embedded_io_async::Write).
pub type Port = FromTokio<SerialPort>;

/// Port-specific error type to be used as `E` for the generic [`Error<E>`] type.
pub type PortError = <Port as ErrorType>::Error;

/// Opens a native serial port at the given path.
///
/// The port is configured for raw 8N1 communication at `baud_rate`
/// (usually [`DEFAULT_BAUD_RATE`](crate::DEFAULT_BAUD_RATE)).
/// Stale data left in the buffers by a previous session is discarded.
///
/// Returns a [`Port`] that can be passed to [`Interface::new`](crate::Interface::new)
/// or [`Device::connect`](crate::device::Device::connect).
pub fn open(path: &str, baud_rate: u32) -> Result<Port, Error<PortError>> {
    debug!("Opening serial port {path} at {baud_rate} baud");

    let port = SerialPort::open(path, |mut settings: Settings| {
        settings.set_raw();
        settings.set_baud_rate(baud_rate)?;
        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::One);
        settings.set_parity(Parity::None);
        settings.set_flow_control(FlowControl::None);

        Ok(settings)
    })?;

    port.discard_buffers()?;

    Ok(FromTokio::new(port))
}
