use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::info;

use crate::error::Error;

/// Line framing codec.
pub(crate) mod lines;

/// The baud rate the Schellenberg USB stick talks at.
pub const DEFAULT_BAUD: u32 = 9600;

/// Open the serial port the microcontroller is attached to.
///
/// The tty should be along the lines of `/dev/ttyACM0` on unix,
/// and `COMx` on Windows.
pub fn open(path: &str, baud: u32) -> Result<SerialStream, Error> {
    info!(%path, %baud, "Opening serial port");

    tokio_serial::new(path, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| {
            Error::Handshake(format!("Could not open port at {path}, problem: {e:#?}"))
        })
}
