//! Byte-stream transports.
//!
//! [`Transport`] is implemented for every `AsyncRead + AsyncWrite` stream, so
//! a `tokio_serial::SerialStream`, a TCP socket, or an in-memory
//! [`tokio::io::DuplexStream`] can all back a
//! [`Connection`][crate::link::Connection].

use inolink_types::InoError;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

/// Port identifier that selects the built-in [`SimulatedBoard`][crate::sim::SimulatedBoard].
pub const SIM_PORT: &str = "sim";

/// An exclusively owned, bidirectional byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Open a real serial port at `baud_rate` (8N1, no flow control).
///
/// # Errors
///
/// Returns [`InoError::Disconnected`] when the port does not exist or cannot
/// be opened.
pub fn open_serial(port: &str, baud_rate: u32) -> Result<Box<dyn Transport>, InoError> {
    let builder = tokio_serial::new(port, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None);
    let stream = tokio_serial::SerialStream::open(&builder)
        .map_err(|e| InoError::Disconnected(format!("cannot open serial port {port}: {e}")))?;
    info!(port, baud_rate, "serial port opened");
    Ok(Box::new(stream))
}

/// Names of the serial ports currently visible to the OS.
pub fn available_ports() -> Result<Vec<String>, InoError> {
    tokio_serial::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .map_err(|e| InoError::Config(format!("cannot enumerate serial ports: {e}")))
}
