// src/link/transport.rs
//! Byte stream transports the link can run over

use crate::error::{GnssError, Result};
use std::future::Future;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

/// Serial Port Profile service class, for hosts binding the RFCOMM channel.
pub const SPP_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";

/// Opens fresh connections to a receiver.
///
/// Lines are read from and commands written to the returned stream; dropping
/// it closes the connection.
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Whether the transport itself (the adapter) can be used at all.
    fn is_available(&self) -> bool;

    /// Whether `address` names a device this transport can reach.
    fn has_device(&self, address: &str) -> bool;

    fn open(&self, address: &str) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// RFCOMM-bound serial devices such as `/dev/rfcomm0`.
#[derive(Debug, Clone)]
pub struct SerialTransport {
    baud_rate: u32,
}

impl SerialTransport {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl Transport for SerialTransport {
    type Stream = SerialStream;

    fn is_available(&self) -> bool {
        tokio_serial::available_ports().is_ok()
    }

    fn has_device(&self, address: &str) -> bool {
        Path::new(address).exists()
    }

    fn open(&self, address: &str) -> impl Future<Output = Result<Self::Stream>> + Send {
        let address = address.to_string();
        let baud_rate = self.baud_rate;
        async move {
            debug!(%address, baud_rate, "Opening serial device");
            tokio_serial::new(&address, baud_rate)
                .open_native_async()
                .map_err(|e| {
                    GnssError::Connection(format!("Failed to open serial port {}: {}", address, e))
                })
        }
    }
}

/// List the serial ports the system knows about.
pub fn available_ports() -> Result<Vec<tokio_serial::SerialPortInfo>> {
    tokio_serial::available_ports()
        .map_err(|e| GnssError::TransportUnavailable(format!("Failed to list serial ports: {}", e)))
}
