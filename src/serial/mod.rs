//! # Serial Communication Module
//!
//! Transport boundary of the ground station.
//!
//! This module handles:
//! - Opening the serial port at an operator-selected baud rate (8N1)
//! - Splitting the stream into independent read and write halves
//! - Listing the ports currently present
//! - Newline framing of the inbound byte stream

pub mod framing;
pub mod port_trait;

pub use framing::LineFramer;
pub use port_trait::{PortOpener, PortReader, PortWriter, Transport};

use crate::error::{GroundError, Result};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Opens real serial ports through `tokio-serial`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSerialOpener;

impl TokioSerialOpener {
    /// Open a specific serial port with 8N1 settings
    ///
    /// # Arguments
    ///
    /// * `path` - Device path (e.g., "/dev/ttyUSB0" or "COM3")
    /// * `baud` - Baud rate
    fn open_port(path: &str, baud: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| GroundError::Transport(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

impl PortOpener for TokioSerialOpener {
    /// Must be called from within a tokio runtime
    fn open(&self, port: &str, baud: u32) -> Result<Transport> {
        debug!("Trying to open serial port: {} @ {}", port, baud);
        let stream = Self::open_port(port, baud)?;
        let (reader, writer) = tokio::io::split(stream);
        info!("Successfully opened {} @ {} baud", port, baud);

        Ok(Transport {
            reader: Box::new(reader),
            writer: Box::new(writer),
            description: format!("{} @ {} baud, 8N1", port, baud),
        })
    }

    fn list(&self) -> Vec<String> {
        available_ports()
    }
}

/// Names of the serial ports currently present
///
/// An enumeration failure is logged and reported as an empty list.
pub fn available_ports() -> Vec<String> {
    match tokio_serial::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!("Error updating ports: {}", e);
            Vec::new()
        }
    }
}
