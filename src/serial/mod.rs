//! # Serial Communication Module
//!
//! Handles the UART link to the RFID reader.
//!
//! This module handles:
//! - Opening the reader port with the line settings of its type
//! - Async byte reception
//! - Handing each received byte to the decoder
//!
//! tokio-serial delivers bytes only and does not report framing or parity
//! errors per byte, so the host never calls `Tamdl::uart_line_error`. The
//! FERR/PERR counters are fed by hosts whose UART driver reports them.

use crate::error::{Result, TamdlError};
use crate::rfid::protocol::{LineParity, LineSettings};
use crate::rfid::RfidType;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

/// Receive buffer size
const READ_CHUNK: usize = 64;

/// RFID reader serial port
pub struct RfidSerial {
    /// Serial port handle
    port: tokio_serial::SerialStream,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
    kind: RfidType,
}

impl std::fmt::Debug for RfidSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RfidSerial")
            .field("device_path", &self.device_path)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

fn parity(parity: LineParity) -> tokio_serial::Parity {
    match parity {
        LineParity::None => tokio_serial::Parity::None,
        LineParity::Even => tokio_serial::Parity::Even,
    }
}

impl RfidSerial {
    /// Open the reader port
    ///
    /// # Arguments
    ///
    /// * `path` - Device path (e.g., "/dev/ttyUSB0")
    /// * `kind` - Reader type selecting baud rate and parity
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tamdl::rfid::RfidType;
    /// use tamdl::serial::RfidSerial;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let serial = RfidSerial::open("/dev/ttyUSB0", RfidType::Sr)?;
    ///     Ok(())
    /// }
    /// ```
    pub fn open(path: &str, kind: RfidType) -> Result<Self> {
        let settings = kind.line_settings();
        debug!(
            "Opening RFID port {} at {} baud, parity {:?}",
            path, settings.baud_rate, settings.parity
        );

        let port = Self::open_port(path, settings)?;
        info!("Opened {} RFID reader at {}", kind, path);

        Ok(Self {
            port,
            device_path: path.to_string(),
            kind,
        })
    }

    fn open_port(path: &str, settings: LineSettings) -> Result<tokio_serial::SerialStream> {
        tokio_serial::new(path, settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(parity(settings.parity))
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TamdlError::Serial(format!("Failed to open {}: {}", path, e)))
    }

    /// Feed received bytes to `on_byte` until the port closes
    ///
    /// # Errors
    ///
    /// Returns error on a read failure
    pub async fn run<F: FnMut(u8)>(&mut self, on_byte: F) -> Result<usize> {
        pump_bytes(&mut self.port, on_byte).await
    }

    /// Device path of the opened port
    #[must_use]
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Reader type the port was opened for
    #[must_use]
    pub fn kind(&self) -> RfidType {
        self.kind
    }
}

/// Read from `reader` until EOF, calling `on_byte` for every byte
///
/// # Returns
///
/// * `Result<usize>` - Number of bytes delivered
///
/// # Errors
///
/// Returns error if a read fails
pub async fn pump_bytes<R, F>(reader: &mut R, mut on_byte: F) -> Result<usize>
where
    R: AsyncRead + Unpin,
    F: FnMut(u8),
{
    let mut buf = [0u8; READ_CHUNK];
    let mut total = 0;

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| TamdlError::Serial(format!("Read failed: {}", e)))?;
        if n == 0 {
            debug!("Serial stream closed after {} bytes", total);
            return Ok(total);
        }
        buf[..n].iter().copied().for_each(&mut on_byte);
        total += n;
    }
}
