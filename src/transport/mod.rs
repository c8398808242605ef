//! # Transport Adapter
//!
//! Owns the physical byte stream. The link layer talks to two small traits:
//! [`Transport`] opens connections (and re-opens them during reconnection),
//! [`TransportLink`] is one open byte stream. The serial implementation sits
//! behind the `serial` feature; the test suite substitutes an in-memory mock
//! through the same seam.
//!
//! ## Read contract
//!
//! `TransportLink::read` must be bounded: it returns `Ok(n)` with whatever is
//! available, `Ok(0)` when nothing arrived inside the internal timeout, and
//! `Err` only for real stream failures. Timeout-flavored errors
//! (`TimedOut`/`WouldBlock`/`Interrupted`) are treated as "no data" by the
//! read loop, everything else as loss of the stream.

use serde::Serialize;

use crate::link::error::{LinkError, Result};

/// Parameters needed to (re)open a transport. Framing is fixed at
/// 8 data bits / 1 stop bit / no parity.
#[derive(Debug, Clone, Serialize)]
pub struct TransportConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Bound on a single blocking read, milliseconds.
    pub read_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            read_timeout_ms: 100,
        }
    }
}

/// One open, full-duplex byte stream.
pub trait TransportLink: Send {
    /// Read available bytes; see the module-level read contract.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()>;
    fn flush(&mut self) -> std::io::Result<()>;
}

/// Factory for [`TransportLink`]s; the reconnection supervisor re-invokes
/// `open` with the last-used configuration.
pub trait Transport: Send + Sync {
    fn open(&self, config: &TransportConfig) -> Result<Box<dyn TransportLink>>;
}

/// Metadata for one enumerable serial port.
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    pub name: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

#[cfg(feature = "serial")]
mod serial {
    use super::*;
    use log::debug;
    use serialport::SerialPort;
    use std::io::{Read, Write};
    use std::time::Duration;

    /// [`Transport`] over a USB/UART serial port.
    pub struct SerialTransport;

    struct SerialLink {
        port: Box<dyn SerialPort>,
    }

    impl TransportLink for SerialLink {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e),
            }
        }

        fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
            self.port.write_all(data)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.port.flush()
        }
    }

    impl Transport for SerialTransport {
        fn open(&self, config: &TransportConfig) -> Result<Box<dyn TransportLink>> {
            if config.port.is_empty() {
                return Err(LinkError::PortUnavailable("no port configured".into()));
            }
            let mut builder = serialport::new(&config.port, config.baud_rate)
                .timeout(Duration::from_millis(config.read_timeout_ms));
            // Some USB serial adapters need the framing spelled out
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
            let mut port = builder.open().map_err(map_open_error)?;

            // Toggle DTR/RTS so ESP32-class boards wake up, then drain any
            // buffered boot chatter so the framer starts on a clean line.
            let _ = port.write_data_terminal_ready(true);
            let _ = port.write_request_to_send(true);
            std::thread::sleep(Duration::from_millis(150));
            let mut purge = [0u8; 512];
            if let Ok(available) = port.bytes_to_read() {
                if available > 0 {
                    let _ = port.read(&mut purge);
                }
            }
            debug!(
                "serial port {} open at {} baud",
                config.port, config.baud_rate
            );
            Ok(Box::new(SerialLink { port }))
        }
    }

    fn map_open_error(e: serialport::Error) -> LinkError {
        use serialport::ErrorKind;
        match e.kind() {
            ErrorKind::NoDevice => LinkError::PortUnavailable(e.to_string()),
            ErrorKind::InvalidInput => LinkError::PortUnavailable(e.to_string()),
            ErrorKind::Io(kind) => match kind {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    LinkError::PortUnavailable(e.to_string())
                }
                std::io::ErrorKind::TimedOut => LinkError::OpenTimeout,
                _ => LinkError::Transport(std::io::Error::new(kind, e.to_string())),
            },
            ErrorKind::Unknown => LinkError::NotSupported,
        }
    }

    /// Enumerate serial ports with whatever USB metadata the OS exposes.
    pub fn available_ports() -> Vec<PortInfo> {
        let ports = serialport::available_ports().unwrap_or_default();
        ports
            .into_iter()
            .map(|p| {
                let (manufacturer, product, serial_number) = match p.port_type {
                    serialport::SerialPortType::UsbPort(usb) => {
                        (usb.manufacturer, usb.product, usb.serial_number)
                    }
                    _ => (None, None, None),
                };
                PortInfo {
                    name: p.port_name,
                    manufacturer,
                    product,
                    serial_number,
                }
            })
            .collect()
    }
}

#[cfg(feature = "serial")]
pub use serial::{available_ports, SerialTransport};
