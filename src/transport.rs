//! Byte channel the protocol runs over.

use crate::error::TransportError;
use crate::settings::PortSettings;
use log::debug;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A duplex byte stream with bounded reads and writes.
pub trait Transport: Send {
    fn open(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Writes all of `bytes`, failing with [`TransportError::WriteTimeout`]
    /// when the channel does not accept them in time.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Returns whatever is currently available, possibly nothing.
    fn read_all(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Transport handle shared by every command execution of one device
pub type SharedTransport<T> = Arc<Mutex<T>>;

/// UART connection to the sensor
pub struct SerialTransport {
    settings: PortSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Creates a closed transport; call [`Transport::open`] before use.
    pub fn new(settings: PortSettings) -> Self {
        Self {
            settings,
            port: None,
        }
    }

    /// Creates and opens a transport on `path` with default settings.
    pub fn open_path(path: &str) -> Result<Self, TransportError> {
        let mut transport = Self::new(PortSettings {
            path: path.to_string(),
            ..PortSettings::default()
        });
        transport.open()?;
        Ok(transport)
    }

    /// List available serial ports
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
        Ok(serialport::available_ports()?)
    }

    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.settings.timeout_ms)
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let port = serialport::new(&self.settings.path, self.settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.timeout())
            .open()?;
        debug!("opened {} at {} baud", self.settings.path, self.settings.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let timeout = self.timeout();
        let port = self.port()?;
        port.clear(ClearBuffer::Input)?;
        port.write_all(bytes)
            .and_then(|()| port.flush())
            .map_err(|e| match e.kind() {
                ErrorKind::TimedOut => TransportError::WriteTimeout(timeout),
                _ => e.into(),
            })
    }

    fn read_all(&mut self) -> Result<Vec<u8>, TransportError> {
        let timeout = self.timeout();
        let port = self.port()?;
        let available = port.bytes_to_read()? as usize;
        let mut buffer = vec![0u8; available];
        if available > 0 {
            port.read_exact(&mut buffer).map_err(|e| match e.kind() {
                ErrorKind::TimedOut => TransportError::ReadTimeout(timeout),
                _ => e.into(),
            })?;
        }
        Ok(buffer)
    }
}
