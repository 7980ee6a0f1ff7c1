use crate::command::Command;
use crate::constants::*;
use crate::error::{Result, ShdlcError};
use crate::execution::CommandExecution;
use crate::frame::MosiFrame;
use crate::transport::{SharedTransport, Transport};
use crate::types::MeasurementFormat;
use std::sync::{Arc, Mutex, PoisonError};

/// SPS30 command interface.
///
/// Every method builds the request for one command and hands back a
/// [`CommandExecution`] bound to the shared transport. Call
/// [`CommandExecution::execute`] to block for the answer, or
/// [`CommandExecution::execute_async`] to get it through a callback.
///
/// ```no_run
/// use sps30_shdlc::{Sps30, SerialTransport, Response};
///
/// let sensor = Sps30::new(SerialTransport::open_path("/dev/ttyUSB0")?);
/// let completed = sensor.get_version()?.execute()?;
/// if let Response::Versions(v) = completed.response()? {
///     println!("firmware {}", v.firmware);
/// }
/// # Ok::<(), sps30_shdlc::ShdlcError>(())
/// ```
pub struct Sps30<T> {
    transport: SharedTransport<T>,
    format: MeasurementFormat,
}

impl<T> Clone for Sps30<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            format: self.format,
        }
    }
}

impl<T: Transport + 'static> Sps30<T> {
    pub fn new(transport: T) -> Self {
        Self::from_shared(Arc::new(Mutex::new(transport)))
    }

    pub fn from_shared(transport: SharedTransport<T>) -> Self {
        Self {
            transport,
            format: MeasurementFormat::default(),
        }
    }

    /// Number format requested by [`Sps30::start_measurement`]
    pub fn with_format(mut self, format: MeasurementFormat) -> Self {
        self.format = format;
        self
    }

    pub fn format(&self) -> MeasurementFormat {
        self.format
    }

    pub fn transport(&self) -> &SharedTransport<T> {
        &self.transport
    }

    /// Opens the transport unless it already is.
    pub fn open(&self) -> Result<()> {
        let mut transport = self.transport.lock().unwrap_or_else(PoisonError::into_inner);
        if !transport.is_open() {
            transport.open()?;
        }
        Ok(())
    }

    fn prepare(&self, command: Command, payload: Vec<u8>) -> Result<CommandExecution<T>> {
        let request = MosiFrame::new(command, payload)?;
        Ok(CommandExecution::new(Arc::clone(&self.transport), request))
    }

    pub fn start_measurement(&self) -> Result<CommandExecution<T>> {
        self.prepare(
            Command::StartMeasurement,
            vec![START_MEASUREMENT_SUBCOMMAND, self.format.code()],
        )
    }

    pub fn stop_measurement(&self) -> Result<CommandExecution<T>> {
        self.prepare(Command::StopMeasurement, Vec::new())
    }

    /// Answered without data while no new values are available
    pub fn read_measured_values(&self) -> Result<CommandExecution<T>> {
        self.prepare(Command::ReadMeasuredValues, Vec::new())
    }

    /// Only accepted while idle
    pub fn sleep(&self) -> Result<CommandExecution<T>> {
        self.prepare(Command::Sleep, Vec::new())
    }

    /// The execution sends the wake-up pulse ahead of the frame.
    pub fn wake_up(&self) -> Result<CommandExecution<T>> {
        self.prepare(Command::WakeUp, Vec::new())
    }

    /// Only accepted while measuring
    pub fn start_fan_cleaning(&self) -> Result<CommandExecution<T>> {
        self.prepare(Command::StartFanCleaning, Vec::new())
    }

    pub fn get_auto_cleaning_interval(&self) -> Result<CommandExecution<T>> {
        self.prepare(Command::AutoCleaningInterval, vec![AUTO_CLEAN_SUBCOMMAND])
    }

    /// Sets the automatic fan cleaning period in seconds.
    ///
    /// # Errors
    ///
    /// [`ShdlcError::InvalidConfiguration`] unless `0 < seconds < 2^32`; nothing
    /// is sent in that case.
    pub fn set_auto_cleaning_interval(&self, seconds: u64) -> Result<CommandExecution<T>> {
        let interval = u32::try_from(seconds)
            .ok()
            .filter(|&s| s > 0)
            .ok_or_else(|| {
                ShdlcError::InvalidConfiguration(format!(
                    "auto cleaning interval must be within 1..={} s, got {}",
                    u32::MAX,
                    seconds
                ))
            })?;

        let mut payload = vec![AUTO_CLEAN_SUBCOMMAND];
        payload.extend_from_slice(&interval.to_be_bytes());
        self.prepare(Command::AutoCleaningInterval, payload)
    }

    pub fn get_product_type(&self) -> Result<CommandExecution<T>> {
        self.prepare(Command::DeviceInformation, vec![INFO_PRODUCT_TYPE])
    }

    pub fn get_serial_number(&self) -> Result<CommandExecution<T>> {
        self.prepare(Command::DeviceInformation, vec![INFO_SERIAL_NUMBER])
    }

    pub fn get_version(&self) -> Result<CommandExecution<T>> {
        self.prepare(Command::ReadVersion, Vec::new())
    }

    /// Reads the status register, clearing it afterwards when `clear` is set.
    pub fn get_status(&self, clear: bool) -> Result<CommandExecution<T>> {
        self.prepare(Command::ReadDeviceStatus, vec![u8::from(clear)])
    }

    /// The execution keeps the transport until the device has rebooted.
    pub fn reset(&self) -> Result<CommandExecution<T>> {
        self.prepare(Command::Reset, Vec::new())
    }
}
