//! Particulate matter meter: the SPS30 commands plus recovery from the
//! device states a long running service keeps running into.
//!
//! The meter handles three situations on its own, each with a single retry:
//!
//! - the version read finds the sensor asleep: wake it up, read again
//! - sleep is refused because a measurement runs: stop it, sleep again
//! - a measurement finds the sensor asleep or idle: wake it up or start the
//!   measurement, read again
//!
//! Every other failure reaches the caller unchanged.

use crate::command::{Command, Version};
use crate::device::Sps30;
use crate::error::{Result, ShdlcError, TransportError};
use crate::execution::{CommandExecution, CompletedCommand};
use crate::frame::Response;
use crate::settings::MeterSettings;
use crate::transport::Transport;
use crate::types::{DeviceStatus, Measurement, Versions};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Granularity at which a waiting sampler notices a stop request
const STOP_POLL: Duration = Duration::from_millis(10);

/// Cooperative stop flag for continuous sampling
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleeps for `timeout` or until stopped, returns true when stopped.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(STOP_POLL.min(deadline - now));
        }
        true
    }
}

/// When continuous sampling ends on its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplingLimits {
    /// Samples to push, failures included
    pub max_count: Option<usize>,
    pub duration: Option<Duration>,
}

impl SamplingLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn count(max_count: usize) -> Self {
        Self {
            max_count: Some(max_count),
            duration: None,
        }
    }

    pub fn duration(duration: Duration) -> Self {
        Self {
            max_count: None,
            duration: Some(duration),
        }
    }

    fn exhausted(&self, count: usize, elapsed: Duration) -> bool {
        self.max_count.is_some_and(|max| count >= max)
            || self.duration.is_some_and(|max| elapsed >= max)
    }
}

struct Sampler {
    stop: StopSignal,
    handle: JoinHandle<()>,
}

struct MeterState<T> {
    device: Sps30<T>,
    settings: MeterSettings,
    versions: OnceLock<Versions>,
    serial_number: OnceLock<String>,
    product_type: OnceLock<String>,
}

impl<T: Transport + 'static> MeterState<T> {
    /// Validates, checks firmware support, then runs the command
    fn run(&self, execution: Result<CommandExecution<T>>) -> Result<CompletedCommand> {
        let execution = execution?;
        self.ensure_supported(execution.command())?;
        execution.execute()
    }

    fn command(&self, execution: Result<CommandExecution<T>>) -> Result<()> {
        self.run(execution).map(|_| ())
    }

    fn query<R>(
        &self,
        execution: Result<CommandExecution<T>>,
        pick: impl FnOnce(Response) -> Option<R>,
    ) -> Result<R> {
        let completed = self.run(execution)?;
        let frame = completed.result()?;
        pick(frame.interpret()?).ok_or(ShdlcError::UnexpectedResponse {
            command: frame.command(),
            length: frame.data().len(),
        })
    }

    fn ensure_supported(&self, command: Command) -> Result<()> {
        let firmware = self.versions()?.firmware;
        let required = command.min_version();
        if firmware < required {
            return Err(ShdlcError::UnsupportedCommand {
                command,
                required,
                firmware,
            });
        }
        Ok(())
    }

    fn read_versions(&self) -> Result<Versions> {
        let completed = self.device.get_version()?.execute()?;
        match completed.response()? {
            Response::Versions(versions) => Ok(versions),
            _ => Err(ShdlcError::UnexpectedResponse {
                command: Command::ReadVersion,
                length: completed.result()?.data().len(),
            }),
        }
    }

    fn versions(&self) -> Result<Versions> {
        if let Some(versions) = self.versions.get() {
            return Ok(*versions);
        }

        let versions = match self.read_versions() {
            Err(ShdlcError::NoData) => {
                warn!("no answer to version request, waking the sensor up");
                self.device.wake_up()?.execute()?;
                self.read_versions()?
            }
            other => other?,
        };
        debug!("firmware {}, hardware {}, protocol {}", versions.firmware, versions.hardware, versions.protocol);
        Ok(*self.versions.get_or_init(|| versions))
    }

    fn device_info(&self, execution: Result<CommandExecution<T>>) -> Result<String> {
        self.query(execution, |response| match response {
            Response::DeviceInfo(info) => Some(info.info),
            _ => None,
        })
    }

    fn read_measurement(&self) -> Result<Measurement> {
        self.query(self.device.read_measured_values(), |response| match response {
            Response::Measurement(measurement) => Some(measurement),
            _ => None,
        })
    }

    fn measure(&self, may_wake: bool) -> Result<Measurement> {
        match self.read_measurement() {
            Err(ShdlcError::NoData) if may_wake => {
                warn!("no answer to measurement request, waking the sensor up");
                self.command(self.device.wake_up())?;
                self.measure(false)
            }
            Err(ShdlcError::NoNewMeasurement) => match self.command(self.device.start_measurement()) {
                Ok(()) => {
                    warn!("measurement was not running, started it");
                    self.read_measurement()
                }
                // already measuring, the values are just not ready yet
                Err(ShdlcError::CommandNotAllowed { .. }) => Err(ShdlcError::NoNewMeasurement),
                Err(e) => Err(e),
            },
            other => other,
        }
    }

    fn sleep(&self) -> Result<()> {
        match self.command(self.device.sleep()) {
            Err(ShdlcError::CommandNotAllowed { .. }) => {
                warn!("sensor refused to sleep, stopping the measurement first");
                self.command(self.device.stop_measurement())?;
                self.command(self.device.sleep())
            }
            other => other,
        }
    }
}

/// Recovering front end of one SPS30.
///
/// ```no_run
/// use sps30_shdlc::{MeterSettings, ParticulateMatterMeter, SerialTransport, Sps30};
///
/// let sensor = Sps30::new(SerialTransport::open_path("/dev/ttyAMA0")?);
/// let meter = ParticulateMatterMeter::new(sensor, MeterSettings::default())?;
/// let reading = meter.measure()?;
/// println!("PM2.5: {:.1} µg/m³", reading.mass_pm2_5);
/// # Ok::<(), sps30_shdlc::ShdlcError>(())
/// ```
pub struct ParticulateMatterMeter<T: Transport + 'static> {
    state: Arc<MeterState<T>>,
    sampler: Mutex<Option<Sampler>>,
    shut_down: AtomicBool,
}

impl<T: Transport + 'static> ParticulateMatterMeter<T> {
    /// Opens the sensor's transport; nothing is sent yet.
    pub fn new(device: Sps30<T>, settings: MeterSettings) -> Result<Self> {
        let device = device.with_format(settings.measurement_format);
        device.open()?;
        Ok(Self {
            state: Arc::new(MeterState {
                device,
                settings,
                versions: OnceLock::new(),
                serial_number: OnceLock::new(),
                product_type: OnceLock::new(),
            }),
            sampler: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn device(&self) -> &Sps30<T> {
        &self.state.device
    }

    pub fn settings(&self) -> &MeterSettings {
        &self.state.settings
    }

    /// Versions read once and cached; wakes the sensor when it does not answer.
    pub fn versions(&self) -> Result<Versions> {
        self.state.versions()
    }

    pub fn firmware_version(&self) -> Result<Version> {
        Ok(self.versions()?.firmware)
    }

    pub fn hardware_revision(&self) -> Result<u8> {
        Ok(self.versions()?.hardware)
    }

    pub fn protocol_version(&self) -> Result<Version> {
        Ok(self.versions()?.protocol)
    }

    pub fn serial_number(&self) -> Result<String> {
        if let Some(serial) = self.state.serial_number.get() {
            return Ok(serial.clone());
        }
        let serial = self.state.device_info(self.state.device.get_serial_number())?;
        Ok(self.state.serial_number.get_or_init(|| serial).clone())
    }

    pub fn product_type(&self) -> Result<String> {
        if let Some(product) = self.state.product_type.get() {
            return Ok(product.clone());
        }
        let product = self.state.device_info(self.state.device.get_product_type())?;
        Ok(self.state.product_type.get_or_init(|| product).clone())
    }

    /// Reads one sample, waking the sensor or starting the measurement when
    /// needed.
    ///
    /// # Errors
    ///
    /// [`ShdlcError::NoNewMeasurement`] while a running measurement has no
    /// fresh values yet.
    pub fn measure(&self) -> Result<Measurement> {
        self.state.measure(true)
    }

    pub fn start_measurement(&self) -> Result<()> {
        self.state.command(self.state.device.start_measurement())
    }

    pub fn stop_measurement(&self) -> Result<()> {
        self.state.command(self.state.device.stop_measurement())
    }

    /// Puts the sensor to sleep, stopping a running measurement first.
    pub fn sleep(&self) -> Result<()> {
        self.state.sleep()
    }

    pub fn wake_up(&self) -> Result<()> {
        self.state.command(self.state.device.wake_up())
    }

    pub fn clean_fan(&self) -> Result<()> {
        self.state.command(self.state.device.start_fan_cleaning())
    }

    /// Auto cleaning interval in seconds
    pub fn auto_cleaning_interval(&self) -> Result<u32> {
        self.state
            .query(self.state.device.get_auto_cleaning_interval(), |response| match response {
                Response::AutoCleanInterval(interval) => Some(interval.interval_s),
                _ => None,
            })
    }

    pub fn set_auto_cleaning_interval(&self, seconds: u64) -> Result<()> {
        self.state
            .command(self.state.device.set_auto_cleaning_interval(seconds))
    }

    pub fn status(&self, clear: bool) -> Result<DeviceStatus> {
        self.state
            .query(self.state.device.get_status(clear), |response| match response {
                Response::DeviceStatus(status) => Some(status),
                _ => None,
            })
    }

    pub fn reset(&self) -> Result<()> {
        self.state.command(self.state.device.reset())
    }

    /// Samples in the background until stopped or a limit is reached.
    ///
    /// Every outcome of [`ParticulateMatterMeter::measure`] is pushed into
    /// `sink`, failures included, one per sampling interval. Sampling also
    /// ends when the receiving side of `sink` is dropped.
    ///
    /// # Errors
    ///
    /// [`ShdlcError::SamplingActive`] while another sampling task runs.
    pub fn continuous_measurement(
        &self,
        sink: Sender<Result<Measurement>>,
        stop: Option<StopSignal>,
        limits: SamplingLimits,
    ) -> Result<StopSignal> {
        let mut slot = self.sampler.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sampler) = slot.take() {
            if !sampler.handle.is_finished() {
                *slot = Some(sampler);
                return Err(ShdlcError::SamplingActive);
            }
            if sampler.handle.join().is_err() {
                warn!("sampling task panicked");
            }
        }

        let stop = stop.unwrap_or_default();
        let state = Arc::clone(&self.state);
        let signal = stop.clone();
        let handle = thread::Builder::new()
            .name("sps30-sampling".to_string())
            .spawn(move || sample(&state, &sink, &signal, limits))
            .map_err(TransportError::from)?;

        *slot = Some(Sampler {
            stop: stop.clone(),
            handle,
        });
        Ok(stop)
    }

    /// Stops continuous sampling and waits for the task to end.
    pub fn interrupt_continuous_measurement(&self) {
        let sampler = self
            .sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sampler) = sampler {
            sampler.stop.stop();
            if sampler.handle.join().is_err() {
                warn!("sampling task panicked");
            }
        }
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|sampler| !sampler.handle.is_finished())
    }

    /// Stops sampling and puts the sensor to sleep, ignoring failures.
    /// Runs once; later calls and the drop do nothing.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.interrupt_continuous_measurement();
        if let Err(e) = self.sleep() {
            debug!("sensor not put to sleep on shutdown: {}", e);
        }
    }
}

impl<T: Transport + 'static> Drop for ParticulateMatterMeter<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sample<T: Transport + 'static>(
    state: &MeterState<T>,
    sink: &Sender<Result<Measurement>>,
    stop: &StopSignal,
    limits: SamplingLimits,
) {
    let interval = state.settings.sampling_interval();
    let started = Instant::now();
    let mut count = 0;
    info!("continuous measurement started, every {:?}", interval);

    while !stop.is_stopped() && !limits.exhausted(count, started.elapsed()) {
        let tick = Instant::now();
        let reading = state.measure(true);
        if let Err(e) = &reading {
            debug!("sample failed: {}", e);
        }
        if sink.send(reading).is_err() {
            debug!("sample receiver gone");
            break;
        }
        count += 1;

        if limits.exhausted(count, started.elapsed()) {
            break;
        }
        stop.wait(interval.saturating_sub(tick.elapsed()));
    }

    info!("continuous measurement ended after {} samples", count);
}
