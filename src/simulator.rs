//! In-memory SPS30 for tests and demos without hardware.
//!
//! The simulator is a [`Transport`]: every written frame is validated and
//! answered the way the sensor does, and the answer is returned by the next
//! [`Transport::read_all`]. Malformed frames are ignored, like on the real
//! link, so the driver sees an empty read.

use crate::codec::{checksum, hex, unstuff};
use crate::command::{Command, Version};
use crate::constants::*;
use crate::error::TransportError;
use crate::frame::encode_response;
use crate::transport::Transport;
use crate::types::{DeviceStatus, Measurement, MeasurementFormat, Versions};
use chrono::Utc;
use log::trace;
use rand::Rng;
use std::fmt;
use std::mem;
use std::thread;
use std::time::{Duration, Instant};

/// Operating mode of the simulated sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Idle,
    Measuring,
    /// Interface awake, waiting for the wake-up frame
    Sleep,
    /// Interface off, only the wake-up pulse is noticed
    DeepSleep,
}

/// Injectable fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Malfunction {
    #[default]
    Healthy,
    /// Writes and reads block for their timeout, then fail
    NotResponding,
}

/// How the simulator reacted to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Accepted,
    /// Measured values requested while no new values were ready
    NoNewData,
    /// Answered with this error code
    Rejected(u8),
    /// Nothing sent back
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalEntry {
    pub command: Command,
    pub reply: Reply,
}

impl JournalEntry {
    pub fn new(command: Command, reply: Reply) -> Self {
        Self { command, reply }
    }
}

/// Simulated sensor answering SHDLC requests.
pub struct DeviceSimulator {
    open: bool,
    mode: DeviceMode,
    /// Mode restored by the wake-up frame
    resume_mode: DeviceMode,
    malfunction: Malfunction,
    read_timeout: Duration,
    write_timeout: Duration,
    versions: Versions,
    format: MeasurementFormat,
    /// Values become ready once per period while measuring
    measurement_period: Duration,
    last_sample: Option<Instant>,
    auto_clean_interval: u32,
    product_type: String,
    serial_number: String,
    status_register: u32,
    pending: Vec<u8>,
    journal: Vec<JournalEntry>,
    writes: usize,
}

impl Default for DeviceSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSimulator {
    /// An idle sensor on firmware 2.3 behind a closed port.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let serial_number = (0..8).map(|_| format!("{:02X}", rng.gen::<u8>())).collect();

        Self {
            open: false,
            mode: DeviceMode::Idle,
            resume_mode: DeviceMode::Idle,
            malfunction: Malfunction::Healthy,
            read_timeout: Duration::from_millis(TIMEOUT_MS),
            write_timeout: Duration::from_millis(TIMEOUT_MS),
            versions: Versions {
                firmware: Version::new(2, 3),
                hardware: 7,
                protocol: Version::new(2, 0),
            },
            format: MeasurementFormat::Float,
            measurement_period: Duration::ZERO,
            last_sample: None,
            auto_clean_interval: DEFAULT_AUTO_CLEAN_INTERVAL_S,
            product_type: "00080000".to_string(),
            serial_number,
            status_register: 0,
            pending: Vec::new(),
            journal: Vec::new(),
            writes: 0,
        }
    }

    pub fn with_firmware(mut self, firmware: Version) -> Self {
        self.versions.firmware = firmware;
        self
    }

    pub fn with_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    /// Without a period every read while measuring returns new values.
    pub fn with_measurement_period(mut self, period: Duration) -> Self {
        self.measurement_period = period;
        self
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn versions(&self) -> Versions {
        self.versions
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn auto_clean_interval(&self) -> u32 {
        self.auto_clean_interval
    }

    pub fn status_register(&self) -> u32 {
        self.status_register
    }

    /// Raises flags in the status register; any flag sets bit 7 of the
    /// state byte on every answer.
    pub fn set_status_register(&mut self, register: u32) {
        self.status_register = register;
    }

    pub fn inject(&mut self, malfunction: Malfunction) {
        self.malfunction = malfunction;
    }

    /// Drops the sensor into deep sleep, as if its interface were powered
    /// down. A wake-up brings back the mode it was in.
    pub fn deactivate_interface(&mut self) {
        if matches!(self.mode, DeviceMode::Idle | DeviceMode::Measuring) {
            self.resume_mode = self.mode;
        }
        self.mode = DeviceMode::DeepSleep;
    }

    /// Requests handled so far
    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn take_journal(&mut self) -> Vec<JournalEntry> {
        mem::take(&mut self.journal)
    }

    /// Number of successful writes, wake-up pulses included
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn respond(&mut self, frame: &[u8]) -> Vec<u8> {
        let Some((code, data)) = parse_request(frame) else {
            trace!("simulator ignored {}", hex(frame));
            return Vec::new();
        };
        let known = Command::from_code(code);

        if self.mode == DeviceMode::DeepSleep {
            if let Some(command) = known {
                self.journal.push(JournalEntry::new(command, Reply::Silent));
            }
            return Vec::new();
        }

        let command = match known {
            Some(command) if command.min_version() <= self.versions.firmware => command,
            _ => {
                if let Some(command) = known {
                    self.journal
                        .push(JournalEntry::new(command, Reply::Rejected(ERR_UNKNOWN_COMMAND)));
                }
                return encode_response(code, self.state_flag() | ERR_UNKNOWN_COMMAND, &[])
                    .unwrap_or_default();
            }
        };

        if self.mode == DeviceMode::Sleep && command != Command::WakeUp {
            self.journal.push(JournalEntry::new(command, Reply::Silent));
            return Vec::new();
        }

        let flag = self.state_flag();
        let (state, payload, reply) = match self.handle(command, &data) {
            Ok(payload) if command == Command::ReadMeasuredValues && payload.is_empty() => {
                (0, payload, Reply::NoNewData)
            }
            Ok(payload) => (0, payload, Reply::Accepted),
            Err(error) => (error, Vec::new(), Reply::Rejected(error)),
        };
        self.journal.push(JournalEntry::new(command, reply));
        encode_response(code, flag | state, &payload).unwrap_or_default()
    }

    fn state_flag(&self) -> u8 {
        if self.status_register != 0 {
            STATE_DEVICE_ERROR_FLAG
        } else {
            0
        }
    }

    /// Payload of the answer, or the error code to answer with
    fn handle(&mut self, command: Command, data: &[u8]) -> Result<Vec<u8>, u8> {
        use DeviceMode::*;

        let expect_len = |len: usize| {
            if data.len() == len {
                Ok(())
            } else {
                Err(ERR_WRONG_DATA_LENGTH)
            }
        };
        let require = |allowed: bool| if allowed { Ok(()) } else { Err(ERR_NOT_ALLOWED) };

        match command {
            Command::StartMeasurement => {
                expect_len(2)?;
                let format = match data {
                    [START_MEASUREMENT_SUBCOMMAND, format] => MeasurementFormat::from_code(*format),
                    _ => None,
                }
                .ok_or(ERR_ILLEGAL_PARAMETER)?;
                require(self.mode == Idle)?;
                self.format = format;
                self.mode = Measuring;
                self.last_sample = Some(Instant::now());
                Ok(Vec::new())
            }
            Command::StopMeasurement => {
                expect_len(0)?;
                require(self.mode == Measuring)?;
                self.mode = Idle;
                Ok(Vec::new())
            }
            Command::ReadMeasuredValues => {
                expect_len(0)?;
                let ready = self
                    .last_sample
                    .map_or(true, |last| last.elapsed() >= self.measurement_period);
                if self.mode != Measuring || !ready {
                    return Ok(Vec::new());
                }
                self.last_sample = Some(Instant::now());
                Ok(random_measurement().to_payload(self.format))
            }
            Command::Sleep => {
                expect_len(0)?;
                require(self.mode == Idle)?;
                self.resume_mode = Idle;
                self.mode = DeepSleep;
                Ok(Vec::new())
            }
            Command::WakeUp => {
                expect_len(0)?;
                require(self.mode == Sleep)?;
                self.mode = self.resume_mode;
                Ok(Vec::new())
            }
            Command::StartFanCleaning => {
                expect_len(0)?;
                require(self.mode == Measuring)?;
                Ok(Vec::new())
            }
            Command::AutoCleaningInterval => match *data {
                [AUTO_CLEAN_SUBCOMMAND] => Ok(self.auto_clean_interval.to_be_bytes().to_vec()),
                [AUTO_CLEAN_SUBCOMMAND, a, b, c, d] => {
                    self.auto_clean_interval = u32::from_be_bytes([a, b, c, d]);
                    Ok(Vec::new())
                }
                [_] | [_, _, _, _, _] => Err(ERR_ILLEGAL_PARAMETER),
                _ => Err(ERR_WRONG_DATA_LENGTH),
            },
            Command::DeviceInformation => {
                expect_len(1)?;
                let info = match data[0] {
                    INFO_PRODUCT_TYPE => &self.product_type,
                    INFO_SERIAL_NUMBER => &self.serial_number,
                    _ => return Err(ERR_ILLEGAL_PARAMETER),
                };
                let mut payload = info.as_bytes().to_vec();
                payload.push(0);
                Ok(payload)
            }
            Command::ReadVersion => {
                expect_len(0)?;
                Ok(self.versions.to_payload().to_vec())
            }
            Command::ReadDeviceStatus => {
                expect_len(1)?;
                let clear = match data[0] {
                    0 => false,
                    1 => true,
                    _ => return Err(ERR_ILLEGAL_PARAMETER),
                };
                let mut payload = self.status_register.to_be_bytes().to_vec();
                payload.push(0);
                if clear {
                    self.status_register = 0;
                }
                Ok(payload)
            }
            Command::Reset => {
                expect_len(0)?;
                self.mode = Idle;
                Ok(Vec::new())
            }
        }
    }
}

/// Command code and data of a structurally valid request
fn parse_request(frame: &[u8]) -> Option<(u8, Vec<u8>)> {
    let [FRAME_BOUNDARY, ref inner @ .., FRAME_BOUNDARY] = *frame else {
        return None;
    };
    let content = unstuff(inner).ok()?;
    let [SLAVE_ADDRESS, code, len, ref data @ .., chk] = content[..] else {
        return None;
    };
    if len as usize != data.len() || checksum(&content[..content.len() - 1]) != chk {
        return None;
    }
    Some((code, data.to_vec()))
}

fn random_measurement() -> Measurement {
    let mut rng = rand::thread_rng();
    let pm1_0 = rng.gen_range(1.0f32..20.0);
    let pm2_5 = pm1_0 + rng.gen_range(0.0f32..10.0);
    let pm4_0 = pm2_5 + rng.gen_range(0.0f32..5.0);
    let pm10 = pm4_0 + rng.gen_range(0.0f32..5.0);
    let nc0_5 = rng.gen_range(5.0f32..100.0);
    let nc1_0 = nc0_5 + rng.gen_range(0.0f32..20.0);
    let nc2_5 = nc1_0 + rng.gen_range(0.0f32..5.0);
    let nc4_0 = nc2_5 + rng.gen_range(0.0f32..1.0);

    Measurement {
        mass_pm1_0: pm1_0,
        mass_pm2_5: pm2_5,
        mass_pm4_0: pm4_0,
        mass_pm10: pm10,
        number_pm0_5: nc0_5,
        number_pm1_0: nc1_0,
        number_pm2_5: nc2_5,
        number_pm4_0: nc4_0,
        number_pm10: nc4_0 + rng.gen_range(0.0f32..1.0),
        typical_particle_size: rng.gen_range(0.3f32..1.5),
        timestamp: Utc::now(),
    }
}

impl Transport for DeviceSimulator {
    fn open(&mut self) -> Result<(), TransportError> {
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if self.malfunction == Malfunction::NotResponding {
            thread::sleep(self.write_timeout);
            return Err(TransportError::WriteTimeout(self.write_timeout));
        }
        self.writes += 1;

        if bytes == [WAKE_UP_PULSE] {
            if self.mode == DeviceMode::DeepSleep {
                self.mode = DeviceMode::Sleep;
            }
            self.pending.clear();
        } else {
            self.pending = self.respond(bytes);
        }
        Ok(())
    }

    fn read_all(&mut self) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if self.malfunction == Malfunction::NotResponding {
            thread::sleep(self.read_timeout);
            return Err(TransportError::ReadTimeout(self.read_timeout));
        }
        Ok(mem::take(&mut self.pending))
    }
}

impl fmt::Display for DeviceSimulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SPS30 simulator, fw {}", self.versions.firmware)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FrameDefect, ShdlcError};
    use crate::frame::{MisoFrame, MosiFrame, Response};

    fn simulator() -> DeviceSimulator {
        let mut sim = DeviceSimulator::new();
        sim.open().unwrap();
        sim
    }

    fn send(sim: &mut DeviceSimulator, command: Command, payload: &[u8]) -> crate::Result<MisoFrame> {
        let request = MosiFrame::new(command, payload.to_vec()).unwrap();
        if command == Command::WakeUp {
            sim.write(&[WAKE_UP_PULSE]).unwrap();
        }
        sim.write(&request.to_bytes()).unwrap();
        MisoFrame::decode(&sim.read_all().unwrap())
    }

    #[test]
    fn closed_until_opened() {
        let mut sim = DeviceSimulator::new();
        assert!(matches!(sim.write(&[0x7E]), Err(TransportError::NotOpen)));
        assert!(matches!(sim.read_all(), Err(TransportError::NotOpen)));
    }

    #[test]
    fn measurement_lifecycle() {
        let mut sim = simulator();
        let idle = send(&mut sim, Command::ReadMeasuredValues, &[]);
        assert!(matches!(idle.unwrap().interpret(), Err(ShdlcError::NoNewMeasurement)));

        send(&mut sim, Command::StartMeasurement, &[0x01, 0x05]).unwrap();
        assert_eq!(sim.mode(), DeviceMode::Measuring);
        assert!(matches!(
            send(&mut sim, Command::StartMeasurement, &[0x01, 0x03]),
            Err(ShdlcError::CommandNotAllowed { .. })
        ));

        let frame = send(&mut sim, Command::ReadMeasuredValues, &[]).unwrap();
        assert_eq!(frame.data().len(), 20);
        let Response::Measurement(m) = frame.interpret().unwrap() else {
            panic!("expected a measurement");
        };
        assert!(m.mass_pm1_0 <= m.mass_pm10);

        send(&mut sim, Command::StopMeasurement, &[]).unwrap();
        assert_eq!(sim.mode(), DeviceMode::Idle);

        assert_eq!(
            sim.take_journal().iter().map(|e| e.reply).collect::<Vec<_>>(),
            [
                Reply::NoNewData,
                Reply::Accepted,
                Reply::Rejected(ERR_NOT_ALLOWED),
                Reply::Accepted,
                Reply::Accepted
            ]
        );
        assert!(sim.journal().is_empty());
    }

    #[test]
    fn values_ready_once_per_period() {
        let mut sim = DeviceSimulator::new().with_measurement_period(Duration::from_secs(60));
        sim.open().unwrap();
        send(&mut sim, Command::StartMeasurement, &[0x01, 0x03]).unwrap();
        let frame = send(&mut sim, Command::ReadMeasuredValues, &[]).unwrap();
        assert!(frame.data().is_empty());
        assert_eq!(sim.journal()[1].reply, Reply::NoNewData);
    }

    #[test]
    fn bad_parameters_are_rejected() {
        let mut sim = simulator();
        let code = |r: crate::Result<MisoFrame>| match r {
            Err(ShdlcError::ResponseError { code, .. }) => code,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(code(send(&mut sim, Command::StartMeasurement, &[0x01])), ERR_WRONG_DATA_LENGTH);
        assert_eq!(code(send(&mut sim, Command::StartMeasurement, &[0x01, 0x04])), ERR_ILLEGAL_PARAMETER);
        assert_eq!(code(send(&mut sim, Command::DeviceInformation, &[0x07])), ERR_ILLEGAL_PARAMETER);
        assert_eq!(code(send(&mut sim, Command::AutoCleaningInterval, &[0x00, 0x01])), ERR_WRONG_DATA_LENGTH);
        assert_eq!(code(send(&mut sim, Command::ReadDeviceStatus, &[0x02])), ERR_ILLEGAL_PARAMETER);
    }

    #[test]
    fn sleep_and_wake_up() {
        let mut sim = simulator();
        send(&mut sim, Command::Sleep, &[]).unwrap();
        assert_eq!(sim.mode(), DeviceMode::DeepSleep);

        sim.write(&MosiFrame::new(Command::ReadVersion, Vec::new()).unwrap().to_bytes())
            .unwrap();
        assert!(sim.read_all().unwrap().is_empty());

        send(&mut sim, Command::WakeUp, &[]).unwrap();
        assert_eq!(sim.mode(), DeviceMode::Idle);

        // without a preceding sleep the frame is refused
        assert!(matches!(
            send(&mut sim, Command::WakeUp, &[]),
            Err(ShdlcError::CommandNotAllowed { .. })
        ));
    }

    #[test]
    fn deactivated_interface_resumes_measuring() {
        let mut sim = simulator();
        send(&mut sim, Command::StartMeasurement, &[0x01, 0x03]).unwrap();
        sim.deactivate_interface();
        assert_eq!(sim.mode(), DeviceMode::DeepSleep);

        sim.write(&[WAKE_UP_PULSE]).unwrap();
        assert_eq!(sim.mode(), DeviceMode::Sleep);
        // awake interface still ignores everything but the wake-up frame
        sim.write(&MosiFrame::new(Command::ReadMeasuredValues, Vec::new()).unwrap().to_bytes())
            .unwrap();
        assert!(sim.read_all().unwrap().is_empty());

        let request = MosiFrame::new(Command::WakeUp, Vec::new()).unwrap();
        sim.write(&request.to_bytes()).unwrap();
        MisoFrame::decode(&sim.read_all().unwrap()).unwrap();
        assert_eq!(sim.mode(), DeviceMode::Measuring);
    }

    #[test]
    fn old_firmware_refuses_newer_commands() {
        let mut sim = DeviceSimulator::new().with_firmware(Version::new(2, 0));
        sim.open().unwrap();
        assert!(matches!(
            send(&mut sim, Command::ReadDeviceStatus, &[0x00]),
            Err(ShdlcError::ResponseError {
                code: ERR_UNKNOWN_COMMAND,
                ..
            })
        ));
        assert!(send(&mut sim, Command::Sleep, &[]).is_ok());
    }

    #[test]
    fn status_register_raises_device_flag() {
        let mut sim = simulator();
        sim.set_status_register(STATUS_FAN_ERROR_BIT);

        assert!(matches!(
            send(&mut sim, Command::Reset, &[]),
            Err(ShdlcError::DeviceError { state: 0x80, .. })
        ));

        let frame = send(&mut sim, Command::ReadDeviceStatus, &[0x01]).unwrap();
        assert!(frame.device_flag());
        let Response::DeviceStatus(status) = frame.interpret().unwrap() else {
            panic!("expected a status");
        };
        assert!(status.fan_error);
        assert_eq!(sim.status_register(), 0);

        let frame = send(&mut sim, Command::ReadDeviceStatus, &[0x00]).unwrap();
        assert!(!frame.device_flag());
        assert_eq!(frame.interpret().unwrap(), Response::DeviceStatus(DeviceStatus::default()));
    }

    #[test]
    fn auto_clean_interval_round_trip() {
        let mut sim = simulator();
        let frame = send(&mut sim, Command::AutoCleaningInterval, &[0x00]).unwrap();
        assert_eq!(frame.data(), 604_800u32.to_be_bytes());

        let frame = send(&mut sim, Command::AutoCleaningInterval, &[0x00, 0, 0, 0x0E, 0x10]).unwrap();
        assert_eq!(frame.interpret().unwrap(), Response::Empty);
        assert_eq!(sim.auto_clean_interval(), 3600);
    }

    #[test]
    fn device_information() {
        let mut sim = simulator();
        let serial = sim.serial_number().to_string();
        let frame = send(&mut sim, Command::DeviceInformation, &[0x03]).unwrap();
        assert_eq!(
            frame.interpret().unwrap(),
            Response::DeviceInfo(crate::types::DeviceInfo { info: serial })
        );
        let frame = send(&mut sim, Command::DeviceInformation, &[0x00]).unwrap();
        assert_eq!(frame.data(), b"00080000\0");
    }

    #[test]
    fn damaged_requests_are_ignored() {
        let mut sim = simulator();
        let mut bytes = MosiFrame::new(Command::ReadVersion, Vec::new()).unwrap().to_bytes();
        let chk = bytes.len() - 2;
        bytes[chk] ^= 0x01;
        sim.write(&bytes).unwrap();
        assert!(matches!(
            MisoFrame::decode(&sim.read_all().unwrap()),
            Err(ShdlcError::NoData)
        ));
        assert!(sim.journal().is_empty());
        assert_eq!(sim.write_count(), 1);
    }

    #[test]
    fn unknown_code_is_answered() {
        let mut sim = simulator();
        // code 0x42 is not in the catalog
        let content = [0x00, 0x42, 0x00];
        let mut bytes = vec![FRAME_BOUNDARY];
        bytes.extend_from_slice(&content);
        bytes.push(checksum(&content));
        bytes.push(FRAME_BOUNDARY);
        sim.write(&bytes).unwrap();

        assert!(matches!(
            MisoFrame::decode(&sim.read_all().unwrap()),
            Err(ShdlcError::MalformedFrame {
                defect: FrameDefect::UnknownCommand(0x42),
                ..
            })
        ));
    }

    #[test]
    fn every_request_length_parses_back() {
        let reserved = [FRAME_BOUNDARY, ESCAPE, 0x11, 0x13];
        for command in Command::ALL {
            for len in 0..=255usize {
                let payload: Vec<u8> = (0..len)
                    .map(|i| if i % 2 == 0 { reserved[i / 2 % 4] } else { i as u8 })
                    .collect();

                let request = MosiFrame::new(command, payload.clone()).unwrap();
                assert_eq!(
                    parse_request(&request.to_bytes()),
                    Some((command.code(), payload.clone())),
                    "{} with {} bytes",
                    command,
                    len
                );

                let answer = encode_response(command.code(), 0, &payload).unwrap();
                let frame = MisoFrame::decode(&answer).unwrap();
                assert_eq!(frame.command(), command);
                assert_eq!(frame.data(), &payload[..]);
            }
        }
    }

    #[test]
    fn not_responding_times_out() {
        let timeout = Duration::from_millis(30);
        let mut sim = DeviceSimulator::new().with_timeouts(timeout, timeout);
        sim.open().unwrap();
        sim.inject(Malfunction::NotResponding);

        let started = std::time::Instant::now();
        assert!(matches!(sim.write(&[0x7E]), Err(TransportError::WriteTimeout(t)) if t == timeout));
        assert!(matches!(sim.read_all(), Err(TransportError::ReadTimeout(_))));
        assert!(started.elapsed() >= timeout * 2);
        assert_eq!(sim.write_count(), 0);
    }
}
