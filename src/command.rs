//! The SPS30 command catalog.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Major/minor version pair, ordered so firmware can be compared against
/// the minimum a command needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Direction of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Execute,
    Read,
    ReadWrite,
}

/// Commands understood by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    StartMeasurement,
    StopMeasurement,
    ReadMeasuredValues,
    Sleep,
    WakeUp,
    StartFanCleaning,
    /// Read and write share one code, told apart by payload length
    AutoCleaningInterval,
    DeviceInformation,
    ReadVersion,
    ReadDeviceStatus,
    Reset,
}

impl Command {
    /// Every command, in catalog order
    pub const ALL: [Command; 11] = [
        Command::StartMeasurement,
        Command::StopMeasurement,
        Command::ReadMeasuredValues,
        Command::Sleep,
        Command::WakeUp,
        Command::StartFanCleaning,
        Command::AutoCleaningInterval,
        Command::DeviceInformation,
        Command::ReadVersion,
        Command::ReadDeviceStatus,
        Command::Reset,
    ];

    pub const fn code(self) -> u8 {
        match self {
            Command::StartMeasurement => 0x00,
            Command::StopMeasurement => 0x01,
            Command::ReadMeasuredValues => 0x03,
            Command::Sleep => 0x10,
            Command::WakeUp => 0x11,
            Command::StartFanCleaning => 0x56,
            Command::AutoCleaningInterval => 0x80,
            Command::DeviceInformation => 0xD0,
            Command::ReadVersion => 0xD1,
            Command::ReadDeviceStatus => 0xD2,
            Command::Reset => 0xD3,
        }
    }

    /// Resolves a code received on the wire
    pub const fn from_code(code: u8) -> Option<Command> {
        Some(match code {
            0x00 => Command::StartMeasurement,
            0x01 => Command::StopMeasurement,
            0x03 => Command::ReadMeasuredValues,
            0x10 => Command::Sleep,
            0x11 => Command::WakeUp,
            0x56 => Command::StartFanCleaning,
            0x80 => Command::AutoCleaningInterval,
            0xD0 => Command::DeviceInformation,
            0xD1 => Command::ReadVersion,
            0xD2 => Command::ReadDeviceStatus,
            0xD3 => Command::Reset,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Command::StartMeasurement => "Start Measurement",
            Command::StopMeasurement => "Stop Measurement",
            Command::ReadMeasuredValues => "Read Measured Values",
            Command::Sleep => "Sleep",
            Command::WakeUp => "Wake-up",
            Command::StartFanCleaning => "Start Fan Cleaning",
            Command::AutoCleaningInterval => "Read/Write Auto Cleaning Interval",
            Command::DeviceInformation => "Device Information",
            Command::ReadVersion => "Read Version",
            Command::ReadDeviceStatus => "Read Device Status Register",
            Command::Reset => "Reset",
        }
    }

    pub const fn kind(self) -> CommandKind {
        match self {
            Command::ReadMeasuredValues
            | Command::DeviceInformation
            | Command::ReadVersion
            | Command::ReadDeviceStatus => CommandKind::Read,
            Command::AutoCleaningInterval => CommandKind::ReadWrite,
            _ => CommandKind::Execute,
        }
    }

    /// Delay between writing the request and reading the response
    pub const fn settle_time(self) -> Duration {
        match self {
            Command::Sleep | Command::WakeUp => Duration::from_millis(5),
            _ => Duration::from_millis(20),
        }
    }

    /// Time the device needs after answering before it accepts the next
    /// frame
    pub const fn recovery_time(self) -> Duration {
        match self {
            Command::Reset => Duration::from_millis(crate::constants::RESET_SETTLE_MS),
            _ => Duration::ZERO,
        }
    }

    /// Oldest firmware implementing the command
    pub const fn min_version(self) -> Version {
        match self {
            Command::Sleep | Command::WakeUp => Version::new(2, 0),
            Command::ReadDeviceStatus => Version::new(2, 2),
            _ => Version::new(1, 0),
        }
    }

    /// Commands whose answers may carry the device error flag without it
    /// being a failure of the command itself
    pub const fn reports_status_flag(self) -> bool {
        matches!(
            self,
            Command::ReadDeviceStatus
                | Command::ReadVersion
                | Command::DeviceInformation
                | Command::Sleep
                | Command::WakeUp
        )
    }

    /// Bytes to put on the line before the frame itself
    pub(crate) const fn preamble(self) -> Option<&'static [u8]> {
        match self {
            Command::WakeUp => Some(&[crate::constants::WAKE_UP_PULSE]),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} {}", self.code(), self.name())
    }
}
