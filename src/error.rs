//! Error types for SPS30 SHDLC operations.

use crate::command::{Command, Version};
use crate::constants::*;
use thiserror::Error;
use std::sync::Arc;
use std::time::Duration;

/// Result type alias for SPS30 operations.
pub type Result<T> = std::result::Result<T, ShdlcError>;

/// Failures of the byte channel underneath the protocol.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The port was used before it was opened
    #[error("Port is not open")]
    NotOpen,

    /// Writing did not complete in time
    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// Reading did not complete in time
    #[error("Read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(Arc::new(err))
    }
}

/// What is structurally wrong with a received frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameDefect {
    #[error("frame too short ({0} bytes)")]
    TooShort(usize),

    #[error("missing start byte")]
    MissingStart,

    #[error("missing stop byte")]
    MissingStop,

    #[error("unexpected slave address {0:#04x}")]
    WrongAddress(u8),

    #[error("{0}")]
    Escape(#[from] crate::codec::Error),

    #[error("declared data length {declared} but frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum {actual:#04x} does not match computed {expected:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("unknown command code {0:#04x}")]
    UnknownCommand(u8),

    #[error("response to {received:#04x} while waiting for {expected:#04x}")]
    CommandMismatch { expected: u8, received: u8 },
}

/// Error types for SPS30 communication.
#[derive(Error, Debug, Clone)]
pub enum ShdlcError {
    /// The transport is unavailable or unresponsive
    #[error("Communication error: {0}")]
    Transport(#[from] TransportError),

    /// Payload exceeds what the one byte length field can describe
    #[error("Payload too long: {length} bytes (max 255)")]
    FrameTooLong {
        /// Length of the rejected payload
        length: usize,
    },

    /// Nothing came back, the device is most likely asleep or disconnected
    #[error("No data received")]
    NoData,

    /// Received bytes are not a valid SHDLC frame
    #[error("Malformed frame ({defect}): {}", crate::codec::hex(.raw))]
    MalformedFrame {
        /// What was wrong
        defect: FrameDefect,
        /// Bytes as received
        raw: Vec<u8>,
    },

    /// Device status register reports an error flag
    #[error("Device error reported by {} (state {state:#04x})", .command.name())]
    DeviceError {
        /// Command that was answered
        command: Command,
        /// Raw state byte
        state: u8,
        /// Bytes as received
        raw: Vec<u8>,
    },

    /// Device refused the command in its current mode
    #[error("{} not allowed in current state", .command.name())]
    CommandNotAllowed {
        /// Command that was refused
        command: Command,
        /// Bytes as received
        raw: Vec<u8>,
    },

    /// Device answered with a non-zero error code
    #[error("{} failed with {code:#04x}: {reason}", .command.name())]
    ResponseError {
        /// Command that failed
        command: Command,
        /// Error code from the state byte
        code: u8,
        /// Human readable reason
        reason: &'static str,
        /// Bytes as received
        raw: Vec<u8>,
    },

    /// Cached firmware is too old for the command
    #[error("{} requires firmware {required}, device runs {firmware}", .command.name())]
    UnsupportedCommand {
        /// Command that was gated
        command: Command,
        /// Minimum firmware version
        required: Version,
        /// Firmware version of the device
        firmware: Version,
    },

    /// A value handed to the driver is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A completion callback was already registered on this execution
    #[error("Completion callback already registered")]
    CallbackAlreadyRegistered,

    /// Measurement is not running or no new values are ready yet
    #[error("No new measurement available")]
    NoNewMeasurement,

    /// Continuous sampling is already running on this meter
    #[error("Continuous measurement already running")]
    SamplingActive,

    /// Payload does not have the shape the command answers with
    #[error("Unexpected {length} byte response to {}", .command.name())]
    UnexpectedResponse {
        /// Command that was answered
        command: Command,
        /// Payload length received
        length: usize,
    },

    /// The thread running the command died before finishing
    #[error("Execution of {} aborted", .0.name())]
    ExecutionAborted(Command),
}

impl ShdlcError {
    pub(crate) fn malformed(defect: impl Into<FrameDefect>, raw: &[u8]) -> Self {
        ShdlcError::MalformedFrame {
            defect: defect.into(),
            raw: raw.to_vec(),
        }
    }

    /// Bytes received from the device, when the failure came with any
    pub fn raw_response(&self) -> Option<&[u8]> {
        match self {
            ShdlcError::MalformedFrame { raw, .. }
            | ShdlcError::DeviceError { raw, .. }
            | ShdlcError::CommandNotAllowed { raw, .. }
            | ShdlcError::ResponseError { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// True for timeouts and other failures of the byte channel
    pub fn is_transport(&self) -> bool {
        matches!(self, ShdlcError::Transport(_))
    }
}

/// Maps a device error code onto the reason given in the datasheet.
pub fn error_reason(code: u8) -> &'static str {
    match code {
        0x00 => "No error",
        ERR_WRONG_DATA_LENGTH => "Wrong data length for this command (too much or little data)",
        ERR_UNKNOWN_COMMAND => "Unknown command",
        ERR_NO_ACCESS => "No access right for command",
        ERR_ILLEGAL_PARAMETER => "Illegal command parameter or parameter out of allowed range",
        ERR_INTERNAL_ARGUMENT => "Internal function argument out of range",
        ERR_NOT_ALLOWED => "Command not allowed in current state",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_cover_datasheet_codes() {
        assert_eq!(error_reason(0x02), "Unknown command");
        assert_eq!(error_reason(0x43), "Command not allowed in current state");
        assert_eq!(error_reason(0x28), "Internal function argument out of range");
        assert_eq!(error_reason(0x7F), "Unknown error");
    }

    #[test]
    fn raw_bytes_survive_clone() {
        let err = ShdlcError::malformed(FrameDefect::MissingStop, &[0x7E, 0x00]);
        let copy = err.clone();
        assert_eq!(copy.raw_response(), Some(&[0x7E, 0x00][..]));
        assert!(!copy.is_transport());
        assert!(err.to_string().contains("7E 00"));
    }
}
