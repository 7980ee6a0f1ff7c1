//! MOSI (request) and MISO (response) frames.
//!
//! ```text
//! MOSI: 0x7E ADR CMD       LEN DATA.. CHK 0x7E
//! MISO: 0x7E ADR CMD STATE LEN DATA.. CHK 0x7E
//! ```
//!
//! LEN, DATA and CHK are byte-stuffed; the checksum covers the unstuffed bytes
//! between the delimiters.

use crate::codec::{self, checksum, hex, stuff};
use crate::command::Command;
use crate::constants::*;
use crate::error::{error_reason, FrameDefect, Result, ShdlcError};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request sent from the host to the sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MosiFrame {
    command: Command,
    payload: Vec<u8>,
}

impl MosiFrame {
    /// # Errors
    ///
    /// [`ShdlcError::FrameTooLong`] if the payload exceeds 255 bytes.
    pub fn new(command: Command, payload: impl Into<Vec<u8>>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ShdlcError::FrameTooLong {
                length: payload.len(),
            });
        }
        Ok(Self { command, payload })
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn checksum(&self) -> u8 {
        let header = [SLAVE_ADDRESS, self.command.code(), self.payload.len() as u8];
        checksum(&[&header[..], &self.payload].concat())
    }

    /// Bytes to put on the wire
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(2 * self.payload.len() + 8);
        frame.extend_from_slice(&[FRAME_BOUNDARY, SLAVE_ADDRESS, self.command.code()]);
        frame.extend(stuff(&[self.payload.len() as u8]));
        frame.extend(stuff(&self.payload));
        frame.extend(stuff(&[self.checksum()]));
        frame.push(FRAME_BOUNDARY);
        frame
    }
}

impl fmt::Display for MosiFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MOSI {} [{}]", self.command, hex(&self.to_bytes()))
    }
}

/// Builds a response frame the way the sensor does.
///
/// Takes a raw command code so unknown commands can be answered too.
pub fn encode_response(code: u8, state: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ShdlcError::FrameTooLong {
            length: payload.len(),
        });
    }
    let header = [SLAVE_ADDRESS, code, state, payload.len() as u8];
    let chk = checksum(&[&header[..], payload].concat());

    let mut frame = vec![FRAME_BOUNDARY, SLAVE_ADDRESS, code, state];
    frame.extend(stuff(&[payload.len() as u8]));
    frame.extend(stuff(payload));
    frame.extend(stuff(&[chk]));
    frame.push(FRAME_BOUNDARY);
    Ok(frame)
}

/// Validated response from the sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MisoFrame {
    command: Command,
    state: u8,
    data: Vec<u8>,
    checksum: u8,
    raw: Vec<u8>,
}

impl MisoFrame {
    /// Validates and decodes bytes read from the transport.
    ///
    /// # Errors
    ///
    /// - [`ShdlcError::NoData`] for an empty read
    /// - [`ShdlcError::MalformedFrame`] for anything structurally wrong
    /// - [`ShdlcError::DeviceError`], [`ShdlcError::CommandNotAllowed`] and
    ///   [`ShdlcError::ResponseError`] for a non-zero state byte
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() {
            return Err(ShdlcError::NoData);
        }
        if raw.len() < MIN_MISO_FRAME_LEN {
            return Err(ShdlcError::malformed(FrameDefect::TooShort(raw.len()), raw));
        }
        if raw[0] != FRAME_BOUNDARY {
            return Err(ShdlcError::malformed(FrameDefect::MissingStart, raw));
        }
        if raw[raw.len() - 1] != FRAME_BOUNDARY {
            return Err(ShdlcError::malformed(FrameDefect::MissingStop, raw));
        }

        let content =
            codec::unstuff(&raw[1..raw.len() - 1]).map_err(|e| ShdlcError::malformed(e, raw))?;
        let [address, code, state, declared, ref data @ .., chk] = content[..] else {
            return Err(ShdlcError::malformed(
                FrameDefect::TooShort(content.len() + 2),
                raw,
            ));
        };

        if address != SLAVE_ADDRESS {
            return Err(ShdlcError::malformed(FrameDefect::WrongAddress(address), raw));
        }
        if declared as usize != data.len() {
            return Err(ShdlcError::malformed(
                FrameDefect::LengthMismatch {
                    declared: declared as usize,
                    actual: data.len(),
                },
                raw,
            ));
        }
        let expected = checksum(&content[..content.len() - 1]);
        if expected != chk {
            return Err(ShdlcError::malformed(
                FrameDefect::ChecksumMismatch {
                    expected,
                    actual: chk,
                },
                raw,
            ));
        }
        let command = Command::from_code(code)
            .ok_or_else(|| ShdlcError::malformed(FrameDefect::UnknownCommand(code), raw))?;

        if state & STATE_DEVICE_ERROR_FLAG != 0 && !command.reports_status_flag() {
            return Err(ShdlcError::DeviceError {
                command,
                state,
                raw: raw.to_vec(),
            });
        }
        match state & STATE_ERROR_CODE_MASK {
            0 => {}
            ERR_NOT_ALLOWED => {
                return Err(ShdlcError::CommandNotAllowed {
                    command,
                    raw: raw.to_vec(),
                })
            }
            code => {
                return Err(ShdlcError::ResponseError {
                    command,
                    code,
                    reason: error_reason(code),
                    raw: raw.to_vec(),
                })
            }
        }

        Ok(Self {
            command,
            state,
            data: data.to_vec(),
            checksum: chk,
            raw: raw.to_vec(),
        })
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn state(&self) -> u8 {
        self.state
    }

    /// Device status register has a flag raised
    pub fn device_flag(&self) -> bool {
        self.state & STATE_DEVICE_ERROR_FLAG != 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Interprets the payload according to the command it answers.
    ///
    /// # Errors
    ///
    /// [`ShdlcError::NoNewMeasurement`] for an empty measurement, and
    /// [`ShdlcError::UnexpectedResponse`] when the payload has the wrong size.
    pub fn interpret(&self) -> Result<Response> {
        let unexpected = || ShdlcError::UnexpectedResponse {
            command: self.command,
            length: self.data.len(),
        };

        match self.command {
            Command::StartMeasurement
            | Command::StopMeasurement
            | Command::Sleep
            | Command::WakeUp
            | Command::StartFanCleaning
            | Command::Reset => {
                if self.data.is_empty() {
                    Ok(Response::Empty)
                } else {
                    Err(unexpected())
                }
            }
            Command::ReadMeasuredValues => {
                if self.data.is_empty() {
                    return Err(ShdlcError::NoNewMeasurement);
                }
                Measurement::from_payload(&self.data)
                    .map(Response::Measurement)
                    .ok_or_else(unexpected)
            }
            // a write is acknowledged without data, a read returns 4 bytes
            Command::AutoCleaningInterval => match self.data[..] {
                [] => Ok(Response::Empty),
                [a, b, c, d] => Ok(Response::AutoCleanInterval(AutoCleanInterval {
                    interval_s: u32::from_be_bytes([a, b, c, d]),
                })),
                _ => Err(unexpected()),
            },
            Command::DeviceInformation => Ok(Response::DeviceInfo(DeviceInfo::from_payload(
                &self.data,
            ))),
            Command::ReadVersion => Versions::from_payload(&self.data)
                .map(Response::Versions)
                .ok_or_else(unexpected),
            Command::ReadDeviceStatus => DeviceStatus::from_payload(&self.data)
                .map(Response::DeviceStatus)
                .ok_or_else(unexpected),
        }
    }
}

impl fmt::Display for MisoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MISO {} state {:#04x} [{}]",
            self.command,
            self.state,
            hex(&self.raw)
        )
    }
}

/// Typed payload of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Command answers without data
    Empty,
    Measurement(Measurement),
    AutoCleanInterval(AutoCleanInterval),
    DeviceInfo(DeviceInfo),
    Versions(Versions),
    DeviceStatus(DeviceStatus),
}
