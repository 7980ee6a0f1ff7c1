//! SHDLC byte stuffing and checksum.
//!
//! Four byte values are reserved on the link: the frame boundary `0x7E`, the
//! escape byte `0x7D` and the flow-control bytes `0x11` / `0x13`. Inside a frame
//! each of them travels as the escape byte followed by a replacement byte.

use crate::constants::{ESCAPE, STUFFED};
use thiserror::Error;

/// Unstuffing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Escape byte followed by something that is not a replacement byte
    #[error("invalid escape sequence 0x7D {0:#04x}")]
    InvalidEscape(u8),

    /// Escape byte as the very last byte
    #[error("escape byte without continuation")]
    DanglingEscape,
}

fn replacement(byte: u8) -> Option<u8> {
    STUFFED
        .iter()
        .find(|(org, _)| *org == byte)
        .map(|(_, replacement)| *replacement)
}

fn original(replacement: u8) -> Option<u8> {
    STUFFED
        .iter()
        .find(|(_, escaped)| *escaped == replacement)
        .map(|(org, _)| *org)
}

/// Escapes every reserved byte in `data`.
pub fn stuff(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len());
    for &byte in data {
        match replacement(byte) {
            Some(escaped) => output.extend_from_slice(&[ESCAPE, escaped]),
            None => output.push(byte),
        }
    }
    output
}

/// Reverts [`stuff`].
///
/// # Errors
///
/// Fails when an escape byte is not followed by one of the four replacement bytes.
pub fn unstuff(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut output = Vec::with_capacity(data.len());
    let mut input = data.iter();

    while let Some(&byte) = input.next() {
        if byte == ESCAPE {
            let &escaped = input.next().ok_or(Error::DanglingEscape)?;
            output.push(original(escaped).ok_or(Error::InvalidEscape(escaped))?);
        } else {
            output.push(byte);
        }
    }

    Ok(output)
}

/// Checksum over the unstuffed frame content: `0xFF - (sum mod 256)`
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &byte| acc.wrapping_add(byte));
    0xFF - sum
}

/// Formats bytes as spaced upper-case hex, `7E 00 D1 ...`
pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
