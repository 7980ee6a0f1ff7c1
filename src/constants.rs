//! Protocol constants for SPS30 SHDLC communication.
//!
//! This module defines the constants used on the SPS30 UART link,
//! including frame delimiters, the byte-stuffing table, command sub-codes,
//! device error codes, timing parameters and serial port configuration.

/// Frame start and stop delimiter
pub const FRAME_BOUNDARY: u8 = 0x7E;

/// Escape byte introducing a stuffed sequence
pub const ESCAPE: u8 = 0x7D;

/// Slave address of the sensor (always 0 on UART)
pub const SLAVE_ADDRESS: u8 = 0x00;

/// Reserved bytes and the byte that follows [`ESCAPE`] in their place (original, replacement)
pub const STUFFED: [(u8, u8); 4] = [(0x7E, 0x5E), (0x7D, 0x5D), (0x11, 0x31), (0x13, 0x33)];

/// Longest payload a frame can carry (the length field is one byte)
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Bytes around the payload in a decoded response: addr, cmd, state, len, chk
pub const MISO_OVERHEAD: usize = 5;

/// Smallest possible encoded response frame, delimiters included
pub const MIN_MISO_FRAME_LEN: usize = MISO_OVERHEAD + 2;

/// Byte sent ahead of the wake-up frame to produce a low pulse on RX
pub const WAKE_UP_PULSE: u8 = 0xFF;

/// Bit 7 of the state byte: device status register has a flag raised
pub const STATE_DEVICE_ERROR_FLAG: u8 = 0x80;

/// Lower seven bits of the state byte carry the error code
pub const STATE_ERROR_CODE_MASK: u8 = 0x7F;

/// Error code: wrong data length for this command
pub const ERR_WRONG_DATA_LENGTH: u8 = 0x01;

/// Error code: unknown command
pub const ERR_UNKNOWN_COMMAND: u8 = 0x02;

/// Error code: no access right for command
pub const ERR_NO_ACCESS: u8 = 0x03;

/// Error code: illegal command parameter
pub const ERR_ILLEGAL_PARAMETER: u8 = 0x04;

/// Error code: internal function argument out of range
pub const ERR_INTERNAL_ARGUMENT: u8 = 0x28;

/// Error code: command not allowed in current state
pub const ERR_NOT_ALLOWED: u8 = 0x43;

/// Sub-command of start measurement
pub const START_MEASUREMENT_SUBCOMMAND: u8 = 0x01;

/// Sub-command reading the auto cleaning interval
pub const AUTO_CLEAN_SUBCOMMAND: u8 = 0x00;

/// Device information: product type
pub const INFO_PRODUCT_TYPE: u8 = 0x00;

/// Device information: serial number
pub const INFO_SERIAL_NUMBER: u8 = 0x03;

/// Status register bit: fan speed out of range
pub const STATUS_SPEED_WARNING_BIT: u32 = 1 << 21;

/// Status register bit: laser current out of range
pub const STATUS_LASER_ERROR_BIT: u32 = 1 << 5;

/// Status register bit: fan broken or blocked
pub const STATUS_FAN_ERROR_BIT: u32 = 1 << 4;

/// Baud rate (115200 bps, 8N1)
pub const BAUD_RATE: u32 = 115_200;

/// Read and write timeout in milliseconds
pub const TIMEOUT_MS: u64 = 100;

/// Interval between continuous measurement samples
pub const SAMPLING_INTERVAL_MS: u64 = 1000;

/// Time the device needs to come back after a reset
pub const RESET_SETTLE_MS: u64 = 20;

/// Default auto cleaning interval of the device (one week)
pub const DEFAULT_AUTO_CLEAN_INTERVAL_S: u32 = 604_800;

/// Default serial device on the single-board computer
pub const DEFAULT_PORT: &str = "/dev/ttyAMA0";
