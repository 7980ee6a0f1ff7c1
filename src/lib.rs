//! # SPS30 SHDLC Library
//!
//! A Rust library for driving the Sensirion SPS30 particulate matter sensor
//! over its UART link, which speaks SHDLC: byte-stuffed, checksummed frames
//! between `0x7E` delimiters.
//!
//! ## Features
//!
//! - Frame encoding and validating decoding for every SPS30 command
//! - Command executions on background threads, blocking or with a callback,
//!   serialized on one shared transport
//! - A meter that recovers from a sleeping or idle sensor and samples
//!   continuously
//! - An in-memory device simulator for tests and demos without hardware
//!
//! ## Example
//!
//! ```no_run
//! use sps30_shdlc::{MeterSettings, ParticulateMatterMeter, SerialTransport, Sps30};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sensor = Sps30::new(SerialTransport::open_path("/dev/ttyUSB0")?);
//!     let meter = ParticulateMatterMeter::new(sensor, MeterSettings::default())?;
//!     let reading = meter.measure()?;
//!     println!("PM2.5: {:.1} µg/m³", reading.mass_pm2_5);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod command;
pub mod constants;
pub mod device;
pub mod error;
pub mod execution;
pub mod frame;
pub mod meter;
pub mod settings;
pub mod simulator;
pub mod store;
pub mod transport;
pub mod types;

pub use command::{Command, CommandKind, Version};
pub use device::Sps30;
pub use error::{FrameDefect, Result, ShdlcError, TransportError};
pub use execution::{CommandExecution, CompletedCommand, ExecutionState, ExecutionTrace, PendingCommand};
pub use frame::{MisoFrame, MosiFrame, Response};
pub use meter::{ParticulateMatterMeter, SamplingLimits, StopSignal};
pub use settings::{MeterSettings, PortSettings};
pub use simulator::DeviceSimulator;
pub use store::{persist_measurement, Channel, ReadingStore};
pub use transport::{SerialTransport, SharedTransport, Transport};
pub use types::*;
