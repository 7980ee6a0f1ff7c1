//! Continuous Sampling Example
//!
//! Samples the sensor once per second in the background and hands every
//! reading to a store, the way the surrounding service persists them.
//! Failed samples show up in the stream next to the readings.
//!
//! Usage:
//!   cargo run --example continuous_sampling -- /dev/ttyUSB0 [SAMPLES]
//!   cargo run --example continuous_sampling -- --simulate [SAMPLES]

use chrono::{DateTime, Utc};
use log::{info, warn};
use sps30_shdlc::{
    persist_measurement, DeviceSimulator, MeterSettings, ParticulateMatterMeter, ReadingStore,
    SamplingLimits, SerialTransport, Sps30, Transport,
};
use std::error::Error;
use std::sync::mpsc;
use std::time::Duration;

/// Store printing what it is given
struct ConsoleStore;

impl ReadingStore for ConsoleStore {
    type Error = std::convert::Infallible;

    fn insert(&mut self, sensor: &str, value: f32, timestamp: DateTime<Utc>) -> Result<(), Self::Error> {
        println!("{}  {:<28} {:>8.2}", timestamp.format("%H:%M:%S"), sensor, value);
        Ok(())
    }
}

fn sample<T: Transport + 'static>(sensor: Sps30<T>, samples: usize) -> Result<(), Box<dyn Error>> {
    let meter = ParticulateMatterMeter::new(sensor, MeterSettings::default())?;
    let (tx, rx) = mpsc::channel();
    meter.continuous_measurement(tx, None, SamplingLimits::count(samples))?;

    let mut store = ConsoleStore;
    for reading in rx {
        match reading {
            Ok(measurement) => persist_measurement(&mut store, &measurement)?,
            Err(e) => warn!("Sample failed: {}", e),
        }
    }

    info!("Sampling finished");
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let target = args.next().unwrap_or_else(|| "--simulate".to_string());
    let samples = args.next().map(|n| n.parse::<usize>()).transpose()?.unwrap_or(10);

    if target == "--simulate" {
        let simulator = DeviceSimulator::new().with_measurement_period(Duration::from_millis(900));
        sample(Sps30::new(simulator), samples)
    } else {
        info!("Connecting to SPS30 on {}...", target);
        sample(Sps30::new(SerialTransport::open_path(&target)?), samples)
    }
}
