//! Read Sensor Example
//!
//! Connects to an SPS30, prints its identity and status as JSON and reads a
//! handful of measurements. The meter starts the measurement on its own when
//! the first read finds the sensor idle.
//!
//! Usage:
//!   cargo run --example read_sensor                  # Interactive mode
//!   cargo run --example read_sensor -- /dev/ttyUSB0  # Specify port
//!   cargo run --example read_sensor -- --simulate    # No hardware needed
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=trace cargo run --example read_sensor   # Dump every frame

use inquire::Select;
use log::info;
use sps30_shdlc::{
    DeviceSimulator, MeterSettings, ParticulateMatterMeter, SerialTransport, ShdlcError, Sps30,
    Transport,
};
use std::error::Error;
use std::thread;
use std::time::Duration;

/// Interactive serial port selection using inquire
fn select_port() -> Result<String, Box<dyn Error>> {
    let ports = SerialTransport::list_ports()?;

    if ports.is_empty() {
        eprintln!("No serial ports found!");
        std::process::exit(1);
    }

    let port_names: Vec<String> = ports
        .iter()
        .map(|p| format!("{} - {:?}", p.port_name, p.port_type))
        .collect();

    let selection = Select::new("Select a serial port:", port_names).prompt()?;

    // Extract just the port name (before " - ")
    let port_name = selection.split(" - ").next().unwrap_or_default().to_string();
    Ok(port_name)
}

fn read_sensor<T: Transport + 'static>(sensor: Sps30<T>) -> Result<(), Box<dyn Error>> {
    let meter = ParticulateMatterMeter::new(sensor, MeterSettings::default())?;

    info!("=== Device ===");
    let versions = meter.versions()?;
    info!("Product type:  {}", meter.product_type()?);
    info!("Serial number: {}", meter.serial_number()?);
    info!(
        "Firmware {}, hardware {}, SHDLC {}",
        versions.firmware, versions.hardware, versions.protocol
    );
    info!("Auto cleaning every {} s", meter.auto_cleaning_interval()?);

    let completed = meter.device().get_status(false)?.execute()?;
    info!("Status read took {}", completed.trace());
    println!("{}", serde_json::to_string_pretty(&completed.response()?)?);

    info!("=== Measurements ===");
    let mut readings = 0;
    while readings < 5 {
        match meter.measure() {
            Ok(measurement) => {
                println!("{}", serde_json::to_string(&measurement)?);
                readings += 1;
            }
            Err(ShdlcError::NoNewMeasurement) => info!("No new values yet"),
            Err(e) => return Err(e.into()),
        }
        thread::sleep(Duration::from_secs(1));
    }

    info!("Putting sensor to sleep");
    meter.shutdown();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logger with default info level if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match std::env::args().nth(1) {
        Some(flag) if flag == "--simulate" => {
            info!("Using simulated sensor");
            read_sensor(Sps30::new(
                DeviceSimulator::new().with_measurement_period(Duration::from_secs(1)),
            ))
        }
        port => {
            let port_name = port.map(Ok).unwrap_or_else(select_port)?;
            info!("Connecting to SPS30 on {}...", port_name);
            read_sensor(Sps30::new(SerialTransport::open_path(&port_name)?))
        }
    }
}
