//! Diagnostics Example
//!
//! Interactive command console for an SPS30. Every command runs in the
//! background with a callback; while it is pending the live trace is
//! printed, then the interpreted response or the failure.
//!
//! Usage:
//!   cargo run --example diagnostics                  # Interactive mode
//!   cargo run --example diagnostics -- /dev/ttyUSB0  # Specify port
//!   cargo run --example diagnostics -- --simulate    # No hardware needed
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=trace cargo run --example diagnostics   # Dump every frame

use inquire::Select;
use log::{info, warn};
use sps30_shdlc::constants::DEFAULT_AUTO_CLEAN_INTERVAL_S;
use sps30_shdlc::{
    CommandExecution, DeviceSimulator, ExecutionState, SerialTransport, Sps30, Transport,
};
use std::error::Error;
use std::thread;
use std::time::Duration;

const QUIT: &str = "Quit";

const MENU: [&str; 15] = [
    "Start measurement",
    "Stop measurement",
    "Read measured values",
    "Sleep",
    "Wake-up",
    "Start fan cleaning",
    "Read auto cleaning interval",
    "Write auto cleaning interval",
    "Read product type",
    "Read serial number",
    "Read version",
    "Read device status",
    "Read and clear device status",
    "Reset",
    QUIT,
];

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

fn execution<T: Transport + 'static>(
    sensor: &Sps30<T>,
    choice: &str,
) -> sps30_shdlc::Result<CommandExecution<T>> {
    match choice {
        "Start measurement" => sensor.start_measurement(),
        "Stop measurement" => sensor.stop_measurement(),
        "Read measured values" => sensor.read_measured_values(),
        "Sleep" => sensor.sleep(),
        "Wake-up" => sensor.wake_up(),
        "Start fan cleaning" => sensor.start_fan_cleaning(),
        "Read auto cleaning interval" => sensor.get_auto_cleaning_interval(),
        "Write auto cleaning interval" => {
            sensor.set_auto_cleaning_interval(u64::from(DEFAULT_AUTO_CLEAN_INTERVAL_S))
        }
        "Read product type" => sensor.get_product_type(),
        "Read serial number" => sensor.get_serial_number(),
        "Read version" => sensor.get_version(),
        "Read device status" => sensor.get_status(false),
        "Read and clear device status" => sensor.get_status(true),
        _ => sensor.reset(),
    }
}

fn run_command<T: Transport + 'static>(sensor: &Sps30<T>, choice: &str) -> Result<(), Box<dyn Error>> {
    let pending = execution(sensor, choice)?.execute_async(|frame| {
        info!("Callback: {} answered {} data bytes", frame.command(), frame.data().len());
    })?;

    let command = pending.command();
    while !pending.is_finished() {
        if pending.state() == ExecutionState::Running {
            println!("  {} running: {}", command, pending.trace());
        }
        thread::sleep(Duration::from_millis(5));
    }
    println!("  {} {:?}", command, pending.state());

    let completed = pending.join();
    println!("  Trace: {}", completed.trace());
    match completed.response() {
        Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
        Err(e) => warn!("{} failed: {}", command, e),
    }
    Ok(())
}

fn console<T: Transport + 'static>(sensor: Sps30<T>) -> Result<(), Box<dyn Error>> {
    sensor.open()?;

    loop {
        let choice = Select::new("Command:", MENU.to_vec())
            .with_page_size(MENU.len())
            .prompt()?;
        if choice == QUIT {
            break;
        }
        run_command(&sensor, choice)?;
    }

    info!("=== Diagnostics Complete ===");
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logger with default info level if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match std::env::args().nth(1) {
        Some(flag) if flag == "--simulate" => {
            info!("Using simulated sensor");
            console(Sps30::new(DeviceSimulator::new()))
        }
        port => {
            let port_name = port.map(Ok).unwrap_or_else(select_port)?;
            info!("Connecting to SPS30 on {}...", port_name);
            console(Sps30::new(SerialTransport::open_path(&port_name)?))
        }
    }
}
