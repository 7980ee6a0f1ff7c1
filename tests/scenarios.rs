//! Command sequences observed on the simulated sensor for the situations
//! the meter recovers from.

use sps30_shdlc::constants::ERR_NOT_ALLOWED;
use sps30_shdlc::simulator::{DeviceMode, JournalEntry, Malfunction, Reply};
use sps30_shdlc::{
    Command, DeviceSimulator, MeterSettings, ParticulateMatterMeter, SharedTransport, ShdlcError,
    Sps30, TransportError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn meter(simulator: DeviceSimulator) -> (ParticulateMatterMeter<DeviceSimulator>, SharedTransport<DeviceSimulator>) {
    let sensor = Sps30::new(simulator);
    let transport = Arc::clone(sensor.transport());
    let meter = ParticulateMatterMeter::new(sensor, MeterSettings::default()).unwrap();
    // cache the versions so only the scenario's own commands are journaled
    meter.versions().unwrap();
    transport.lock().unwrap().take_journal();
    (meter, transport)
}

fn journal(transport: &SharedTransport<DeviceSimulator>) -> Vec<JournalEntry> {
    transport.lock().unwrap().take_journal()
}

fn entry(command: Command, reply: Reply) -> JournalEntry {
    JournalEntry::new(command, reply)
}

#[test]
fn measure_while_idle_starts_measurement() {
    let (meter, transport) = meter(DeviceSimulator::new());

    let measurement = meter.measure().unwrap();
    assert!(measurement.mass_pm2_5 >= measurement.mass_pm1_0);

    assert_eq!(
        journal(&transport),
        [
            entry(Command::ReadMeasuredValues, Reply::NoNewData),
            entry(Command::StartMeasurement, Reply::Accepted),
            entry(Command::ReadMeasuredValues, Reply::Accepted),
        ]
    );
    assert_eq!(transport.lock().unwrap().mode(), DeviceMode::Measuring);
}

#[test]
fn measure_while_asleep_wakes_sensor() {
    let (meter, transport) = meter(DeviceSimulator::new());
    meter.start_measurement().unwrap();
    transport.lock().unwrap().deactivate_interface();
    journal(&transport);
    let writes = transport.lock().unwrap().write_count();

    meter.measure().unwrap();

    assert_eq!(
        journal(&transport),
        [
            entry(Command::ReadMeasuredValues, Reply::Silent),
            entry(Command::WakeUp, Reply::Accepted),
            entry(Command::ReadMeasuredValues, Reply::Accepted),
        ]
    );
    // read, pulse, wake-up frame, read
    assert_eq!(transport.lock().unwrap().write_count() - writes, 4);
}

#[test]
fn measure_after_commanded_sleep_wakes_and_starts() {
    let (meter, transport) = meter(DeviceSimulator::new());
    meter.sleep().unwrap();
    journal(&transport);

    meter.measure().unwrap();

    assert_eq!(
        journal(&transport),
        [
            entry(Command::ReadMeasuredValues, Reply::Silent),
            entry(Command::WakeUp, Reply::Accepted),
            entry(Command::ReadMeasuredValues, Reply::NoNewData),
            entry(Command::StartMeasurement, Reply::Accepted),
            entry(Command::ReadMeasuredValues, Reply::Accepted),
        ]
    );
}

#[test]
fn sleep_while_measuring_stops_first() {
    let (meter, transport) = meter(DeviceSimulator::new());
    meter.start_measurement().unwrap();
    journal(&transport);

    meter.sleep().unwrap();

    assert_eq!(
        journal(&transport),
        [
            entry(Command::Sleep, Reply::Rejected(ERR_NOT_ALLOWED)),
            entry(Command::StopMeasurement, Reply::Accepted),
            entry(Command::Sleep, Reply::Accepted),
        ]
    );
    assert_eq!(transport.lock().unwrap().mode(), DeviceMode::DeepSleep);
}

#[test]
fn invalid_auto_cleaning_interval_sends_nothing() {
    let sensor = Sps30::new(DeviceSimulator::new());
    sensor.open().unwrap();
    for seconds in [0, 1u64 << 32] {
        assert!(matches!(
            sensor.set_auto_cleaning_interval(seconds),
            Err(ShdlcError::InvalidConfiguration(_))
        ));
    }
    assert_eq!(sensor.transport().lock().unwrap().write_count(), 0);

    // the meter validates before anything else, version read included
    let transport = Arc::clone(sensor.transport());
    let meter = ParticulateMatterMeter::new(sensor, MeterSettings::default()).unwrap();
    assert!(matches!(
        meter.set_auto_cleaning_interval(0),
        Err(ShdlcError::InvalidConfiguration(_))
    ));
    assert_eq!(transport.lock().unwrap().write_count(), 0);

    meter.set_auto_cleaning_interval(3600).unwrap();
    assert_eq!(transport.lock().unwrap().auto_clean_interval(), 3600);
    assert_eq!(meter.auto_cleaning_interval().unwrap(), 3600);
}

#[test]
fn unresponsive_sensor_times_out() {
    let timeout = Duration::from_millis(100);
    let mut simulator = DeviceSimulator::new().with_timeouts(timeout, timeout);
    simulator.inject(Malfunction::NotResponding);
    let sensor = Sps30::new(simulator);
    sensor.open().unwrap();

    let started = Instant::now();
    let err = sensor.get_version().unwrap().execute().unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        ShdlcError::Transport(TransportError::WriteTimeout(t)) if t == timeout
    ));
    assert!(err.is_transport());
    assert!(elapsed >= timeout, "failed after {:?}", elapsed);
    assert!(elapsed < timeout * 4, "failed after {:?}", elapsed);
}
