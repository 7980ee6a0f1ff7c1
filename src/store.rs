//! Hand-off of readings to the surrounding service's persistence.

use crate::types::Measurement;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage accepting one value per sensor channel and point in time.
pub trait ReadingStore {
    type Error;

    fn insert(&mut self, sensor: &str, value: f32, timestamp: DateTime<Utc>) -> Result<(), Self::Error>;
}

/// Channels of a measurement, each stored under its own sensor handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    MassPm1_0,
    MassPm2_5,
    MassPm4_0,
    MassPm10,
    NumberPm0_5,
    NumberPm1_0,
    NumberPm2_5,
    NumberPm4_0,
    NumberPm10,
    TypicalParticleSize,
}

impl Channel {
    /// Wire order of the measurement payload
    pub const ALL: [Channel; Measurement::CHANNELS] = [
        Channel::MassPm1_0,
        Channel::MassPm2_5,
        Channel::MassPm4_0,
        Channel::MassPm10,
        Channel::NumberPm0_5,
        Channel::NumberPm1_0,
        Channel::NumberPm2_5,
        Channel::NumberPm4_0,
        Channel::NumberPm10,
        Channel::TypicalParticleSize,
    ];

    /// Stable sensor handle used by the store
    pub const fn handle(self) -> &'static str {
        match self {
            Channel::MassPm1_0 => "sps30.mass.pm1_0",
            Channel::MassPm2_5 => "sps30.mass.pm2_5",
            Channel::MassPm4_0 => "sps30.mass.pm4_0",
            Channel::MassPm10 => "sps30.mass.pm10",
            Channel::NumberPm0_5 => "sps30.number.pm0_5",
            Channel::NumberPm1_0 => "sps30.number.pm1_0",
            Channel::NumberPm2_5 => "sps30.number.pm2_5",
            Channel::NumberPm4_0 => "sps30.number.pm4_0",
            Channel::NumberPm10 => "sps30.number.pm10",
            Channel::TypicalParticleSize => "sps30.typical_particle_size",
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            Channel::MassPm1_0 | Channel::MassPm2_5 | Channel::MassPm4_0 | Channel::MassPm10 => "µg/m³",
            Channel::TypicalParticleSize => "µm",
            _ => "#/cm³",
        }
    }

    pub fn value(self, measurement: &Measurement) -> f32 {
        match self {
            Channel::MassPm1_0 => measurement.mass_pm1_0,
            Channel::MassPm2_5 => measurement.mass_pm2_5,
            Channel::MassPm4_0 => measurement.mass_pm4_0,
            Channel::MassPm10 => measurement.mass_pm10,
            Channel::NumberPm0_5 => measurement.number_pm0_5,
            Channel::NumberPm1_0 => measurement.number_pm1_0,
            Channel::NumberPm2_5 => measurement.number_pm2_5,
            Channel::NumberPm4_0 => measurement.number_pm4_0,
            Channel::NumberPm10 => measurement.number_pm10,
            Channel::TypicalParticleSize => measurement.typical_particle_size,
        }
    }
}

/// Writes every channel of `measurement` with its timestamp, stopping at the
/// first failure.
pub fn persist_measurement<S: ReadingStore>(
    store: &mut S,
    measurement: &Measurement,
) -> Result<(), S::Error> {
    for channel in Channel::ALL {
        store.insert(channel.handle(), channel.value(measurement), measurement.timestamp)?;
    }
    Ok(())
}
