//! Settings the surrounding service can embed in its own configuration.

use crate::constants::*;
use crate::types::MeasurementFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    pub path: String,
    pub baud_rate: u32,
    /// Applies to both reads and writes
    pub timeout_ms: u64,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_PORT.to_string(),
            baud_rate: BAUD_RATE,
            timeout_ms: TIMEOUT_MS,
        }
    }
}

/// Meter behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterSettings {
    /// Pause between samples of continuous measurement
    pub sampling_interval_ms: u64,
    pub measurement_format: MeasurementFormat,
}

impl MeterSettings {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            sampling_interval_ms: SAMPLING_INTERVAL_MS,
            measurement_format: MeasurementFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let port: PortSettings = serde_json::from_str(r#"{"path": "/dev/ttyUSB0"}"#).unwrap();
        assert_eq!(port.path, "/dev/ttyUSB0");
        assert_eq!(port.baud_rate, 115_200);
        assert_eq!(port.timeout_ms, 100);

        let meter: MeterSettings =
            serde_json::from_str(r#"{"measurement_format": "integer"}"#).unwrap();
        assert_eq!(meter.measurement_format, MeasurementFormat::Integer);
        assert_eq!(meter.sampling_interval(), Duration::from_secs(1));
    }
}
