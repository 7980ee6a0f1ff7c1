use crate::command::Version;
use crate::constants::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number representation requested when starting a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementFormat {
    /// Big-endian IEEE754 floats
    #[default]
    Float,
    /// Big-endian unsigned 16-bit integers
    Integer,
}

impl MeasurementFormat {
    /// Format byte sent with start measurement
    pub const fn code(self) -> u8 {
        match self {
            MeasurementFormat::Float => 0x03,
            MeasurementFormat::Integer => 0x05,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(MeasurementFormat::Float),
            0x05 => Some(MeasurementFormat::Integer),
            _ => None,
        }
    }

    /// Size of one channel on the wire
    pub const fn width(self) -> usize {
        match self {
            MeasurementFormat::Float => 4,
            MeasurementFormat::Integer => 2,
        }
    }

    /// Size of a complete measurement payload
    pub const fn payload_len(self) -> usize {
        Measurement::CHANNELS * self.width()
    }
}

/// One sample of the particulate matter sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Mass Concentration PM1.0 [μg/m³]
    pub mass_pm1_0: f32,
    /// Mass Concentration PM2.5 [μg/m³]
    pub mass_pm2_5: f32,
    /// Mass Concentration PM4.0 [μg/m³]
    pub mass_pm4_0: f32,
    /// Mass Concentration PM10 [μg/m³]
    pub mass_pm10: f32,
    /// Number Concentration PM0.5 [#/cm³]
    pub number_pm0_5: f32,
    /// Number Concentration PM1.0 [#/cm³]
    pub number_pm1_0: f32,
    /// Number Concentration PM2.5 [#/cm³]
    pub number_pm2_5: f32,
    /// Number Concentration PM4.0 [#/cm³]
    pub number_pm4_0: f32,
    /// Number Concentration PM10 [#/cm³]
    pub number_pm10: f32,
    /// Typical Particle Size [μm]
    pub typical_particle_size: f32,
    /// When the driver received the sample
    pub timestamp: DateTime<Utc>,
}

impl Measurement {
    pub const CHANNELS: usize = 10;

    fn from_values(mut values: impl Iterator<Item = f32>, timestamp: DateTime<Utc>) -> Option<Self> {
        Some(Self {
            mass_pm1_0: values.next()?,
            mass_pm2_5: values.next()?,
            mass_pm4_0: values.next()?,
            mass_pm10: values.next()?,
            number_pm0_5: values.next()?,
            number_pm1_0: values.next()?,
            number_pm2_5: values.next()?,
            number_pm4_0: values.next()?,
            number_pm10: values.next()?,
            typical_particle_size: values.next()?,
            timestamp,
        })
    }

    /// Decodes a measurement payload, the format follows from its length.
    pub fn from_payload(data: &[u8]) -> Option<Self> {
        let now = Utc::now();
        if data.len() == MeasurementFormat::Float.payload_len() {
            let values = data
                .chunks_exact(4)
                .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]));
            Self::from_values(values, now)
        } else if data.len() == MeasurementFormat::Integer.payload_len() {
            let values = data
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]) as f32);
            Self::from_values(values, now)
        } else {
            None
        }
    }

    /// Channel values in wire order
    pub fn values(&self) -> [f32; Self::CHANNELS] {
        [
            self.mass_pm1_0,
            self.mass_pm2_5,
            self.mass_pm4_0,
            self.mass_pm10,
            self.number_pm0_5,
            self.number_pm1_0,
            self.number_pm2_5,
            self.number_pm4_0,
            self.number_pm10,
            self.typical_particle_size,
        ]
    }

    /// Encodes the channel values the way the device sends them
    pub fn to_payload(&self, format: MeasurementFormat) -> Vec<u8> {
        let mut payload = Vec::with_capacity(format.payload_len());
        for value in self.values() {
            match format {
                MeasurementFormat::Float => payload.extend_from_slice(&value.to_be_bytes()),
                MeasurementFormat::Integer => {
                    let value = value.round().clamp(0.0, u16::MAX as f32) as u16;
                    payload.extend_from_slice(&value.to_be_bytes())
                }
            }
        }
        payload
    }
}

/// Period of the automatic fan cleaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCleanInterval {
    pub interval_s: u32,
}

/// Product type or serial number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub info: String,
}

impl DeviceInfo {
    /// Reads a NUL-terminated ASCII string
    pub fn from_payload(data: &[u8]) -> Self {
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Self {
            info: String::from_utf8_lossy(&data[..end]).trim().to_string(),
        }
    }
}

/// Firmware, hardware and protocol versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versions {
    pub firmware: Version,
    pub hardware: u8,
    pub protocol: Version,
}

impl Versions {
    pub const PAYLOAD_LEN: usize = 7;

    /// Layout: fw major, fw minor, reserved, hw revision, reserved, shdlc major, shdlc minor
    pub fn from_payload(data: &[u8]) -> Option<Self> {
        let [fw_major, fw_minor, _, hardware, _, proto_major, proto_minor, ..] = *data else {
            return None;
        };
        Some(Self {
            firmware: Version::new(fw_major, fw_minor),
            hardware,
            protocol: Version::new(proto_major, proto_minor),
        })
    }

    pub fn to_payload(&self) -> [u8; Self::PAYLOAD_LEN] {
        [
            self.firmware.major,
            self.firmware.minor,
            0,
            self.hardware,
            0,
            self.protocol.major,
            self.protocol.minor,
        ]
    }
}

/// Flags of the device status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub speed_warning: bool,
    pub laser_error: bool,
    pub fan_error: bool,
    /// Register as read
    pub register: u32,
}

impl DeviceStatus {
    pub const PAYLOAD_LEN: usize = 5;

    pub fn from_register(register: u32) -> Self {
        Self {
            speed_warning: register & STATUS_SPEED_WARNING_BIT != 0,
            laser_error: register & STATUS_LASER_ERROR_BIT != 0,
            fan_error: register & STATUS_FAN_ERROR_BIT != 0,
            register,
        }
    }

    /// Register as big-endian u32 followed by a reserved byte
    pub fn from_payload(data: &[u8]) -> Option<Self> {
        let [a, b, c, d, ..] = *data else {
            return None;
        };
        Some(Self::from_register(u32::from_be_bytes([a, b, c, d])))
    }

    pub fn has_error(&self) -> bool {
        self.register != 0
    }
}
