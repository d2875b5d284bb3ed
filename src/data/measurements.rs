//! Decoded sensor measurements.
//!
//! Every field is independently optional: a sentinel in the advertisement
//! yields `None` rather than a default value.

use crate::ble::advertising::EquipmentKind;
use crate::protocol::codec::{field_bytes, read_signed_scaled, read_u16, read_unsigned_scaled};
use crate::utils::celsius_to_fahrenheit;

/// Offset of the status byte shared by every equipment kind.
pub const STATUS_OFFSET: usize = 9;

/// Purge status sub-field reported while the sensor calibrates.
pub const CALIBRATING_STATUS: u8 = 0b011;

/// Upper bound of the purge oxygen concentration, in ppb.
pub const MAX_CONCENTRATION: f64 = 8000.0;

/// Extract the 3-bit status sub-field (bits 3..=5) of a status byte.
#[inline]
pub fn status_code(status: u8) -> u8 {
    (status >> 3) & 0b111
}

/// Render a duration in minutes as `"1 hr 5 mins"`.
///
/// A missing duration renders as `"NA"` and zero as `"0 min"`.
pub fn format_duration(minutes: Option<u16>) -> String {
    let Some(minutes) = minutes else {
        return "NA".to_string();
    };

    let hours = minutes / 60;
    let mins = minutes % 60;
    let mut parts = Vec::with_capacity(2);

    if hours > 0 {
        parts.push(format!("{} {}", hours, if hours > 1 { "hrs" } else { "hr" }));
    }
    if mins > 0 {
        parts.push(format!("{} {}", mins, if mins > 1 { "mins" } else { "min" }));
    }

    if parts.is_empty() {
        "0 min".to_string()
    } else {
        parts.join(" ")
    }
}

/// Measurement carried by a purge probe advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PurgeMeasurement {
    /// Oxygen level in percent.
    pub oxygen_percent: Option<f64>,
    /// Chamber pressure reading.
    pub pressure: Option<f64>,
    /// Elapsed purge time in minutes.
    pub duration_minutes: Option<u16>,
    /// Raw status byte, absent if it is the sentinel.
    pub status: Option<u8>,
    /// 3-bit status sub-field.
    pub status_code: u8,
}

impl PurgeMeasurement {
    /// Decode from a validated purge payload.
    pub fn decode(payload: &[u8]) -> Self {
        let status = payload.get(STATUS_OFFSET).copied().unwrap_or(0xFF);
        Self {
            oxygen_percent: read_unsigned_scaled(payload, 10),
            pressure: read_unsigned_scaled(payload, 12),
            duration_minutes: read_u16(payload, 14),
            status: (status != 0xFF).then_some(status),
            status_code: status_code(status),
        }
    }

    /// Oxygen concentration derived from pressure, clamped to 0..=8000.
    pub fn oxygen_concentration(&self) -> Option<f64> {
        self.pressure
            .map(|p| (p * 40.0).clamp(0.0, MAX_CONCENTRATION))
    }

    /// Oxygen level in parts per million.
    pub fn oxygen_ppm(&self) -> Option<f64> {
        self.oxygen_percent.map(|pct| pct / 100.0 * 1_000_000.0)
    }

    /// Whether the probe reports it is calibrating.
    pub fn is_calibrating(&self) -> bool {
        self.status_code == CALIBRATING_STATUS
    }

    /// Purge duration text.
    pub fn duration_text(&self) -> String {
        format_duration(self.duration_minutes)
    }
}

/// Measurement carried by a chiller probe advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChillerMeasurement {
    /// Temperature in degrees Celsius.
    pub temperature_celsius: Option<f64>,
    /// Raw status byte.
    pub status: Option<u8>,
}

impl ChillerMeasurement {
    /// Decode from a validated chiller payload.
    pub fn decode(payload: &[u8]) -> Self {
        Self {
            temperature_celsius: read_signed_scaled(payload, 10),
            status: payload
                .get(STATUS_OFFSET)
                .copied()
                .filter(|status| *status != 0xFF),
        }
    }

    /// Temperature in degrees Fahrenheit.
    pub fn temperature_fahrenheit(&self) -> Option<f64> {
        self.temperature_celsius.map(celsius_to_fahrenheit)
    }
}

/// Measurement carried by a dissolved-oxygen probe advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DissolvedOxygenMeasurement {
    /// Raw oxygen field.
    pub oxygen_raw: Option<u16>,
    /// Temperature in degrees Celsius.
    pub temperature_celsius: Option<f64>,
    /// Session duration in minutes.
    pub duration_minutes: Option<u16>,
    /// 3-bit status sub-field.
    pub status_code: u8,
}

impl DissolvedOxygenMeasurement {
    /// Decode from a validated DO payload.
    ///
    /// Oxygen and temperature also treat an all-zero field as missing.
    pub fn decode(payload: &[u8]) -> Self {
        let non_zero = |offset: usize| field_bytes(payload, offset).map_or(false, |b| b != [0, 0]);

        Self {
            oxygen_raw: read_u16(payload, 10).filter(|_| non_zero(10)),
            temperature_celsius: read_signed_scaled(payload, 12).filter(|_| non_zero(12)),
            duration_minutes: read_u16(payload, 14),
            status_code: status_code(payload.get(STATUS_OFFSET).copied().unwrap_or(0)),
        }
    }

    /// Dissolved oxygen, scaled by 1/128.
    pub fn oxygen(&self) -> Option<f64> {
        self.oxygen_raw
            .map(|raw| f64::from(raw) / crate::protocol::codec::FIXED_POINT_SCALE)
    }

    /// Temperature in degrees Fahrenheit.
    pub fn temperature_fahrenheit(&self) -> Option<f64> {
        self.temperature_celsius.map(celsius_to_fahrenheit)
    }

    /// Session duration text.
    pub fn duration_text(&self) -> String {
        format_duration(self.duration_minutes)
    }
}

/// Decoded measurement for any supported equipment kind.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Measurement {
    /// Purge probe.
    Purge(PurgeMeasurement),
    /// Chiller probe.
    Chiller(ChillerMeasurement),
    /// Dissolved-oxygen probe.
    DissolvedOxygen(DissolvedOxygenMeasurement),
}

impl Measurement {
    /// Decode a validated payload of the given kind.
    pub fn decode(kind: EquipmentKind, payload: &[u8]) -> Self {
        match kind {
            EquipmentKind::Purge => Self::Purge(PurgeMeasurement::decode(payload)),
            EquipmentKind::Chiller => Self::Chiller(ChillerMeasurement::decode(payload)),
            EquipmentKind::DissolvedOxygen => {
                Self::DissolvedOxygen(DissolvedOxygenMeasurement::decode(payload))
            }
        }
    }

    /// Temperature in Celsius, for the kinds that report one.
    pub fn temperature_celsius(&self) -> Option<f64> {
        match self {
            Self::Purge(_) => None,
            Self::Chiller(m) => m.temperature_celsius,
            Self::DissolvedOxygen(m) => m.temperature_celsius,
        }
    }
}
