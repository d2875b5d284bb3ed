//! Values gathered over GATT before a purge or after a calibration read.

use chrono::{DateTime, Utc};

/// Starting conditions of a purge, read from the main service.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PurgeActivityInput {
    /// Oxygen level in percent when the purge was prepared.
    pub start_oxygen_percent: Option<f64>,
    /// Chamber pressure in millibar.
    pub start_pressure_mbar: Option<f64>,
    /// Atmospheric pressure in millibar.
    pub start_atmospheric_pressure_mbar: Option<u16>,
}

impl PurgeActivityInput {
    /// Starting oxygen in ppb, derived from the chamber pressure.
    pub fn start_oxygen_ppb(&self) -> Option<i64> {
        self.start_pressure_mbar.map(|mbar| (mbar * 40.0) as i64)
    }

    /// True once every reading has arrived.
    pub fn is_complete(&self) -> bool {
        self.start_oxygen_percent.is_some()
            && self.start_pressure_mbar.is_some()
            && self.start_atmospheric_pressure_mbar.is_some()
    }
}

/// Calibration details read from the calibration service.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationInfo {
    /// When the sensor was last calibrated.
    pub last_calibrated: Option<DateTime<Utc>>,
    /// Sensor offset.
    pub offset: Option<f64>,
}
