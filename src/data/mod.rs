//! Data structures for equipment readings.
//!
//! Decoded advertisement measurements and the values the controller
//! collects over GATT.

pub mod activity;
pub mod measurements;

pub use activity::{CalibrationInfo, PurgeActivityInput};
pub use measurements::{
    format_duration, ChillerMeasurement, DissolvedOxygenMeasurement, Measurement,
    PurgeMeasurement,
};
