//! Utility functions for the preddio-ble crate.

use chrono::{DateTime, Utc};

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use preddio_ble::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(100.0);
/// assert!((fahrenheit - 212.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Seconds since the Unix epoch as the 32-bit value the firmware expects.
///
/// Times before the epoch clamp to zero and times past 2106 clamp to `u32::MAX`.
pub fn unix_timestamp(at: DateTime<Utc>) -> u32 {
    at.timestamp().clamp(0, i64::from(u32::MAX)) as u32
}

/// Render bytes as uppercase hex without separators.
pub fn hex_string<'a>(bytes: impl IntoIterator<Item = &'a u8>) -> String {
    bytes.into_iter().map(|b| format!("{:02X}", b)).collect()
}
