//! Firmware version parsing and gating.
//!
//! Devices report their version as a free-form string such as `"v1.3.2"`.
//! Parsing keeps only digits and dots, so anything unrecognisable comes back
//! as `None` and callers proceed without an update (fail-open).

use std::cmp::Ordering;

/// A `major.minor.patch` firmware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
}

impl FirmwareVersion {
    /// Create a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a reported version string.
    ///
    /// Non-digit, non-dot characters are stripped, the rest is split on `.`
    /// and up to three numeric components are kept. Missing trailing
    /// components default to zero. Returns `None` if no component parses.
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();

        let parts: Vec<u32> = cleaned
            .split('.')
            .filter_map(|part| part.parse().ok())
            .take(3)
            .collect();

        match parts.as_slice() {
            [] => None,
            [major] => Some(Self::new(*major, 0, 0)),
            [major, minor] => Some(Self::new(*major, *minor, 0)),
            [major, minor, patch, ..] => Some(Self::new(*major, *minor, *patch)),
        }
    }

    /// Parse the raw bytes of a version characteristic.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        std::str::from_utf8(data).ok().and_then(Self::parse)
    }

    /// Whether the device firmware accepts interval writes.
    ///
    /// A newer major always does; the same major does when the minor is at
    /// least the baseline's; an older major never does.
    pub fn interval_write_allowed(&self, baseline: &FirmwareVersion) -> bool {
        match self.major.cmp(&baseline.major) {
            Ordering::Greater => true,
            Ordering::Equal => self.minor >= baseline.minor,
            Ordering::Less => false,
        }
    }
}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Whether a device reporting `reported` should be offered `baseline`.
///
/// Unparseable reports never require an update.
pub fn needs_update(reported: &str, baseline: &FirmwareVersion) -> bool {
    FirmwareVersion::parse(reported).map_or(false, |version| version < *baseline)
}

/// Whether a device reporting `reported` supports the calibration check.
///
/// Unparseable reports skip the check.
pub fn supports_calibration(reported: &str, baseline: &FirmwareVersion) -> bool {
    FirmwareVersion::parse(reported).map_or(false, |version| version >= *baseline)
}
