//! Advertising data parsing.
//!
//! Parses manufacturer-specific advertising data from Preddio equipment.
//!
//! Layout (offsets into the manufacturer data, company id included):
//!
//! | Bytes  | Field                                    |
//! |--------|------------------------------------------|
//! | 0-1    | Company id `0x09E0`, either byte order   |
//! | 2      | Equipment kind tag                       |
//! | 3-8    | Serial number, least significant first   |
//! | 9      | Status byte                              |
//! | 10-15  | Kind-specific little-endian fields       |

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::ble::uuids::PREDDIO_MANUFACTURER_ID;
use crate::data::Measurement;
use crate::error::{Error, Result};
use crate::utils::hex_string;

/// Equipment kind, identified by the tag at byte 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum EquipmentKind {
    /// Oxygen purge probe.
    Purge = 0x18,
    /// Chiller temperature probe.
    Chiller = 0x1A,
    /// Dissolved-oxygen probe.
    DissolvedOxygen = 0x1C,
}

impl EquipmentKind {
    /// Create from the raw tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x18 => Some(Self::Purge),
            0x1A => Some(Self::Chiller),
            0x1C => Some(Self::DissolvedOxygen),
            _ => None,
        }
    }

    /// Raw tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Exact manufacturer-data length for this kind.
    pub fn payload_len(self) -> usize {
        match self {
            Self::Chiller => 12,
            Self::Purge | Self::DissolvedOxygen => 16,
        }
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Purge => "Purge",
            Self::Chiller => "Chiller",
            Self::DissolvedOxygen => "Dissolved Oxygen",
        }
    }
}

impl std::fmt::Display for EquipmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Five-level signal strength bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SignalStrength {
    /// Reading is stale or carried no RSSI.
    #[default]
    NoSignal,
    /// RSSI at or below -85 dBm.
    Low,
    /// RSSI at or below -70 dBm.
    Good,
    /// RSSI at or below -55 dBm.
    VeryGood,
    /// Anything stronger.
    Excellent,
}

impl SignalStrength {
    /// Bucket an RSSI value for a reading of the given age.
    pub fn classify(rssi: Option<i16>, age: Duration, stale_after: Duration) -> Self {
        if age > stale_after {
            return Self::NoSignal;
        }
        match rssi {
            None => Self::NoSignal,
            Some(r) if r <= -85 => Self::Low,
            Some(r) if r <= -70 => Self::Good,
            Some(r) if r <= -55 => Self::VeryGood,
            Some(_) => Self::Excellent,
        }
    }

    /// Number of bars to draw (0-4).
    pub fn bars(&self) -> u8 {
        *self as u8
    }
}

/// One decoded advertisement.
///
/// Readings are immutable; a newer advertisement from the same serial number
/// produces a new reading that replaces this one in the registry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EquipmentReading {
    manufacturer_id: u16,
    kind: EquipmentKind,
    serial_number: String,
    payload: Bytes,
    captured_at: DateTime<Utc>,
    rssi: Option<i16>,
}

impl EquipmentReading {
    /// Length of the company id, kind tag and serial number header.
    const HEADER_SIZE: usize = 9;

    /// Default age after which the signal is reported as lost.
    pub const STALE_AFTER: Duration = Duration::from_secs(30);

    /// Parse manufacturer data captured now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPayload`] if the company id is wrong, the kind
    /// tag is unknown or the length does not match the kind.
    pub fn parse(data: &[u8], rssi: Option<i16>) -> Result<Self> {
        Self::parse_at(data, rssi, Utc::now())
    }

    /// Parse manufacturer data captured at a specific time.
    pub fn parse_at(data: &[u8], rssi: Option<i16>, captured_at: DateTime<Utc>) -> Result<Self> {
        if data.len() < 3 {
            return Err(Error::MalformedPayload {
                context: format!("Advertisement too short: {} bytes", data.len()),
            });
        }

        let id = PREDDIO_MANUFACTURER_ID.to_le_bytes();
        let vendor = [data[0], data[1]];
        if vendor != id && vendor != [id[1], id[0]] {
            return Err(Error::MalformedPayload {
                context: format!("Unknown vendor id {:02X}{:02X}", data[0], data[1]),
            });
        }

        let kind = EquipmentKind::from_tag(data[2]).ok_or_else(|| Error::MalformedPayload {
            context: format!("Unknown equipment kind tag {:#04x}", data[2]),
        })?;

        if data.len() != kind.payload_len() {
            return Err(Error::MalformedPayload {
                context: format!(
                    "{} advertisement is {} bytes (expected {})",
                    kind,
                    data.len(),
                    kind.payload_len()
                ),
            });
        }

        let serial_number = hex_string(data[3..Self::HEADER_SIZE].iter().rev());

        Ok(Self {
            manufacturer_id: PREDDIO_MANUFACTURER_ID,
            kind,
            serial_number,
            payload: Bytes::copy_from_slice(data),
            captured_at,
            rssi,
        })
    }

    /// Company id, normalised to `0x09E0`.
    pub fn manufacturer_id(&self) -> u16 {
        self.manufacturer_id
    }

    /// Equipment kind.
    pub fn kind(&self) -> EquipmentKind {
        self.kind
    }

    /// Raw product type code (the kind tag).
    pub fn product_code(&self) -> u8 {
        self.kind.tag()
    }

    /// Serial number as uppercase hex, most significant byte first.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Raw manufacturer data.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// When the advertisement was received.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Received signal strength in dBm.
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Raw status byte.
    pub fn status_byte(&self) -> u8 {
        self.payload[crate::data::measurements::STATUS_OFFSET]
    }

    /// Decode the kind-specific measurement.
    pub fn measurement(&self) -> Measurement {
        Measurement::decode(self.kind, &self.payload)
    }

    /// Signal strength as of `now`.
    pub fn signal_strength_at(&self, now: DateTime<Utc>, stale_after: Duration) -> SignalStrength {
        let age = (now - self.captured_at).to_std().unwrap_or(Duration::ZERO);
        SignalStrength::classify(self.rssi, age, stale_after)
    }

    /// Signal strength right now, using the default staleness window.
    pub fn signal_strength(&self) -> SignalStrength {
        self.signal_strength_at(Utc::now(), Self::STALE_AFTER)
    }
}
