//! Protocol module for encoding values and driving device-side protocols.
//!
//! This module contains the implementations for:
//! - Little-endian field encoding and sentinel-aware decoding
//! - Firmware version gating
//! - Calibration payloads and elapsed-time phrasing
//! - The OTA transfer session

pub mod calibration;
pub mod codec;
pub mod ota;
pub mod version;

pub use calibration::{Elapsed, ElapsedUnit};
pub use codec::{decode_le, encode_le, FieldWidth};
pub use ota::{OtaAction, OtaControl, OtaPhase, OtaProgress, OtaSession, OTA_CHUNK_SIZE};
pub use version::{needs_update, supports_calibration, FirmwareVersion};
