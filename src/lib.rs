// Allow holding locks across await points - we use parking_lot which is designed for this
#![allow(clippy::await_holding_lock)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # preddio-ble
//!
//! A cross-platform Rust library for controlling Preddio brewing instruments
//! over Bluetooth Low Energy: purge probes, chillers and dissolved-oxygen
//! (DO) probes.
//!
//! ## Features
//!
//! - **Discovery**: Decode Preddio advertisements into typed readings
//! - **Signal Strength**: Five-level signal classification with staleness
//! - **Commands**: Start and stop purges, configure chiller alarms and DO sessions
//! - **Calibration**: Read the last calibration and request a new one
//! - **Firmware Updates**: Version-gated OTA transfer with progress reporting
//! - **Reconnection**: Automatic reconnect after unexpected link loss
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use preddio_ble::{ControllerProfile, EquipmentManager, EquipmentState, Result};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = EquipmentManager::new(ControllerProfile::Chiller).await?;
//!     manager.start_scan().await?;
//!
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!
//!     for entry in manager.equipment() {
//!         println!(
//!             "Found {} {} ({:?})",
//!             entry.reading.kind(),
//!             entry.reading.serial_number(),
//!             entry.reading.signal_strength()
//!         );
//!     }
//!
//!     if let Some(nearest) = manager.nearest_equipment() {
//!         manager.connect(nearest.reading.serial_number(), false).await?;
//!         manager
//!             .wait_for_state(
//!                 |s| *s == EquipmentState::CharacteristicsDiscovered,
//!                 Duration::from_secs(10),
//!             )
//!             .await?;
//!         manager.set_chiller_alarms(2, 8, 15).await?;
//!     }
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod controller;
pub mod data;
pub mod device_manager;
pub mod error;
pub mod firmware;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod timers;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use config::{ControllerConfig, FirmwareBaselines, TimingConfig};
pub use controller::{ControllerCommand, EquipmentController, EquipmentEvent};
pub use device_manager::{CallbackHandle, EquipmentManager};
pub use error::{Error, Result};
pub use firmware::{DirectoryFirmwareSource, FirmwareImage, FirmwareSource, StaticFirmware};
pub use registry::{EquipmentRegistry, RegistryEntry};
pub use state::{ControllerProfile, EquipmentState, PurgeMode, StopTarget};
pub use utils::celsius_to_fahrenheit;

// Re-export commonly used types from submodules
pub use ble::advertising::{EquipmentKind, EquipmentReading, SignalStrength};
pub use ble::transport::{BleTransport, DeviceId, TransportEvent};
pub use data::{
    CalibrationInfo, ChillerMeasurement, DissolvedOxygenMeasurement, Measurement,
    PurgeActivityInput, PurgeMeasurement,
};
pub use protocol::{FirmwareVersion, OtaProgress};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _ = std::any::TypeId::of::<EquipmentManager>();
        let _ = std::any::TypeId::of::<EquipmentController>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<EquipmentReading>();
        let _ = std::any::TypeId::of::<Measurement>();
        let _ = std::any::TypeId::of::<FirmwareVersion>();
    }

    #[test]
    fn test_temperature_conversion() {
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
    }
}
