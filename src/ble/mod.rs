//! BLE communication module.
//!
//! This module provides advertisement decoding, GATT characteristic
//! resolution and the transport the controller drives.

pub mod advertising;
pub mod central;
pub mod characteristics;
pub mod services;
pub mod transport;
pub mod uuids;

pub use advertising::{EquipmentKind, EquipmentReading, SignalStrength};
pub use central::BtleplugTransport;
pub use characteristics::{CharacteristicTable, Field};
pub use services::{ServiceKind, ServiceLayout, ServiceResolver};
pub use transport::{BleTransport, CharacteristicHandle, DeviceId, TransportEvent};
pub use uuids::*;
