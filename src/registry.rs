//! In-memory table of discovered equipment, keyed by serial number.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::ble::advertising::EquipmentReading;
use crate::ble::transport::DeviceId;

/// Latest reading for one piece of equipment and the peripheral it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    /// Most recent advertisement.
    pub reading: EquipmentReading,
    /// Peripheral that sent it.
    pub device: DeviceId,
}

/// Registry of discovered equipment.
///
/// Clones share the same table. Only the controller's event loop writes;
/// everyone else reads snapshots.
#[derive(Debug, Clone, Default)]
pub struct EquipmentRegistry {
    entries: Arc<RwLock<HashMap<String, RegistryEntry>>>,
}

impl EquipmentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for the reading's serial number.
    ///
    /// Returns `true` if the serial number was not registered before.
    pub fn upsert(&self, reading: EquipmentReading, device: DeviceId) -> bool {
        let serial = reading.serial_number().to_string();
        self.entries
            .write()
            .insert(serial, RegistryEntry { reading, device })
            .is_none()
    }

    /// Look up by serial number.
    pub fn get(&self, serial_number: &str) -> Option<RegistryEntry> {
        self.entries.read().get(serial_number).cloned()
    }

    /// True if any entry was advertised by `device`.
    pub fn contains_device(&self, device: &DeviceId) -> bool {
        self.entries.read().values().any(|e| &e.device == device)
    }

    /// Entry advertised by `device`.
    pub fn find_by_device(&self, device: &DeviceId) -> Option<RegistryEntry> {
        self.entries
            .read()
            .values()
            .find(|e| &e.device == device)
            .cloned()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing has been discovered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All entries, ordered by serial number.
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        let mut entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.reading.serial_number().cmp(b.reading.serial_number()));
        entries
    }
}
