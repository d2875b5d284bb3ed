//! Per-service characteristic resolvers.
//!
//! One [`ServiceResolver`] exists per logical service on the connected
//! peripheral. Reads and writes through a resolver are silently skipped while
//! the target handle is unresolved.

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::characteristics::{CharacteristicTable, Field};
use crate::ble::transport::{BleTransport, CharacteristicHandle, DeviceId};
use crate::ble::uuids::*;
use crate::protocol::codec::encode_le;

/// Logical service on the equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ServiceKind {
    /// Main sensor service.
    Main,
    /// Firmware version check.
    UpdateCheck,
    /// OTA transfer.
    Ota,
    /// Calibration.
    Calibration,
}

impl ServiceKind {
    /// Service UUID.
    pub fn uuid(self) -> Uuid {
        match self {
            Self::Main => MAIN_SERVICE_UUID,
            Self::UpdateCheck => UPDATE_SERVICE_UUID,
            Self::Ota => OTA_SERVICE_UUID,
            Self::Calibration => CALIBRATION_SERVICE_UUID,
        }
    }

    /// Map a discovered service UUID.
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        [Self::Main, Self::UpdateCheck, Self::Ota, Self::Calibration]
            .into_iter()
            .find(|kind| kind.uuid() == *uuid)
    }
}

/// Characteristics a service instance resolves, and which of them must be
/// present before the service counts as ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceLayout {
    /// Every field matched during resolution.
    pub known: &'static [Field],
    /// Fields required by `has_characteristics`.
    pub required: &'static [Field],
}

impl ServiceLayout {
    /// Fixed layout of an auxiliary service. The main service layout depends
    /// on the equipment profile.
    pub fn auxiliary(kind: ServiceKind) -> Option<Self> {
        const VERSION: &[Field] = &[Field::SensorVersion];
        const OTA: &[Field] = &[Field::OtaControl, Field::OtaData];
        const CALIBRATION: &[Field] = &[
            Field::CalibrationRequest,
            Field::CalibrationLast,
            Field::CalibrationOffset,
        ];

        match kind {
            ServiceKind::Main => None,
            ServiceKind::UpdateCheck => Some(Self {
                known: VERSION,
                required: VERSION,
            }),
            ServiceKind::Ota => Some(Self {
                known: OTA,
                required: OTA,
            }),
            ServiceKind::Calibration => Some(Self {
                known: CALIBRATION,
                required: &[Field::CalibrationRequest, Field::CalibrationLast],
            }),
        }
    }
}

/// Resolves and drives the characteristics of one service.
#[derive(Debug, Clone)]
pub struct ServiceResolver {
    kind: ServiceKind,
    layout: ServiceLayout,
    table: CharacteristicTable,
    discovered: bool,
}

impl ServiceResolver {
    /// Create an unresolved resolver.
    pub fn new(kind: ServiceKind, layout: ServiceLayout) -> Self {
        Self {
            kind,
            layout,
            table: CharacteristicTable::new(),
            discovered: false,
        }
    }

    /// Service this resolver covers.
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Populate the table from discovered characteristics.
    ///
    /// Does nothing once every required field is resolved. Returns
    /// `has_characteristics()` afterwards.
    pub fn resolve(&mut self, discovered: &[CharacteristicHandle]) -> bool {
        self.discovered = true;
        if self.has_characteristics() {
            trace!("{:?} service already resolved", self.kind);
            return true;
        }

        let service = self.kind.uuid();
        let in_service: Vec<CharacteristicHandle> = discovered
            .iter()
            .filter(|h| h.service == service)
            .copied()
            .collect();
        let added = self.table.resolve(self.layout.known, &in_service);
        debug!(
            "{:?} service: resolved {} characteristics ({} total)",
            self.kind,
            added,
            self.table.len()
        );

        self.has_characteristics()
    }

    /// Whether a characteristic listing has been applied.
    pub fn is_discovered(&self) -> bool {
        self.discovered
    }

    /// True once every required field is resolved.
    pub fn has_characteristics(&self) -> bool {
        self.table.has_characteristics(self.layout.required)
    }

    /// Whether a specific field is resolved.
    pub fn is_resolved(&self, field: Field) -> bool {
        self.table.get(field).is_some()
    }

    /// Field a handle belongs to, if this resolver owns it.
    pub fn field_for(&self, handle: &CharacteristicHandle) -> Option<Field> {
        self.table.field_for(handle)
    }

    /// Write an integer, encoded at the field's width, with acknowledgement.
    ///
    /// Returns `false` without touching the transport if the handle is
    /// unresolved or the field is not writable.
    pub fn write(
        &self,
        transport: &dyn BleTransport,
        device: &DeviceId,
        field: Field,
        value: u32,
    ) -> bool {
        let Some(width) = field.width() else {
            warn!("{} is not an integer-writable characteristic", field);
            return false;
        };
        if value > width.max_value() {
            warn!("{} value {} truncated to {:?}", field, value, width);
        }
        self.write_bytes(transport, device, field, encode_le(value, width), true)
    }

    /// Write raw bytes.
    pub fn write_bytes(
        &self,
        transport: &dyn BleTransport,
        device: &DeviceId,
        field: Field,
        value: Vec<u8>,
        with_response: bool,
    ) -> bool {
        match self.table.get(field) {
            Some(handle) => {
                trace!("Write {} ({} bytes)", field, value.len());
                transport.write(device, handle, value, with_response);
                true
            }
            None => {
                debug!("Skipping write to unresolved {}", field);
                false
            }
        }
    }

    /// Request a read. The value arrives later as a transport event.
    pub fn read(&self, transport: &dyn BleTransport, device: &DeviceId, field: Field) -> bool {
        match self.table.get(field) {
            Some(handle) => {
                trace!("Read {}", field);
                transport.read(device, handle);
                true
            }
            None => {
                debug!("Skipping read of unresolved {}", field);
                false
            }
        }
    }

    /// Forget all handles.
    pub fn clear(&mut self) {
        self.table.clear();
        self.discovered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::MockBleTransport;
    use mockall::predicate::*;

    const PURGE_KNOWN: &[Field] = &[Field::PurgeStart, Field::PurgeStop, Field::PurgeOxygen];

    fn purge_resolver() -> ServiceResolver {
        ServiceResolver::new(
            ServiceKind::Main,
            ServiceLayout {
                known: PURGE_KNOWN,
                required: &[Field::PurgeStart, Field::PurgeStop],
            },
        )
    }

    fn main_handle(uuid: Uuid) -> CharacteristicHandle {
        CharacteristicHandle::new(MAIN_SERVICE_UUID, uuid)
    }

    #[test]
    fn test_service_kind_uuid() {
        for kind in [
            ServiceKind::Main,
            ServiceKind::UpdateCheck,
            ServiceKind::Ota,
            ServiceKind::Calibration,
        ] {
            assert_eq!(ServiceKind::from_uuid(&kind.uuid()), Some(kind));
        }
        assert_eq!(ServiceKind::from_uuid(&Uuid::nil()), None);
    }

    #[test]
    fn test_resolve_ignores_other_services() {
        let mut resolver = purge_resolver();
        let foreign = CharacteristicHandle::new(OTA_SERVICE_UUID, PURGE_START_UUID);
        assert!(!resolver.resolve(&[foreign, main_handle(PURGE_STOP_UUID)]));
        assert!(!resolver.is_resolved(Field::PurgeStart));

        assert!(resolver.resolve(&[main_handle(PURGE_START_UUID)]));
        assert!(resolver.has_characteristics());
    }

    #[test]
    fn test_discovered_without_required_fields() {
        let mut resolver = purge_resolver();
        assert!(!resolver.is_discovered());

        assert!(!resolver.resolve(&[main_handle(PURGE_STOP_UUID)]));
        assert!(resolver.is_discovered());
        assert!(!resolver.has_characteristics());

        resolver.clear();
        assert!(!resolver.is_discovered());
    }

    #[test]
    fn test_write_encodes_width() {
        let mut resolver = purge_resolver();
        resolver.resolve(&[
            main_handle(PURGE_START_UUID),
            main_handle(PURGE_STOP_UUID),
        ]);

        let device = DeviceId::new("dev");
        let mut transport = MockBleTransport::new();
        transport
            .expect_write()
            .withf(|_, handle, value, ack| {
                handle.uuid == PURGE_START_UUID && value == &vec![0x78, 0x56, 0x34, 0x12] && *ack
            })
            .times(1)
            .return_const(());
        transport
            .expect_write()
            .withf(|_, handle, value, _| handle.uuid == PURGE_STOP_UUID && value == &vec![0])
            .times(1)
            .return_const(());

        assert!(resolver.write(&transport, &device, Field::PurgeStart, 0x1234_5678));
        assert!(resolver.write(&transport, &device, Field::PurgeStop, 0));
    }

    #[test]
    fn test_unresolved_is_noop() {
        let resolver = purge_resolver();
        let device = DeviceId::new("dev");
        let mut transport = MockBleTransport::new();
        transport.expect_write().never();
        transport.expect_read().never();

        assert!(!resolver.write(&transport, &device, Field::PurgeStart, 1));
        assert!(!resolver.read(&transport, &device, Field::PurgeOxygen));
    }

    #[test]
    fn test_read_and_lookup() {
        let mut resolver = purge_resolver();
        resolver.resolve(&[main_handle(PURGE_OXYGEN_UUID)]);
        let device = DeviceId::new("dev");

        let mut transport = MockBleTransport::new();
        transport
            .expect_read()
            .with(eq(device.clone()), eq(main_handle(PURGE_OXYGEN_UUID)))
            .times(1)
            .return_const(());

        assert!(resolver.read(&transport, &device, Field::PurgeOxygen));
        assert_eq!(
            resolver.field_for(&main_handle(PURGE_OXYGEN_UUID)),
            Some(Field::PurgeOxygen)
        );
        assert!(!resolver.write(&transport, &device, Field::PurgeOxygen, 1));
    }

    #[test]
    fn test_auxiliary_layouts() {
        assert!(ServiceLayout::auxiliary(ServiceKind::Main).is_none());
        let ota = ServiceLayout::auxiliary(ServiceKind::Ota).unwrap();
        assert_eq!(ota.required, &[Field::OtaControl, Field::OtaData]);
    }
}
