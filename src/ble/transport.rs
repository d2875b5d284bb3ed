//! Transport seam between the controller and the BLE stack.
//!
//! Every operation is fire-and-forget: the transport reports the outcome later
//! as a [`TransportEvent`], which the owner of the controller feeds back into
//! its event loop.

use uuid::Uuid;

/// Opaque identifier of a remote peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a platform identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A characteristic located within its service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    /// Owning service.
    pub service: Uuid,
    /// Characteristic UUID.
    pub uuid: Uuid,
}

impl CharacteristicHandle {
    /// Create a handle.
    pub fn new(service: Uuid, uuid: Uuid) -> Self {
        Self { service, uuid }
    }
}

/// Outcome reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Manufacturer data was received. The company id is included.
    Advertisement {
        /// Advertising peripheral.
        device: DeviceId,
        /// Raw manufacturer data.
        manufacturer_data: Vec<u8>,
        /// Signal strength in dBm.
        rssi: Option<i16>,
    },
    /// A link was established.
    Connected(DeviceId),
    /// A connection attempt failed.
    ConnectFailed {
        /// Target peripheral.
        device: DeviceId,
        /// Failure description.
        reason: String,
    },
    /// The link dropped or was closed.
    Disconnected {
        /// Peripheral that went away.
        device: DeviceId,
    },
    /// Services were discovered.
    ServicesDiscovered {
        /// Peripheral.
        device: DeviceId,
        /// Service UUIDs found.
        services: Vec<Uuid>,
    },
    /// Characteristics of one service were discovered.
    CharacteristicsDiscovered {
        /// Peripheral.
        device: DeviceId,
        /// Service whose characteristics were listed.
        service: Uuid,
        /// Characteristics found.
        characteristics: Vec<CharacteristicHandle>,
    },
    /// An acknowledged write finished.
    WriteCompleted {
        /// Peripheral.
        device: DeviceId,
        /// Target characteristic.
        characteristic: CharacteristicHandle,
        /// Error text on failure.
        result: std::result::Result<(), String>,
    },
    /// A read finished.
    ValueRead {
        /// Peripheral.
        device: DeviceId,
        /// Source characteristic.
        characteristic: CharacteristicHandle,
        /// The value, or error text on failure.
        result: std::result::Result<Vec<u8>, String>,
    },
    /// A non-read, non-write operation failed.
    OperationFailed {
        /// Peripheral.
        device: DeviceId,
        /// Operation name.
        operation: String,
        /// Failure description.
        reason: String,
    },
}

impl TransportEvent {
    /// Peripheral the event concerns.
    pub fn device(&self) -> &DeviceId {
        match self {
            Self::Advertisement { device, .. }
            | Self::ConnectFailed { device, .. }
            | Self::Disconnected { device }
            | Self::ServicesDiscovered { device, .. }
            | Self::CharacteristicsDiscovered { device, .. }
            | Self::WriteCompleted { device, .. }
            | Self::ValueRead { device, .. }
            | Self::OperationFailed { device, .. } => device,
            Self::Connected(device) => device,
        }
    }
}

/// Operations the controller issues against the BLE stack.
#[cfg_attr(test, mockall::automock)]
pub trait BleTransport: Send + Sync {
    /// Start listening for advertisements.
    fn start_scan(&self);

    /// Stop listening for advertisements.
    fn stop_scan(&self);

    /// Open a link to a peripheral.
    fn connect(&self, device: &DeviceId);

    /// Close the link to a peripheral.
    fn disconnect(&self, device: &DeviceId);

    /// Discover the given services.
    fn discover_services(&self, device: &DeviceId, services: &[Uuid]);

    /// List the characteristics of one service.
    fn discover_characteristics(&self, device: &DeviceId, service: Uuid);

    /// Write a value, optionally waiting for an acknowledgement.
    fn write(
        &self,
        device: &DeviceId,
        characteristic: &CharacteristicHandle,
        value: Vec<u8>,
        with_response: bool,
    );

    /// Read a value.
    fn read(&self, device: &DeviceId, characteristic: &CharacteristicHandle);
}
