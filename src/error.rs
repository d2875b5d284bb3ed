//! Error types for the preddio-ble crate.

use std::time::Duration;
use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// An advertisement payload had the wrong length, vendor id or kind tag.
    #[error("Malformed payload: {context}")]
    MalformedPayload {
        /// Description of what was wrong with the payload.
        context: String,
    },

    /// A connect, discover, read or write operation failed at the transport.
    #[error("Transport error during {operation}: {reason}")]
    Transport {
        /// The operation that failed.
        operation: String,
        /// Description reported by the transport.
        reason: String,
    },

    /// An operation did not complete within its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    ProtocolTimeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The requested equipment is not in the registry.
    #[error("Equipment not found: {identifier}")]
    DeviceNotFound {
        /// The serial number or device id that was searched for.
        identifier: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// A firmware image could not be loaded.
    #[error("Firmware image {name} unavailable: {reason}")]
    Firmware {
        /// The image name.
        name: String,
        /// Why it could not be loaded.
        reason: String,
    },

    /// I/O error while reading local resources.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The manager event loop is no longer running.
    #[error("Equipment manager has been shut down")]
    ManagerStopped,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a transport error from an operation name and any displayable cause.
    pub fn transport(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error should move the controller into a failed state.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_) | Self::Transport { .. } | Self::ProtocolTimeout { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
