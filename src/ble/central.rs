//! btleplug-backed transport.
//!
//! Owns the first Bluetooth adapter, watches its event stream for Preddio
//! advertisements and runs each GATT operation as a spawned task that reports
//! back through the transport event channel.

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{BleTransport, CharacteristicHandle, DeviceId, TransportEvent};
use crate::ble::uuids::PREDDIO_MANUFACTURER_ID;
use crate::error::{Error, Result};

type PeripheralMap = Arc<RwLock<HashMap<DeviceId, Peripheral>>>;

/// Transport over the platform Bluetooth stack.
pub struct BtleplugTransport {
    adapter: Adapter,
    runtime: Handle,
    peripherals: PeripheralMap,
    events: mpsc::UnboundedSender<TransportEvent>,
    event_task: tokio::task::JoinHandle<()>,
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter.
    ///
    /// Returns the transport and the receiver its events are posted to.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter).await
    }

    /// Use a specific adapter.
    pub async fn with_adapter(
        adapter: Adapter,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let (events, rx) = mpsc::unbounded_channel();
        let peripherals: PeripheralMap = Arc::new(RwLock::new(HashMap::new()));
        let stream = adapter.events().await.map_err(Error::Bluetooth)?;

        let event_task = tokio::spawn(Self::watch_adapter(
            adapter.clone(),
            stream,
            peripherals.clone(),
            events.clone(),
        ));

        Ok((
            Self {
                adapter,
                runtime: Handle::current(),
                peripherals,
                events,
                event_task,
            },
            rx,
        ))
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn watch_adapter(
        adapter: Adapter,
        mut stream: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
        peripherals: PeripheralMap,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        while let Some(event) = stream.next().await {
            match event {
                CentralEvent::ManufacturerDataAdvertisement {
                    id,
                    manufacturer_data,
                } => {
                    let Some(data) = vendor_payload(&manufacturer_data) else {
                        continue;
                    };
                    trace!("Preddio advertisement from {:?}", id);

                    let Some((device, rssi)) =
                        Self::track_peripheral(&adapter, &id, &peripherals).await
                    else {
                        continue;
                    };
                    let _ = events.send(TransportEvent::Advertisement {
                        device,
                        manufacturer_data: data,
                        rssi,
                    });
                }
                CentralEvent::DeviceDisconnected(id) => {
                    debug!("Device disconnected: {:?}", id);
                    let _ = events.send(TransportEvent::Disconnected {
                        device: device_id(&id),
                    });
                }
                CentralEvent::DeviceConnected(id) => {
                    debug!("Device connected: {:?}", id);
                }
                _ => {}
            }
        }

        debug!("Adapter event stream ended");
    }

    async fn track_peripheral(
        adapter: &Adapter,
        id: &PeripheralId,
        peripherals: &PeripheralMap,
    ) -> Option<(DeviceId, Option<i16>)> {
        let peripheral = match adapter.peripheral(id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let rssi = match peripheral.properties().await {
            Ok(Some(properties)) => properties.rssi,
            _ => None,
        };

        let device = device_id(id);
        peripherals.write().insert(device.clone(), peripheral);
        Some((device, rssi))
    }

    fn peripheral(&self, device: &DeviceId) -> Option<Peripheral> {
        self.peripherals.read().get(device).cloned()
    }

    fn post(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

impl BleTransport for BtleplugTransport {
    fn start_scan(&self) {
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            info!("Starting BLE scan for Preddio equipment");
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                error!("Failed to start scan: {}", e);
            }
        });
    }

    fn stop_scan(&self) {
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
    }

    fn connect(&self, device: &DeviceId) {
        let Some(peripheral) = self.peripheral(device) else {
            self.post(TransportEvent::ConnectFailed {
                device: device.clone(),
                reason: "unknown peripheral".to_string(),
            });
            return;
        };

        let device = device.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let event = match peripheral.connect().await {
                Ok(()) => TransportEvent::Connected(device),
                Err(e) => TransportEvent::ConnectFailed {
                    device,
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event);
        });
    }

    fn disconnect(&self, device: &DeviceId) {
        let Some(peripheral) = self.peripheral(device) else {
            return;
        };

        let device = device.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let event = match peripheral.disconnect().await {
                Ok(()) => TransportEvent::Disconnected { device },
                Err(e) => TransportEvent::OperationFailed {
                    device,
                    operation: "disconnect".to_string(),
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event);
        });
    }

    fn discover_services(&self, device: &DeviceId, services: &[Uuid]) {
        let Some(peripheral) = self.peripheral(device) else {
            self.post(unknown_peripheral(device, "discover services"));
            return;
        };

        let wanted = services.to_vec();
        let device = device.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => {
                    let services = peripheral
                        .services()
                        .into_iter()
                        .map(|s| s.uuid)
                        .filter(|uuid| wanted.contains(uuid))
                        .collect();
                    TransportEvent::ServicesDiscovered { device, services }
                }
                Err(e) => TransportEvent::OperationFailed {
                    device,
                    operation: "discover services".to_string(),
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event);
        });
    }

    fn discover_characteristics(&self, device: &DeviceId, service: Uuid) {
        let Some(peripheral) = self.peripheral(device) else {
            self.post(unknown_peripheral(device, "discover characteristics"));
            return;
        };

        let characteristics = peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics)
            .map(|c| CharacteristicHandle::new(c.service_uuid, c.uuid))
            .collect();

        self.post(TransportEvent::CharacteristicsDiscovered {
            device: device.clone(),
            service,
            characteristics,
        });
    }

    fn write(
        &self,
        device: &DeviceId,
        characteristic: &CharacteristicHandle,
        value: Vec<u8>,
        with_response: bool,
    ) {
        let handle = *characteristic;
        let Some((peripheral, target)) = self.locate(device, &handle) else {
            self.post(TransportEvent::WriteCompleted {
                device: device.clone(),
                characteristic: handle,
                result: Err(not_found(&handle)),
            });
            return;
        };

        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        let device = device.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            trace!("Writing {} bytes to {}", value.len(), handle.uuid);
            let result = peripheral
                .write(&target, &value, write_type)
                .await
                .map_err(|e| e.to_string());
            let _ = events.send(TransportEvent::WriteCompleted {
                device,
                characteristic: handle,
                result,
            });
        });
    }

    fn read(&self, device: &DeviceId, characteristic: &CharacteristicHandle) {
        let handle = *characteristic;
        let Some((peripheral, target)) = self.locate(device, &handle) else {
            self.post(TransportEvent::ValueRead {
                device: device.clone(),
                characteristic: handle,
                result: Err(not_found(&handle)),
            });
            return;
        };

        let device = device.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let result = peripheral.read(&target).await.map_err(|e| e.to_string());
            let _ = events.send(TransportEvent::ValueRead {
                device,
                characteristic: handle,
                result,
            });
        });
    }
}

impl BtleplugTransport {
    fn locate(
        &self,
        device: &DeviceId,
        handle: &CharacteristicHandle,
    ) -> Option<(Peripheral, Characteristic)> {
        let peripheral = self.peripheral(device)?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == handle.uuid && c.service_uuid == handle.service)?;
        Some((peripheral, characteristic))
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

fn device_id(id: &PeripheralId) -> DeviceId {
    DeviceId::new(id.to_string())
}

fn unknown_peripheral(device: &DeviceId, operation: &str) -> TransportEvent {
    TransportEvent::OperationFailed {
        device: device.clone(),
        operation: operation.to_string(),
        reason: "unknown peripheral".to_string(),
    }
}

fn not_found(handle: &CharacteristicHandle) -> String {
    Error::CharacteristicNotFound {
        uuid: handle.uuid.to_string(),
    }
    .to_string()
}

/// Preddio manufacturer data with the company id restored in front.
///
/// btleplug strips the company id into the map key. Some firmware sends the
/// id byte-swapped, so either key is accepted and its wire bytes are kept.
fn vendor_payload(manufacturer_data: &HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    manufacturer_data
        .iter()
        .find(|(id, _)| **id == PREDDIO_MANUFACTURER_ID || id.swap_bytes() == PREDDIO_MANUFACTURER_ID)
        .map(|(id, data)| {
            let mut payload = Vec::with_capacity(data.len() + 2);
            payload.extend_from_slice(&id.to_le_bytes());
            payload.extend_from_slice(data);
            payload
        })
}
