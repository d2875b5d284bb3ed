//! Fakes shared by controller and manager tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ble::characteristics::Field;
use crate::ble::transport::{BleTransport, CharacteristicHandle, DeviceId};
use crate::controller::EquipmentEvent;
use crate::timers::{TimerKind, TimerScheduler, TimerToken};

/// A call made against the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    StartScan,
    StopScan,
    Connect(DeviceId),
    Disconnect(DeviceId),
    DiscoverServices(DeviceId, Vec<Uuid>),
    DiscoverCharacteristics(DeviceId, Uuid),
    Write {
        characteristic: CharacteristicHandle,
        value: Vec<u8>,
        with_response: bool,
    },
    Read(CharacteristicHandle),
}

/// Transport that records every call.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
}

impl RecordingTransport {
    pub fn take(&self) -> Vec<TransportCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// Values written to `field` since the last `take`, without draining.
    pub fn writes_to(&self, field: Field) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Write {
                    characteristic,
                    value,
                    ..
                } if characteristic.uuid == field.uuid()
                    && characteristic.service == field.service().uuid() =>
                {
                    Some(value.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &TransportCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }
}

impl BleTransport for RecordingTransport {
    fn start_scan(&self) {
        self.calls.lock().push(TransportCall::StartScan);
    }

    fn stop_scan(&self) {
        self.calls.lock().push(TransportCall::StopScan);
    }

    fn connect(&self, device: &DeviceId) {
        self.calls.lock().push(TransportCall::Connect(device.clone()));
    }

    fn disconnect(&self, device: &DeviceId) {
        self.calls
            .lock()
            .push(TransportCall::Disconnect(device.clone()));
    }

    fn discover_services(&self, device: &DeviceId, services: &[Uuid]) {
        self.calls.lock().push(TransportCall::DiscoverServices(
            device.clone(),
            services.to_vec(),
        ));
    }

    fn discover_characteristics(&self, device: &DeviceId, service: Uuid) {
        self.calls
            .lock()
            .push(TransportCall::DiscoverCharacteristics(device.clone(), service));
    }

    fn write(
        &self,
        _device: &DeviceId,
        characteristic: &CharacteristicHandle,
        value: Vec<u8>,
        with_response: bool,
    ) {
        self.calls.lock().push(TransportCall::Write {
            characteristic: *characteristic,
            value,
            with_response,
        });
    }

    fn read(&self, _device: &DeviceId, characteristic: &CharacteristicHandle) {
        self.calls.lock().push(TransportCall::Read(*characteristic));
    }
}

/// Scheduler that only records; tests fire tokens by hand.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    scheduled: Mutex<Vec<(TimerToken, Duration)>>,
    cancelled: Mutex<Vec<TimerToken>>,
}

impl ManualScheduler {
    /// Most recent token of `kind` that has not been cancelled.
    pub fn pending(&self, kind: TimerKind) -> Option<(TimerToken, Duration)> {
        let cancelled = self.cancelled.lock();
        self.scheduled
            .lock()
            .iter()
            .rev()
            .find(|(token, _)| token.kind == kind && !cancelled.contains(token))
            .copied()
    }

    /// Every token ever scheduled for `kind`.
    pub fn all(&self, kind: TimerKind) -> Vec<TimerToken> {
        self.scheduled
            .lock()
            .iter()
            .filter(|(token, _)| token.kind == kind)
            .map(|(token, _)| *token)
            .collect()
    }
}

impl TimerScheduler for ManualScheduler {
    fn schedule(&self, token: TimerToken, delay: Duration) {
        self.scheduled.lock().push((token, delay));
    }

    fn cancel(&self, token: TimerToken) {
        self.cancelled.lock().push(token);
    }
}

/// Drain every event currently queued on a receiver.
pub fn drain(rx: &mut broadcast::Receiver<EquipmentEvent>) -> Vec<EquipmentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Handles for `fields`, located in their own service.
pub fn handles(fields: &[Field]) -> Vec<CharacteristicHandle> {
    fields
        .iter()
        .map(|f| CharacteristicHandle::new(f.service().uuid(), f.uuid()))
        .collect()
}

/// Handle of one field.
pub fn handle(field: Field) -> CharacteristicHandle {
    CharacteristicHandle::new(field.service().uuid(), field.uuid())
}

/// A valid purge advertisement with the given low serial byte.
pub fn purge_advertisement(serial_low: u8) -> Vec<u8> {
    vec![
        0xE0, 0x09, 0x18, serial_low, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x19,
        0x1E, 0x00,
    ]
}

/// A valid DO advertisement.
pub fn do_advertisement(serial_low: u8) -> Vec<u8> {
    vec![
        0xE0, 0x09, 0x1C, serial_low, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x0B,
        0x0F, 0x00,
    ]
}

/// A valid chiller advertisement.
pub fn chiller_advertisement(serial_low: u8) -> Vec<u8> {
    vec![
        0xE0, 0x09, 0x1A, serial_low, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0A,
    ]
}
