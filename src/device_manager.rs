//! Equipment manager: owns the controller and its event loop.
//!
//! The manager spawns one background task that serialises transport events,
//! timer expiries and commands into the [`EquipmentController`]. Callers talk
//! to it through async command methods and observe it through a broadcast of
//! [`EquipmentEvent`]s.

use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::ble::advertising::{EquipmentReading, SignalStrength};
use crate::ble::central::BtleplugTransport;
use crate::ble::transport::{BleTransport, DeviceId, TransportEvent};
use crate::config::ControllerConfig;
use crate::controller::{ControllerCommand, EquipmentController, EquipmentEvent};
use crate::error::{Error, Result};
use crate::firmware::FirmwareSource;
use crate::registry::{EquipmentRegistry, RegistryEntry};
use crate::state::{ControllerProfile, EquipmentState, PurgeMode};
use crate::timers::TokioScheduler;

/// Handle for a registered callback. Dropping it unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

enum LoopMessage {
    Command(ControllerCommand),
    Shutdown,
}

/// Drives one piece of equipment of a given profile.
pub struct EquipmentManager {
    profile: ControllerProfile,
    config: ControllerConfig,
    commands: mpsc::UnboundedSender<LoopMessage>,
    events: broadcast::Sender<EquipmentEvent>,
    state: Arc<RwLock<EquipmentState>>,
    registry: EquipmentRegistry,
    callback_counter: AtomicU64,
    background_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
    is_running: Arc<AtomicBool>,
}

impl EquipmentManager {
    /// Create a manager on the first Bluetooth adapter with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(profile: ControllerProfile) -> Result<Self> {
        Self::with_config(profile, ControllerConfig::default()).await
    }

    /// Create a manager on the first Bluetooth adapter.
    pub async fn with_config(profile: ControllerProfile, config: ControllerConfig) -> Result<Self> {
        let (transport, transport_rx) = BtleplugTransport::new().await?;
        Ok(Self::with_transport(
            profile,
            config,
            Arc::new(transport),
            transport_rx,
        ))
    }

    /// Create a manager over any transport. Must be called inside a tokio
    /// runtime.
    pub fn with_transport(
        profile: ControllerProfile,
        config: ControllerConfig,
        transport: Arc<dyn BleTransport>,
        mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        let (scheduler, mut timer_rx) = TokioScheduler::new();
        let mut controller =
            EquipmentController::new(profile, config.clone(), transport, Arc::new(scheduler));

        let events = controller.event_sender();
        let registry = controller.registry().clone();
        let state = Arc::new(RwLock::new(controller.state().clone()));
        let is_running = Arc::new(AtomicBool::new(true));
        let (commands, mut command_rx) = mpsc::unbounded_channel();

        let loop_state = state.clone();
        let loop_running = is_running.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = transport_rx.recv() => controller.handle_event(event),
                    Some(token) = timer_rx.recv() => controller.handle_timer(token),
                    message = command_rx.recv() => match message {
                        Some(LoopMessage::Command(command)) => {
                            debug!("Command: {:?}", command);
                            controller.apply(command);
                        }
                        Some(LoopMessage::Shutdown) | None => {
                            controller.disconnect();
                            controller.stop_scan(false);
                            *loop_state.write() = controller.state().clone();
                            break;
                        }
                    },
                }
                *loop_state.write() = controller.state().clone();
            }

            loop_running.store(false, Ordering::SeqCst);
            debug!("Equipment manager event loop ended");
        });

        info!("Equipment manager started for {}", profile);

        Self {
            profile,
            config,
            commands,
            events,
            state,
            registry,
            callback_counter: AtomicU64::new(0),
            background_handle: RwLock::new(Some(handle)),
            is_running,
        }
    }

    fn send(&self, command: ControllerCommand) -> Result<()> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(Error::ManagerStopped);
        }
        self.commands
            .send(LoopMessage::Command(command))
            .map_err(|_| Error::ManagerStopped)
    }

    /// Equipment profile.
    pub fn profile(&self) -> ControllerProfile {
        self.profile
    }

    /// Configuration in use.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Current equipment state.
    pub fn state(&self) -> EquipmentState {
        self.state.read().clone()
    }

    /// Whether the event loop is running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Clear the registry and start scanning.
    pub async fn start_scan(&self) -> Result<()> {
        self.send(ControllerCommand::StartScan)
    }

    /// Stop scanning, optionally resuming after the restart delay.
    pub async fn stop_scan(&self, restart: bool) -> Result<()> {
        self.send(ControllerCommand::StopScan { restart })
    }

    /// Connect to registered equipment by serial number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the serial number has not been
    /// discovered.
    pub async fn connect(&self, serial_number: &str, full: bool) -> Result<()> {
        let entry = self
            .registry
            .get(serial_number)
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: serial_number.to_string(),
            })?;
        self.connect_device(entry.device, full).await
    }

    /// Connect to a peripheral directly.
    pub async fn connect_device(&self, device: DeviceId, full: bool) -> Result<()> {
        self.send(ControllerCommand::Connect { device, full })
    }

    /// Disconnect and stop reconnecting.
    pub async fn disconnect(&self) -> Result<()> {
        self.send(ControllerCommand::Disconnect)
    }

    /// Start a purge or reverse purge.
    pub async fn start_purge(&self, mode: PurgeMode) -> Result<()> {
        self.send(ControllerCommand::StartPurge(mode))
    }

    /// Read the purge starting conditions.
    pub async fn fetch_purge_oxygen(&self) -> Result<()> {
        self.send(ControllerCommand::FetchPurgeOxygen)
    }

    /// Read calibration time and offset.
    pub async fn read_calibration_info(&self) -> Result<()> {
        self.send(ControllerCommand::ReadCalibrationInfo)
    }

    /// Ask the sensor to calibrate.
    pub async fn request_calibration(&self) -> Result<()> {
        self.send(ControllerCommand::RequestCalibration)
    }

    /// Abandon a pending calibration.
    pub async fn cancel_calibration(&self) -> Result<()> {
        self.send(ControllerCommand::CancelCalibration)
    }

    /// Configure chiller alarms.
    pub async fn set_chiller_alarms(&self, low: u32, high: u32, duration_minutes: u16) -> Result<()> {
        self.send(ControllerCommand::SetChillerAlarms {
            low,
            high,
            duration_minutes,
        })
    }

    /// Configure a DO session.
    pub async fn configure_do_session(&self, duration: u32, interval: u16) -> Result<()> {
        self.send(ControllerCommand::ConfigureDoSession { duration, interval })
    }

    /// Read the DO session state.
    pub async fn read_do_session_state(&self) -> Result<()> {
        self.send(ControllerCommand::ReadDoSessionState)
    }

    /// Read the elapsed DO session duration.
    pub async fn read_do_session_duration(&self) -> Result<()> {
        self.send(ControllerCommand::ReadDoSessionDuration)
    }

    /// Start a reverse purge.
    pub async fn start_reverse_purge(&self) -> Result<()> {
        self.send(ControllerCommand::StartReversePurge)
    }

    /// Stop the running session.
    pub async fn stop_equipment(&self) -> Result<()> {
        self.send(ControllerCommand::StopEquipment)
    }

    /// Flash a firmware image.
    pub async fn start_update(&self, firmware: Bytes) -> Result<()> {
        self.send(ControllerCommand::StartUpdate(firmware))
    }

    /// Load this profile's firmware image from `source` and flash it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Firmware`] if the profile has no image or the source
    /// cannot provide it.
    pub async fn update_from_source(&self, source: &dyn FirmwareSource) -> Result<()> {
        let image = self.profile.firmware_image().ok_or_else(|| Error::Firmware {
            name: self.profile.to_string(),
            reason: "no firmware image for this equipment".to_string(),
        })?;
        let firmware = source.load(image).await?;
        self.start_update(firmware).await
    }

    /// Skip the offered update.
    pub async fn decline_update(&self) -> Result<()> {
        self.send(ControllerCommand::DeclineUpdate)
    }

    /// Abandon a running update.
    pub async fn cancel_update(&self) -> Result<()> {
        self.send(ControllerCommand::CancelUpdate)
    }

    /// Subscribe to controller events.
    pub fn subscribe(&self) -> broadcast::Receiver<EquipmentEvent> {
        self.events.subscribe()
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolTimeout`] if `timeout` elapses first.
    pub async fn wait_for_state<F>(&self, predicate: F, timeout: Duration) -> Result<EquipmentState>
    where
        F: Fn(&EquipmentState) -> bool,
    {
        let mut rx = self.events.subscribe();
        let current = self.state();
        if predicate(&current) {
            return Ok(current);
        }

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(EquipmentEvent::StateChanged(state)) if predicate(&state) => {
                        return Ok(state)
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Err(Error::ManagerStopped),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::ProtocolTimeout {
                operation: "wait for state".to_string(),
                timeout,
            })?
    }

    /// Register a callback for state changes.
    pub fn on_state_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(EquipmentState) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let EquipmentEvent::StateChanged(state) = event {
                callback(state);
            }
        })
    }

    /// Register a callback for new readings.
    pub fn on_reading<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(EquipmentReading) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let EquipmentEvent::ReadingUpdated { reading, .. } = event {
                callback(reading);
            }
        })
    }

    fn register<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(EquipmentEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.events.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Snapshot of discovered equipment, ordered by serial number.
    pub fn equipment(&self) -> Vec<RegistryEntry> {
        self.registry.snapshot()
    }

    /// Discovered equipment by serial number.
    pub fn get_equipment(&self, serial_number: &str) -> Option<RegistryEntry> {
        self.registry.get(serial_number)
    }

    /// Equipment with the strongest live signal.
    pub fn nearest_equipment(&self) -> Option<RegistryEntry> {
        let now = chrono::Utc::now();
        let stale_after = self.config.timing.signal_stale_after;
        self.registry
            .snapshot()
            .into_iter()
            .filter(|e| e.reading.signal_strength_at(now, stale_after) != SignalStrength::NoSignal)
            .max_by_key(|e| e.reading.rssi().unwrap_or(i16::MIN))
    }

    /// Number of discovered pieces of equipment.
    pub fn equipment_count(&self) -> usize {
        self.registry.len()
    }

    /// Disconnect, stop scanning and end the event loop.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down equipment manager");

        let _ = self.commands.send(LoopMessage::Shutdown);
        let handle = self.background_handle.write().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| Error::Internal(format!("event loop panicked: {}", e)))?;
        }
        self.is_running.store(false, Ordering::SeqCst);

        Ok(())
    }
}

impl Drop for EquipmentManager {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.background_handle.write().take() {
            handle.abort();
        }
    }
}
