//! Per-equipment connection state machine.
//!
//! [`EquipmentController`] owns the equipment state, the service resolvers,
//! the OTA session and the registry. It never blocks: transport events, timer
//! expiries and commands are fed in one at a time by the owner of the event
//! loop (normally [`EquipmentManager`](crate::EquipmentManager)), and each is
//! processed to completion before the next.

use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::advertising::EquipmentReading;
use crate::ble::characteristics::Field;
use crate::ble::services::{ServiceKind, ServiceResolver};
use crate::ble::transport::{BleTransport, CharacteristicHandle, DeviceId, TransportEvent};
use crate::config::ControllerConfig;
use crate::data::{CalibrationInfo, PurgeActivityInput};
use crate::error::Error;
use crate::protocol::calibration::{last_calibrated_phrase, parse_last_calibrated, parse_offset, request_payload};
use crate::protocol::codec::{field_bytes, FIXED_POINT_SCALE, SENTINEL};
use crate::protocol::ota::{OtaAction, OtaPacing, OtaProgress, OtaSession};
use crate::protocol::version::{needs_update, supports_calibration, FirmwareVersion};
use crate::registry::EquipmentRegistry;
use crate::state::{ControllerProfile, EquipmentState, PurgeMode, StopTarget};
use crate::timers::{TimerKind, TimerScheduler, TimerSet, TimerToken};
use crate::utils::unix_timestamp;

/// Something the controller publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum EquipmentEvent {
    /// The equipment state changed.
    StateChanged(EquipmentState),
    /// A new advertisement was registered.
    ReadingUpdated {
        /// The decoded reading.
        reading: EquipmentReading,
        /// Whether the serial number was seen for the first time.
        is_new: bool,
    },
    /// A characteristic value was read.
    ValueRead {
        /// Source characteristic.
        field: Field,
        /// Raw value.
        value: Bytes,
    },
    /// Calibration details were read.
    CalibrationInfo(CalibrationInfo),
    /// Purge starting conditions were read.
    ActivityInput(PurgeActivityInput),
}

/// Command accepted by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCommand {
    /// Clear the registry and scan.
    StartScan,
    /// Stop scanning, optionally resuming after the restart delay.
    StopScan {
        /// Resume scanning later.
        restart: bool,
    },
    /// Connect to a peripheral.
    Connect {
        /// Target peripheral.
        device: DeviceId,
        /// Also discover the update, OTA and calibration services.
        full: bool,
    },
    /// Disconnect and stop reconnecting.
    Disconnect,
    /// Start a purge.
    StartPurge(PurgeMode),
    /// Read the purge starting conditions.
    FetchPurgeOxygen,
    /// Read last calibration time and offset.
    ReadCalibrationInfo,
    /// Ask the sensor to calibrate.
    RequestCalibration,
    /// Abandon a pending calibration.
    CancelCalibration,
    /// Configure chiller alarms.
    SetChillerAlarms {
        /// Low alarm.
        low: u32,
        /// High alarm.
        high: u32,
        /// Alarm duration in minutes.
        duration_minutes: u16,
    },
    /// Configure a DO measurement session.
    ConfigureDoSession {
        /// Session duration.
        duration: u32,
        /// Sampling interval.
        interval: u16,
    },
    /// Read the DO session state.
    ReadDoSessionState,
    /// Read the elapsed DO session duration.
    ReadDoSessionDuration,
    /// Start a reverse purge on a fermenter.
    StartReversePurge,
    /// Stop the running session.
    StopEquipment,
    /// Flash a firmware image.
    StartUpdate(Bytes),
    /// Skip the offered update.
    DeclineUpdate,
    /// Abandon a running update.
    CancelUpdate,
}

/// Progress of the calibration due-check for the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CalibrationCheck {
    #[default]
    Idle,
    AwaitingVersion,
    Supported,
    Checking,
    Done,
}

/// Multi-step read sequence in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadChain {
    PurgeStart,
    CalibrationInfo,
}

/// The per-equipment state machine.
pub struct EquipmentController {
    profile: ControllerProfile,
    config: ControllerConfig,
    transport: Arc<dyn BleTransport>,
    scheduler: Arc<dyn TimerScheduler>,
    registry: EquipmentRegistry,
    events: broadcast::Sender<EquipmentEvent>,
    state: EquipmentState,
    timers: TimerSet,

    device: Option<DeviceId>,
    full_connection: bool,
    connection_activated: bool,
    link_up: bool,

    resolvers: HashMap<ServiceKind, ServiceResolver>,
    version_pending: bool,
    calibration: CalibrationCheck,
    allow_interval_write: bool,
    expected_acks: u8,
    acks: u8,
    pending_do_duration: Option<u32>,
    read_chain: Option<ReadChain>,
    activity: PurgeActivityInput,
    calibration_info: CalibrationInfo,

    ota: Option<OtaSession>,
    reboot_pending: bool,
}

impl EquipmentController {
    /// Create an idle controller.
    pub fn new(
        profile: ControllerProfile,
        config: ControllerConfig,
        transport: Arc<dyn BleTransport>,
        scheduler: Arc<dyn TimerScheduler>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            profile,
            config,
            transport,
            scheduler,
            registry: EquipmentRegistry::new(),
            events,
            state: EquipmentState::Stopped,
            timers: TimerSet::new(),
            device: None,
            full_connection: false,
            connection_activated: false,
            link_up: false,
            resolvers: HashMap::new(),
            version_pending: false,
            calibration: CalibrationCheck::Idle,
            allow_interval_write: false,
            expected_acks: 0,
            acks: 0,
            pending_do_duration: None,
            read_chain: None,
            activity: PurgeActivityInput::default(),
            calibration_info: CalibrationInfo::default(),
            ota: None,
            reboot_pending: false,
        }
    }

    /// Profile this controller drives.
    pub fn profile(&self) -> ControllerProfile {
        self.profile
    }

    /// Current state.
    pub fn state(&self) -> &EquipmentState {
        &self.state
    }

    /// Shared registry handle.
    pub fn registry(&self) -> &EquipmentRegistry {
        &self.registry
    }

    /// Subscribe to published events.
    pub fn subscribe(&self) -> broadcast::Receiver<EquipmentEvent> {
        self.events.subscribe()
    }

    /// Event sender, for callers that want to subscribe later.
    pub fn event_sender(&self) -> broadcast::Sender<EquipmentEvent> {
        self.events.clone()
    }

    /// Peripheral of the current connection.
    pub fn device(&self) -> Option<&DeviceId> {
        self.device.as_ref()
    }

    /// Whether the controller keeps reconnecting after a drop.
    pub fn is_connection_activated(&self) -> bool {
        self.connection_activated
    }

    /// Whether the connected firmware accepts DO interval writes.
    pub fn allows_interval_write(&self) -> bool {
        self.allow_interval_write
    }

    /// Running OTA session.
    pub fn ota_session(&self) -> Option<&OtaSession> {
        self.ota.as_ref()
    }

    /// Run a command.
    pub fn apply(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::StartScan => self.start_scan(),
            ControllerCommand::StopScan { restart } => self.stop_scan(restart),
            ControllerCommand::Connect { device, full } => self.connect(device, full),
            ControllerCommand::Disconnect => self.disconnect(),
            ControllerCommand::StartPurge(mode) => self.start_purge(mode),
            ControllerCommand::FetchPurgeOxygen => self.fetch_purge_oxygen(),
            ControllerCommand::ReadCalibrationInfo => self.read_calibration_info(),
            ControllerCommand::RequestCalibration => self.request_calibration(),
            ControllerCommand::CancelCalibration => self.cancel_calibration(),
            ControllerCommand::SetChillerAlarms {
                low,
                high,
                duration_minutes,
            } => self.set_chiller_alarms(low, high, duration_minutes),
            ControllerCommand::ConfigureDoSession { duration, interval } => {
                self.configure_do_session(duration, interval)
            }
            ControllerCommand::ReadDoSessionState => self.read_value(Field::DoSessionState),
            ControllerCommand::ReadDoSessionDuration => self.read_value(Field::DoSessionDuration),
            ControllerCommand::StartReversePurge => self.start_reverse_purge(),
            ControllerCommand::StopEquipment => self.stop_equipment(),
            ControllerCommand::StartUpdate(firmware) => self.start_update(firmware),
            ControllerCommand::DeclineUpdate => self.decline_update(),
            ControllerCommand::CancelUpdate => self.cancel_update(),
        }
    }

    // ----- scanning -------------------------------------------------------

    /// Clear the registry and start scanning.
    pub fn start_scan(&mut self) {
        info!("Starting scan for {} equipment", self.profile);
        self.timers.cancel(self.scheduler.as_ref(), TimerKind::ScanRestart);
        self.registry.clear();
        self.reset_services();
        self.transport.start_scan();
    }

    /// Stop scanning. With `restart`, scanning resumes after the restart
    /// delay without clearing the registry.
    pub fn stop_scan(&mut self, restart: bool) {
        info!("Stopping scan");
        self.transport.stop_scan();
        if restart {
            self.timers.start(
                self.scheduler.as_ref(),
                TimerKind::ScanRestart,
                self.config.timing.scan_restart_delay,
            );
        } else {
            self.timers.cancel(self.scheduler.as_ref(), TimerKind::ScanRestart);
        }
    }

    // ----- connection lifecycle ------------------------------------------

    /// Connect to `device`. A full connection also runs the update and
    /// calibration pre-checks.
    pub fn connect(&mut self, device: DeviceId, full: bool) {
        info!("Connecting to {} (full: {})", device, full);
        self.timers.cancel(self.scheduler.as_ref(), TimerKind::Reconnect);
        self.reset_services();

        self.device = Some(device.clone());
        self.full_connection = full;
        self.connection_activated = true;
        self.link_up = false;

        self.set_state(EquipmentState::Connecting);
        self.timers.start(
            self.scheduler.as_ref(),
            TimerKind::ConnectTimeout,
            self.config.timing.connect_timeout,
        );
        self.transport.stop_scan();
        self.transport.connect(&device);
    }

    /// Tear down the link and stop reconnecting.
    pub fn disconnect(&mut self) {
        self.connection_activated = false;
        self.reboot_pending = false;
        self.timers.cancel_all(self.scheduler.as_ref());
        self.ota = None;
        self.reset_services();

        let Some(device) = self.device.clone() else {
            self.set_state(EquipmentState::Disconnected);
            return;
        };

        info!("Disconnecting from {}", device);
        self.transport.disconnect(&device);
        if !self.link_up {
            self.set_state(EquipmentState::Disconnected);
        }
    }

    /// Feed a transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Advertisement {
                device,
                manufacturer_data,
                rssi,
            } => self.on_advertisement(device, &manufacturer_data, rssi),
            TransportEvent::Connected(device) => self.on_connected(device),
            TransportEvent::ConnectFailed { device, reason } => {
                if self.is_current(&device) {
                    self.timers
                        .cancel(self.scheduler.as_ref(), TimerKind::ConnectTimeout);
                    warn!("Connection to {} failed: {}", device, reason);
                    self.set_state(EquipmentState::Failed);
                }
            }
            TransportEvent::Disconnected { device } => self.on_disconnected(device),
            TransportEvent::ServicesDiscovered { device, services } => {
                self.on_services_discovered(device, &services)
            }
            TransportEvent::CharacteristicsDiscovered {
                device,
                service,
                characteristics,
            } => self.on_characteristics_discovered(device, service, &characteristics),
            TransportEvent::WriteCompleted {
                device,
                characteristic,
                result,
            } => {
                if !self.is_current(&device) {
                    return;
                }
                match result {
                    Ok(()) => self.on_write_ack(&characteristic),
                    Err(reason) => self.on_transport_error(&Error::transport("write", reason)),
                }
            }
            TransportEvent::ValueRead {
                device,
                characteristic,
                result,
            } => {
                if !self.is_current(&device) {
                    return;
                }
                match result {
                    Ok(value) => self.on_value_read(&characteristic, Bytes::from(value)),
                    Err(reason) => self.on_transport_error(&Error::transport("read", reason)),
                }
            }
            TransportEvent::OperationFailed {
                device,
                operation,
                reason,
            } => {
                if self.is_current(&device) {
                    self.on_transport_error(&Error::transport(operation, reason));
                }
            }
        }
    }

    /// Feed a timer expiry. Stale tokens are ignored.
    pub fn handle_timer(&mut self, token: TimerToken) {
        if !self.timers.take_if_current(token) {
            trace!("Ignoring stale timer {:?}", token);
            return;
        }

        match token.kind {
            TimerKind::ConnectTimeout => {
                let error = Error::ProtocolTimeout {
                    operation: "connect".to_string(),
                    timeout: self.config.timing.connect_timeout,
                };
                warn!("{}", error);
                if let Some(device) = self.device.clone() {
                    self.transport.disconnect(&device);
                }
                self.link_up = false;
                self.set_state(EquipmentState::Failed);
            }
            TimerKind::Reconnect => self.reconnect(),
            TimerKind::OtaSettle => {
                if let Some(session) = self.ota.as_mut() {
                    let actions = session.on_write_ack();
                    self.run_ota(actions);
                }
            }
            TimerKind::OtaPacing => {
                if let Some(session) = self.ota.as_mut() {
                    let actions = session.on_timer();
                    self.run_ota(actions);
                }
            }
            TimerKind::CalibrationRequest => {
                let payload = request_payload(Utc::now());
                if !self.write_raw(Field::CalibrationRequest, payload) {
                    warn!("Calibration request characteristic unavailable");
                    self.set_state(EquipmentState::Failed);
                }
            }
            TimerKind::ScanRestart => {
                debug!("Resuming scan");
                self.transport.start_scan();
            }
        }
    }

    fn on_advertisement(&mut self, device: DeviceId, data: &[u8], rssi: Option<i16>) {
        let reading = match EquipmentReading::parse(data, rssi) {
            Ok(reading) => reading,
            Err(e) => {
                trace!("Discarding advertisement from {}: {}", device, e);
                return;
            }
        };

        if !self.profile.accepts(reading.kind()) {
            trace!("Ignoring {} advertisement", reading.kind());
            return;
        }

        let is_new = self.registry.upsert(reading.clone(), device.clone());
        if is_new {
            info!(
                "Discovered {} {} ({})",
                reading.kind(),
                reading.serial_number(),
                device
            );
        } else {
            trace!("Updated reading for {}", reading.serial_number());
        }
        self.publish(EquipmentEvent::ReadingUpdated { reading, is_new });
    }

    fn on_connected(&mut self, device: DeviceId) {
        if !self.is_current(&device) {
            debug!("Ignoring connection from {}", device);
            return;
        }

        let attempt_live = self.connection_activated
            && !self.link_up
            && self.state == EquipmentState::Connecting
            && self.timers.is_pending(TimerKind::ConnectTimeout);
        if !attempt_live {
            warn!("Dropping stale connection to {}", device);
            self.transport.disconnect(&device);
            return;
        }

        info!("Connected to {}", device);
        self.timers
            .cancel(self.scheduler.as_ref(), TimerKind::ConnectTimeout);
        self.link_up = true;

        let mut services = vec![ServiceKind::Main.uuid()];
        if self.full_connection {
            services.extend(self.profile.auxiliary_services().iter().map(|k| k.uuid()));
        }
        self.transport.discover_services(&device, &services);
    }

    fn on_services_discovered(&mut self, device: DeviceId, services: &[Uuid]) {
        if !self.is_current(&device) || !self.link_up {
            return;
        }

        for uuid in services {
            let Some(kind) = ServiceKind::from_uuid(uuid) else {
                continue;
            };
            if kind != ServiceKind::Main && !self.full_connection {
                continue;
            }
            let Some(layout) = self.profile.layout(kind) else {
                continue;
            };

            debug!("Discovered {:?} service", kind);
            self.resolvers
                .entry(kind)
                .or_insert_with(|| ServiceResolver::new(kind, layout));

            if kind == ServiceKind::UpdateCheck {
                self.version_pending = true;
                if self
                    .profile
                    .calibration_baseline(&self.config.baselines)
                    .is_some()
                {
                    self.calibration = CalibrationCheck::AwaitingVersion;
                }
            }

            self.transport.discover_characteristics(&device, kind.uuid());
        }

        if !self.resolvers.contains_key(&ServiceKind::Main) {
            warn!(
                "{}",
                Error::ServiceNotFound {
                    uuid: ServiceKind::Main.uuid().to_string()
                }
            );
        }

        let next = if self.checks_pending() {
            EquipmentState::Connecting
        } else {
            EquipmentState::Connected
        };
        self.set_state(next);
    }

    fn on_characteristics_discovered(
        &mut self,
        device: DeviceId,
        service: Uuid,
        characteristics: &[CharacteristicHandle],
    ) {
        if !self.is_current(&device) || !self.link_up {
            return;
        }
        let Some(kind) = ServiceKind::from_uuid(&service) else {
            return;
        };
        let Some(resolver) = self.resolvers.get_mut(&kind) else {
            return;
        };

        let ready = resolver.resolve(characteristics);
        debug!("{:?} characteristics resolved: {}", kind, ready);

        match kind {
            ServiceKind::UpdateCheck => {
                if self.version_pending && !self.read_field(Field::SensorVersion) {
                    // Fail open: treat the version as current.
                    self.version_pending = false;
                    self.calibration = CalibrationCheck::Done;
                    self.settle_connected();
                }
            }
            ServiceKind::Calibration => {
                if self.calibration == CalibrationCheck::Supported {
                    self.begin_calibration_check();
                    self.settle_connected();
                }
            }
            ServiceKind::Ota => {}
            ServiceKind::Main => self.settle_connected(),
        }
    }

    fn on_disconnected(&mut self, device: DeviceId) {
        if !self.is_current(&device) || !self.link_up {
            return;
        }
        self.link_up = false;

        if !self.connection_activated {
            info!("Disconnected from {}", device);
            self.set_state(EquipmentState::Disconnected);
            return;
        }

        if self.ota.as_ref().map_or(false, OtaSession::is_finishing) {
            info!("{} rebooting into new firmware", device);
            self.reboot_pending = true;
            return;
        }

        warn!("Lost connection to {}", device);
        if self.ota.is_some() || self.state.is_updating() {
            self.abort_update();
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        self.reset_services();
        self.transport.start_scan();
        self.timers.start(
            self.scheduler.as_ref(),
            TimerKind::Reconnect,
            self.config.timing.reconnect_delay,
        );
    }

    fn reconnect(&mut self) {
        if !self.connection_activated {
            return;
        }
        match self.device.clone() {
            Some(device) if self.registry.contains_device(&device) => {
                debug!("Reconnecting to {}", device);
                self.connect(device, self.full_connection);
            }
            _ => {
                debug!("Equipment no longer advertised, rescanning");
                self.start_scan();
            }
        }
    }

    // ----- pre-checks ------------------------------------------------------

    fn checks_pending(&self) -> bool {
        self.version_pending
            || matches!(
                self.calibration,
                CalibrationCheck::AwaitingVersion
                    | CalibrationCheck::Supported
                    | CalibrationCheck::Checking
            )
    }

    /// Move to the settled connected state unless a pre-check is pending or
    /// a more specific state already holds.
    fn settle_connected(&mut self) {
        if !matches!(
            self.state,
            EquipmentState::Connecting | EquipmentState::Connected
        ) {
            return;
        }

        let next = if self.checks_pending() {
            EquipmentState::Connecting
        } else if self.main_ready() {
            EquipmentState::CharacteristicsDiscovered
        } else {
            EquipmentState::Connected
        };
        self.set_state(next);
    }

    fn on_version(&mut self, raw: &[u8]) {
        self.version_pending = false;
        let reported = String::from_utf8_lossy(raw);
        let reported = reported.trim_end_matches('\0');
        debug!("Firmware version reported: {}", reported);

        let baselines = self.config.baselines;
        if self.profile == ControllerProfile::DissolvedOxygen {
            self.allow_interval_write = FirmwareVersion::parse(reported)
                .map_or(false, |v| v.interval_write_allowed(&baselines.do_interval_write));
        }

        if self.calibration == CalibrationCheck::AwaitingVersion {
            let supported = self
                .profile
                .calibration_baseline(&baselines)
                .map_or(false, |b| supports_calibration(reported, &b));
            self.calibration = if supported {
                CalibrationCheck::Supported
            } else {
                CalibrationCheck::Done
            };
        }

        let outdated = self
            .profile
            .update_baseline(&baselines)
            .map_or(false, |b| needs_update(reported, &b));
        if outdated {
            info!("Firmware {} is below the update baseline", reported);
            self.calibration = CalibrationCheck::Done;
            self.set_state(EquipmentState::NeedsUpdate);
            return;
        }

        self.begin_calibration_check();
        self.settle_connected();
    }

    fn begin_calibration_check(&mut self) {
        if self.calibration != CalibrationCheck::Supported {
            return;
        }
        match self.resolvers.get(&ServiceKind::Calibration) {
            None => self.calibration = CalibrationCheck::Done,
            Some(resolver) if resolver.is_resolved(Field::CalibrationLast) => {
                self.calibration = CalibrationCheck::Checking;
                self.read_field(Field::CalibrationLast);
            }
            Some(resolver) if resolver.is_discovered() => {
                // Fail open: the service lacks the last-calibrated value.
                warn!(
                    "{}",
                    Error::CharacteristicNotFound {
                        uuid: Field::CalibrationLast.uuid().to_string()
                    }
                );
                self.calibration = CalibrationCheck::Done;
            }
            // Wait for the calibration characteristics.
            Some(_) => {}
        }
    }

    fn on_calibration_due_check(&mut self, value: &[u8]) {
        self.calibration = CalibrationCheck::Done;
        self.calibration_info.last_calibrated = parse_last_calibrated(value);
        match last_calibrated_phrase(value, Utc::now()) {
            Some(ago) => {
                info!("Sensor last calibrated {}", ago);
                self.set_state(EquipmentState::NeedsCalibration(ago));
            }
            None => self.settle_connected(),
        }
    }

    // ----- writes ------------------------------------------------------------

    fn on_write_ack(&mut self, characteristic: &CharacteristicHandle) {
        match self.state {
            EquipmentState::UpdateStarting => {
                if characteristic.uuid == Field::OtaControl.uuid() {
                    self.timers.start(
                        self.scheduler.as_ref(),
                        TimerKind::OtaSettle,
                        self.config.timing.ota_settle_delay,
                    );
                }
            }
            EquipmentState::Updating(_) => {
                if let Some(session) = self.ota.as_mut() {
                    let actions = session.on_write_ack();
                    self.run_ota(actions);
                }
            }
            EquipmentState::CalibrationStarting => {
                info!("Calibration requested");
                self.set_state(EquipmentState::CalibrationSucceeded);
            }
            EquipmentState::CharacteristicUpdating => {
                self.acks = self.acks.saturating_add(1);
                trace!("Write ack {}/{}", self.acks, self.expected_acks);
                if let Some(duration) = self.pending_do_duration.take() {
                    self.write_field(Field::DoDuration, duration);
                }
                if self.acks >= self.expected_acks {
                    self.set_state(EquipmentState::CharacteristicUpdated);
                }
            }
            _ => trace!("Ignoring write ack in state {}", self.state),
        }
    }

    fn begin_updating(&mut self, expected_acks: u8) {
        self.acks = 0;
        self.expected_acks = expected_acks;
        self.set_state(EquipmentState::CharacteristicUpdating);
    }

    /// Write the current time to the purge or reverse-purge start.
    pub fn start_purge(&mut self, mode: PurgeMode) {
        if !self.main_ready() {
            debug!("Purge start skipped: main service not ready");
            return;
        }
        let now = unix_timestamp(Utc::now());
        if self.write_field(mode.field(), now) {
            info!("Starting {:?}", mode);
            self.begin_updating(1);
        }
    }

    /// Start a reverse purge on a fermenter.
    pub fn start_reverse_purge(&mut self) {
        self.start_purge(PurgeMode::ReversePurge);
    }

    /// Write the chiller alarm thresholds and duration.
    pub fn set_chiller_alarms(&mut self, low: u32, high: u32, duration_minutes: u16) {
        if !self.main_ready() {
            return;
        }
        let written = [
            self.write_field(Field::ChillerLowAlarm, low),
            self.write_field(Field::ChillerHighAlarm, high),
            self.write_field(Field::ChillerDuration, u32::from(duration_minutes)),
        ];
        let count = written.iter().filter(|w| **w).count() as u8;
        if count > 0 {
            self.begin_updating(count);
        }
    }

    /// Configure a DO session. Firmware that accepts interval writes gets the
    /// interval first and the duration after its acknowledgement.
    pub fn configure_do_session(&mut self, duration: u32, interval: u16) {
        if !self.main_ready() {
            return;
        }
        if self.allow_interval_write && self.write_field(Field::DoInterval, u32::from(interval)) {
            self.pending_do_duration = Some(duration);
            self.begin_updating(2);
        } else if self.write_field(Field::DoDuration, duration) {
            self.begin_updating(1);
        }
    }

    /// Stop the running session.
    pub fn stop_equipment(&mut self) {
        if !self.main_ready() {
            return;
        }
        let field = match self.profile {
            ControllerProfile::Stop(StopTarget::DoSensor) | ControllerProfile::DissolvedOxygen => {
                Field::DoStop
            }
            _ => Field::PurgeStop,
        };
        if self.write_field(field, 0) {
            info!("Stopping equipment");
            self.begin_updating(1);
        }
    }

    // ----- reads -------------------------------------------------------------

    /// Read the purge starting conditions.
    pub fn fetch_purge_oxygen(&mut self) {
        if !self.main_ready() {
            return;
        }
        if self.read_field(Field::PurgeOxygen) {
            self.read_chain = Some(ReadChain::PurgeStart);
        }
    }

    /// Read last calibration time and offset.
    pub fn read_calibration_info(&mut self) {
        self.calibration_info = CalibrationInfo::default();
        if self.read_field(Field::CalibrationLast) {
            self.read_chain = Some(ReadChain::CalibrationInfo);
        }
    }

    fn read_value(&mut self, field: Field) {
        if self.main_ready() {
            self.read_field(field);
        }
    }

    fn on_value_read(&mut self, characteristic: &CharacteristicHandle, value: Bytes) {
        let Some(field) = self.field_for(characteristic) else {
            trace!("Value from unknown characteristic {}", characteristic.uuid);
            return;
        };
        self.publish(EquipmentEvent::ValueRead {
            field,
            value: value.clone(),
        });

        match (field, self.read_chain) {
            (Field::SensorVersion, _) if self.version_pending => self.on_version(&value),
            (Field::CalibrationLast, Some(ReadChain::CalibrationInfo)) => {
                self.calibration_info.last_calibrated = parse_last_calibrated(&value);
                if !self.read_field(Field::CalibrationOffset) {
                    self.finish_calibration_info();
                }
            }
            (Field::CalibrationLast, _) if self.calibration == CalibrationCheck::Checking => {
                self.on_calibration_due_check(&value)
            }
            (Field::CalibrationOffset, Some(ReadChain::CalibrationInfo)) => {
                self.calibration_info.offset = parse_offset(&value);
                self.finish_calibration_info();
            }
            (Field::PurgeOxygen, Some(ReadChain::PurgeStart)) => self.on_purge_oxygen(&value),
            (Field::PurgePressure, Some(ReadChain::PurgeStart)) => {
                self.activity.start_pressure_mbar = field_bytes(&value, 0)
                    .map(|b| f64::from(u16::from_le_bytes(b)) / FIXED_POINT_SCALE);
                if !self.read_field(Field::AtmosphericPressure) {
                    self.finish_activity();
                }
            }
            (Field::AtmosphericPressure, Some(ReadChain::PurgeStart)) => {
                self.activity.start_atmospheric_pressure_mbar =
                    field_bytes(&value, 0).map(u16::from_le_bytes);
                self.finish_activity();
            }
            _ => {}
        }
    }

    fn on_purge_oxygen(&mut self, value: &[u8]) {
        let Some(bytes) = field_bytes(value, 0) else {
            return;
        };
        if bytes == [SENTINEL, SENTINEL] {
            debug!("Oxygen reading not available yet");
            return;
        }

        if self.profile == ControllerProfile::Fermenter {
            self.read_chain = None;
            self.set_state(EquipmentState::ReadyToStart);
            return;
        }

        self.activity = PurgeActivityInput {
            start_oxygen_percent: Some(f64::from(u16::from_le_bytes(bytes)) / FIXED_POINT_SCALE),
            ..Default::default()
        };
        if !self.read_field(Field::PurgePressure) && !self.read_field(Field::AtmosphericPressure) {
            self.finish_activity();
        }
    }

    fn finish_activity(&mut self) {
        self.read_chain = None;
        self.publish(EquipmentEvent::ActivityInput(self.activity));
        self.set_state(EquipmentState::ReadyToStart);
    }

    fn finish_calibration_info(&mut self) {
        self.read_chain = None;
        self.publish(EquipmentEvent::CalibrationInfo(self.calibration_info));
        self.set_state(EquipmentState::CharacteristicRead);
    }

    // ----- calibration ---------------------------------------------------------

    /// Ask the sensor to calibrate after the request delay.
    pub fn request_calibration(&mut self) {
        let available = self
            .resolvers
            .get(&ServiceKind::Calibration)
            .map_or(false, |r| r.is_resolved(Field::CalibrationRequest));
        if !available {
            debug!("Calibration request skipped: service not ready");
            return;
        }
        self.set_state(EquipmentState::CalibrationStarting);
        self.timers.start(
            self.scheduler.as_ref(),
            TimerKind::CalibrationRequest,
            self.config.timing.calibration_request_delay,
        );
    }

    /// Abandon a pending calibration or skip a due one.
    pub fn cancel_calibration(&mut self) {
        if matches!(
            self.state,
            EquipmentState::CalibrationStarting | EquipmentState::NeedsCalibration(_)
        ) {
            self.timers
                .cancel(self.scheduler.as_ref(), TimerKind::CalibrationRequest);
            self.set_state(EquipmentState::CharacteristicsDiscovered);
        }
    }

    // ----- firmware update -----------------------------------------------------

    /// Start flashing `firmware`.
    pub fn start_update(&mut self, firmware: Bytes) {
        if firmware.is_empty() {
            warn!("No firmware image to flash");
            self.set_state(EquipmentState::CharacteristicsDiscovered);
            return;
        }
        let ready = self
            .resolvers
            .get(&ServiceKind::Ota)
            .map_or(false, ServiceResolver::has_characteristics);
        if !ready {
            warn!("OTA service not available");
            self.set_state(EquipmentState::UpdateFailed);
            return;
        }

        info!("Starting firmware update ({} bytes)", firmware.len());
        let mut session = OtaSession::new(
            firmware,
            self.config.ota_chunk_size,
            OtaPacing::from(&self.config.timing),
        );
        let begin = session.start();
        self.ota = Some(session);
        self.set_state(EquipmentState::UpdateStarting);
        self.run_ota(vec![begin]);
    }

    /// Skip the offered update and continue the connection.
    pub fn decline_update(&mut self) {
        if self.state == EquipmentState::NeedsUpdate {
            self.set_state(EquipmentState::Connected);
            self.settle_connected();
        }
    }

    /// Abandon the running update.
    pub fn cancel_update(&mut self) {
        if let Some(session) = self.ota.as_mut() {
            session.cancel();
            info!("Firmware update cancelled");
            self.abort_update();
        }
    }

    fn abort_update(&mut self) {
        self.ota = None;
        self.reboot_pending = false;
        self.timers.cancel(self.scheduler.as_ref(), TimerKind::OtaSettle);
        self.timers.cancel(self.scheduler.as_ref(), TimerKind::OtaPacing);
        self.set_state(EquipmentState::UpdateFailed);
    }

    fn run_ota(&mut self, actions: Vec<OtaAction>) {
        for action in actions {
            match action {
                OtaAction::WriteControl(control) => {
                    if !self.write_field(Field::OtaControl, u32::from(control.as_byte())) {
                        warn!("OTA control characteristic unavailable");
                        self.abort_update();
                        return;
                    }
                }
                OtaAction::WriteData(chunk) => {
                    trace!("OTA chunk of {} bytes", chunk.len());
                    if !self.write_raw(Field::OtaData, chunk.to_vec()) {
                        warn!("OTA data characteristic unavailable");
                        self.abort_update();
                        return;
                    }
                }
                OtaAction::Wait(delay) => {
                    self.timers
                        .start(self.scheduler.as_ref(), TimerKind::OtaPacing, delay)
                }
                OtaAction::Report(OtaProgress::Percent(p)) => {
                    self.set_state(EquipmentState::Updating(p))
                }
                OtaAction::Report(OtaProgress::Done) => {
                    info!("Firmware update complete");
                    self.set_state(EquipmentState::Updated);
                }
                OtaAction::Report(OtaProgress::Closed) => {
                    self.set_state(EquipmentState::UpdateClosed);
                    self.ota = None;
                    if std::mem::take(&mut self.reboot_pending) {
                        self.schedule_reconnect();
                    }
                }
            }
        }
    }

    // ----- errors ------------------------------------------------------------

    fn on_transport_error(&mut self, error: &Error) {
        if self.ota.as_ref().map_or(false, OtaSession::is_finishing) {
            // The device drops acknowledgements while it reboots.
            debug!("Ignoring {} while the device finishes the update", error);
            return;
        }

        warn!("{}", error);
        self.read_chain = None;
        self.timers
            .cancel(self.scheduler.as_ref(), TimerKind::CalibrationRequest);
        if let Some(session) = self.ota.as_mut() {
            session.fail();
            self.abort_update();
        } else if self.state.is_updating() {
            self.abort_update();
        } else {
            self.set_state(EquipmentState::Failed);
        }
    }

    // ----- helpers -----------------------------------------------------------

    fn reset_services(&mut self) {
        self.resolvers.clear();
        self.version_pending = false;
        self.calibration = CalibrationCheck::Idle;
        self.allow_interval_write = false;
        self.acks = 0;
        self.expected_acks = 0;
        self.pending_do_duration = None;
        self.read_chain = None;
        self.timers
            .cancel(self.scheduler.as_ref(), TimerKind::CalibrationRequest);
    }

    fn is_current(&self, device: &DeviceId) -> bool {
        self.device.as_ref() == Some(device)
    }

    fn main_ready(&self) -> bool {
        self.resolvers
            .get(&ServiceKind::Main)
            .map_or(false, ServiceResolver::has_characteristics)
    }

    fn field_for(&self, characteristic: &CharacteristicHandle) -> Option<Field> {
        let kind = ServiceKind::from_uuid(&characteristic.service)?;
        self.resolvers.get(&kind)?.field_for(characteristic)
    }

    fn write_field(&self, field: Field, value: u32) -> bool {
        match (self.device.as_ref(), self.resolvers.get(&field.service())) {
            (Some(device), Some(resolver)) => {
                resolver.write(self.transport.as_ref(), device, field, value)
            }
            _ => false,
        }
    }

    fn write_raw(&self, field: Field, value: Vec<u8>) -> bool {
        match (self.device.as_ref(), self.resolvers.get(&field.service())) {
            (Some(device), Some(resolver)) => {
                resolver.write_bytes(self.transport.as_ref(), device, field, value, true)
            }
            _ => false,
        }
    }

    fn read_field(&self, field: Field) -> bool {
        match (self.device.as_ref(), self.resolvers.get(&field.service())) {
            (Some(device), Some(resolver)) => resolver.read(self.transport.as_ref(), device, field),
            _ => false,
        }
    }

    fn set_state(&mut self, next: EquipmentState) {
        if self.state == next {
            return;
        }
        debug!("State: {} -> {}", self.state, next);
        self.state = next.clone();
        self.publish(EquipmentEvent::StateChanged(next));
    }

    fn publish(&self, event: EquipmentEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::*;
    use crate::test_support::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const DEVICE: &str = "dev-1";

    struct Harness {
        controller: EquipmentController,
        transport: Arc<RecordingTransport>,
        scheduler: Arc<ManualScheduler>,
        rx: broadcast::Receiver<EquipmentEvent>,
    }

    impl Harness {
        fn new(profile: ControllerProfile) -> Self {
            let transport = Arc::new(RecordingTransport::default());
            let scheduler = Arc::new(ManualScheduler::default());
            let controller = EquipmentController::new(
                profile,
                ControllerConfig::default(),
                transport.clone(),
                scheduler.clone(),
            );
            let rx = controller.subscribe();
            Self {
                controller,
                transport,
                scheduler,
                rx,
            }
        }

        fn device() -> DeviceId {
            DeviceId::new(DEVICE)
        }

        fn advertise(&mut self, data: Vec<u8>) {
            self.controller.handle_event(TransportEvent::Advertisement {
                device: Self::device(),
                manufacturer_data: data,
                rssi: Some(-60),
            });
        }

        fn event(&mut self, event: TransportEvent) {
            self.controller.handle_event(event);
        }

        fn fire(&mut self, kind: TimerKind) {
            let (token, _) = self
                .scheduler
                .pending(kind)
                .unwrap_or_else(|| panic!("no pending {:?} timer", kind));
            self.controller.handle_timer(token);
        }

        fn ack(&mut self, field: Field) {
            self.event(TransportEvent::WriteCompleted {
                device: Self::device(),
                characteristic: handle(field),
                result: Ok(()),
            });
        }

        fn value(&mut self, field: Field, value: &[u8]) {
            self.event(TransportEvent::ValueRead {
                device: Self::device(),
                characteristic: handle(field),
                result: Ok(value.to_vec()),
            });
        }

        fn discover(&mut self, kind: ServiceKind, fields: &[Field]) {
            self.event(TransportEvent::CharacteristicsDiscovered {
                device: Self::device(),
                service: kind.uuid(),
                characteristics: handles(fields),
            });
        }

        /// Connect and discover services, without any pre-check results.
        fn link_up(&mut self, full: bool) {
            self.controller.connect(Self::device(), full);
            self.event(TransportEvent::Connected(Self::device()));
            let mut services = vec![MAIN_SERVICE_UUID];
            if full {
                services.extend(
                    self.controller
                        .profile()
                        .auxiliary_services()
                        .iter()
                        .map(|k| k.uuid()),
                );
            }
            self.event(TransportEvent::ServicesDiscovered {
                device: Self::device(),
                services,
            });
            let main = self.controller.profile().main_layout().known;
            self.discover(ServiceKind::Main, main);
        }

        /// Full purge connection on current firmware, never calibrated.
        fn connect_purge(&mut self) {
            self.link_up(true);
            self.discover(ServiceKind::UpdateCheck, &[Field::SensorVersion]);
            self.discover(ServiceKind::Ota, &[Field::OtaControl, Field::OtaData]);
            self.discover(
                ServiceKind::Calibration,
                &[
                    Field::CalibrationRequest,
                    Field::CalibrationLast,
                    Field::CalibrationOffset,
                ],
            );
            self.value(Field::SensorVersion, b"v1.4.0");
            self.value(Field::CalibrationLast, &[0, 0, 0, 0]);
        }

        fn states(&mut self) -> Vec<EquipmentState> {
            drain(&mut self.rx)
                .into_iter()
                .filter_map(|e| match e {
                    EquipmentEvent::StateChanged(s) => Some(s),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn test_advertisements_register_matching_kind() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.advertise(purge_advertisement(1));
        h.advertise(purge_advertisement(1));
        h.advertise(chiller_advertisement(2));
        h.advertise(vec![0xE0, 0x09, 0x18, 0x00]);

        assert_eq!(h.controller.registry().len(), 1);
        let events = drain(&mut h.rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            EquipmentEvent::ReadingUpdated { is_new: true, .. }
        ));
        assert!(matches!(
            &events[1],
            EquipmentEvent::ReadingUpdated { is_new: false, .. }
        ));
    }

    #[test]
    fn test_start_scan_clears_registry() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.advertise(purge_advertisement(1));
        h.controller.start_scan();
        assert!(h.controller.registry().is_empty());
        assert_eq!(h.transport.take(), vec![TransportCall::StartScan]);
    }

    #[test]
    fn test_stop_scan_with_restart() {
        let mut h = Harness::new(ControllerProfile::Chiller);
        h.advertise(chiller_advertisement(1));
        h.controller.stop_scan(true);
        let (_, delay) = h.scheduler.pending(TimerKind::ScanRestart).unwrap();
        assert_eq!(delay, Duration::from_secs(2));

        h.fire(TimerKind::ScanRestart);
        assert_eq!(
            h.transport.take(),
            vec![TransportCall::StopScan, TransportCall::StartScan]
        );
        assert_eq!(h.controller.registry().len(), 1);
    }

    #[test]
    fn test_full_purge_connection() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.controller.connect(Harness::device(), true);
        let (_, timeout) = h.scheduler.pending(TimerKind::ConnectTimeout).unwrap();
        assert_eq!(timeout, Duration::from_secs(5));

        h.event(TransportEvent::Connected(Harness::device()));
        assert!(h.scheduler.pending(TimerKind::ConnectTimeout).is_none());
        assert_eq!(
            h.transport.count(&TransportCall::DiscoverServices(
                Harness::device(),
                vec![
                    MAIN_SERVICE_UUID,
                    UPDATE_SERVICE_UUID,
                    OTA_SERVICE_UUID,
                    CALIBRATION_SERVICE_UUID
                ]
            )),
            1
        );

        h.transport.take();
        h.controller.disconnect();
        let mut h = Harness::new(ControllerProfile::Purge);
        h.connect_purge();
        assert_eq!(
            h.states(),
            vec![
                EquipmentState::Connecting,
                EquipmentState::CharacteristicsDiscovered
            ]
        );
        assert_eq!(
            h.transport.count(&TransportCall::Read(handle(Field::SensorVersion))),
            1
        );
        assert_eq!(
            h.transport
                .count(&TransportCall::Read(handle(Field::CalibrationLast))),
            1
        );
    }

    #[test]
    fn test_outdated_firmware_needs_update() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.link_up(true);
        h.discover(ServiceKind::UpdateCheck, &[Field::SensorVersion]);
        h.value(Field::SensorVersion, b"1.3.9");
        assert_eq!(h.controller.state(), &EquipmentState::NeedsUpdate);

        // Late characteristics do not override the verdict.
        h.discover(ServiceKind::Main, ControllerProfile::Purge.main_layout().known);
        assert_eq!(h.controller.state(), &EquipmentState::NeedsUpdate);

        h.controller.decline_update();
        assert_eq!(
            h.controller.state(),
            &EquipmentState::CharacteristicsDiscovered
        );
    }

    #[test]
    fn test_unparseable_version_fails_open() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.link_up(true);
        h.discover(ServiceKind::UpdateCheck, &[Field::SensorVersion]);
        h.value(Field::SensorVersion, b"unknown");
        assert_eq!(
            h.controller.state(),
            &EquipmentState::CharacteristicsDiscovered
        );
        assert_eq!(
            h.transport
                .count(&TransportCall::Read(handle(Field::CalibrationLast))),
            0
        );
    }

    #[test]
    fn test_calibration_due() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.link_up(true);
        h.discover(ServiceKind::UpdateCheck, &[Field::SensorVersion]);
        h.discover(
            ServiceKind::Calibration,
            &[Field::CalibrationRequest, Field::CalibrationLast],
        );
        h.value(Field::SensorVersion, b"1.4.2");
        assert_eq!(h.controller.state(), &EquipmentState::Connecting);

        let two_days_ago = unix_timestamp(Utc::now() - chrono::Duration::days(2));
        h.value(Field::CalibrationLast, &two_days_ago.to_le_bytes());
        assert_eq!(
            h.controller.state(),
            &EquipmentState::NeedsCalibration("2 days ago".to_string())
        );

        h.controller.cancel_calibration();
        assert_eq!(
            h.controller.state(),
            &EquipmentState::CharacteristicsDiscovered
        );
    }

    #[test]
    fn test_request_calibration() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.connect_purge();
        h.transport.take();

        h.controller.request_calibration();
        assert_eq!(h.controller.state(), &EquipmentState::CalibrationStarting);
        let (_, delay) = h.scheduler.pending(TimerKind::CalibrationRequest).unwrap();
        assert_eq!(delay, Duration::from_secs(5));

        h.fire(TimerKind::CalibrationRequest);
        let writes = h.transport.writes_to(Field::CalibrationRequest);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 4);

        h.ack(Field::CalibrationRequest);
        assert_eq!(h.controller.state(), &EquipmentState::CalibrationSucceeded);
    }

    #[test]
    fn test_connect_timeout() {
        let mut h = Harness::new(ControllerProfile::Chiller);
        h.controller.connect(Harness::device(), false);
        h.fire(TimerKind::ConnectTimeout);
        assert_eq!(h.controller.state(), &EquipmentState::Failed);
        assert_eq!(
            h.transport
                .count(&TransportCall::Disconnect(Harness::device())),
            1
        );
    }

    #[test]
    fn test_stale_timeout_ignored() {
        let mut h = Harness::new(ControllerProfile::Chiller);
        h.controller.connect(Harness::device(), false);
        let stale = h.scheduler.all(TimerKind::ConnectTimeout)[0];
        h.event(TransportEvent::Connected(Harness::device()));
        h.controller.handle_timer(stale);
        assert_eq!(h.controller.state(), &EquipmentState::Connecting);
    }

    #[test]
    fn test_purge_start_write() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.link_up(false);
        assert_eq!(
            h.controller.state(),
            &EquipmentState::CharacteristicsDiscovered
        );

        h.controller.start_purge(PurgeMode::Purge);
        assert_eq!(h.controller.state(), &EquipmentState::CharacteristicUpdating);
        let writes = h.transport.writes_to(Field::PurgeStart);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 4);

        h.ack(Field::PurgeStart);
        assert_eq!(h.controller.state(), &EquipmentState::CharacteristicUpdated);
    }

    #[test]
    fn test_chiller_alarms_need_three_acks() {
        let mut h = Harness::new(ControllerProfile::Chiller);
        h.link_up(false);
        h.controller.set_chiller_alarms(5, 20, 30);
        assert_eq!(
            h.transport.writes_to(Field::ChillerDuration),
            vec![vec![30, 0]]
        );
        assert_eq!(
            h.transport.writes_to(Field::ChillerHighAlarm),
            vec![vec![20, 0, 0, 0]]
        );

        h.ack(Field::ChillerLowAlarm);
        h.ack(Field::ChillerHighAlarm);
        assert_eq!(h.controller.state(), &EquipmentState::CharacteristicUpdating);
        h.ack(Field::ChillerDuration);
        assert_eq!(h.controller.state(), &EquipmentState::CharacteristicUpdated);
    }

    #[test]
    fn test_do_session_with_interval() {
        let mut h = Harness::new(ControllerProfile::DissolvedOxygen);
        h.link_up(true);
        h.discover(ServiceKind::UpdateCheck, &[Field::SensorVersion]);
        h.value(Field::SensorVersion, b"1.1.0");
        assert!(h.controller.allows_interval_write());
        assert_eq!(
            h.controller.state(),
            &EquipmentState::CharacteristicsDiscovered
        );

        h.controller.configure_do_session(3600, 60);
        assert_eq!(h.transport.writes_to(Field::DoInterval), vec![vec![60, 0]]);
        assert!(h.transport.writes_to(Field::DoDuration).is_empty());

        h.ack(Field::DoInterval);
        assert_eq!(
            h.transport.writes_to(Field::DoDuration),
            vec![vec![0x10, 0x0E, 0, 0]]
        );
        assert_eq!(h.controller.state(), &EquipmentState::CharacteristicUpdating);

        h.ack(Field::DoDuration);
        assert_eq!(h.controller.state(), &EquipmentState::CharacteristicUpdated);
    }

    #[test]
    fn test_do_session_without_interval() {
        let mut h = Harness::new(ControllerProfile::DissolvedOxygen);
        h.link_up(false);
        assert!(!h.controller.allows_interval_write());

        h.controller.configure_do_session(600, 60);
        assert!(h.transport.writes_to(Field::DoInterval).is_empty());
        h.ack(Field::DoDuration);
        assert_eq!(h.controller.state(), &EquipmentState::CharacteristicUpdated);
    }

    #[test]
    fn test_acks_ignored_when_idle() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.controller.connect(Harness::device(), false);
        h.controller.disconnect();
        assert_eq!(h.controller.state(), &EquipmentState::Disconnected);

        h.ack(Field::PurgeStart);
        assert_eq!(h.controller.state(), &EquipmentState::Disconnected);

        let mut idle = Harness::new(ControllerProfile::Purge);
        idle.ack(Field::PurgeStart);
        assert_eq!(idle.controller.state(), &EquipmentState::Stopped);
    }

    #[test]
    fn test_stop_equipment_targets() {
        let mut h = Harness::new(ControllerProfile::Stop(StopTarget::DoSensor));
        h.link_up(false);
        h.controller.stop_equipment();
        assert_eq!(h.transport.writes_to(Field::DoStop), vec![vec![0]]);

        let mut h = Harness::new(ControllerProfile::Stop(StopTarget::BriteTank));
        h.link_up(false);
        h.controller.stop_equipment();
        assert_eq!(h.transport.writes_to(Field::PurgeStop), vec![vec![0]]);
        h.ack(Field::PurgeStop);
        assert_eq!(h.controller.state(), &EquipmentState::CharacteristicUpdated);
    }

    #[test]
    fn test_unexpected_disconnect_reconnects_once() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.advertise(purge_advertisement(1));
        h.link_up(false);
        h.transport.take();

        h.event(TransportEvent::Disconnected {
            device: Harness::device(),
        });
        let (_, delay) = h.scheduler.pending(TimerKind::Reconnect).unwrap();
        assert_eq!(delay, Duration::from_millis(200));
        assert_eq!(h.transport.take(), vec![TransportCall::StartScan]);
        assert_eq!(h.controller.registry().len(), 1);

        h.fire(TimerKind::Reconnect);
        assert_eq!(
            h.transport.count(&TransportCall::Connect(Harness::device())),
            1
        );
        assert_eq!(h.controller.state(), &EquipmentState::Connecting);
    }

    #[test]
    fn test_disconnect_of_unregistered_device_rescans() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.link_up(false);
        h.event(TransportEvent::Disconnected {
            device: Harness::device(),
        });
        h.transport.take();

        h.fire(TimerKind::Reconnect);
        let calls = h.transport.take();
        assert_eq!(calls, vec![TransportCall::StartScan]);
    }

    #[test]
    fn test_requested_disconnect_does_not_reconnect() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.advertise(purge_advertisement(1));
        h.link_up(false);
        h.controller.disconnect();
        h.event(TransportEvent::Disconnected {
            device: Harness::device(),
        });

        assert_eq!(h.controller.state(), &EquipmentState::Disconnected);
        assert!(h.scheduler.pending(TimerKind::Reconnect).is_none());
    }

    #[test]
    fn test_write_error_fails() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.link_up(false);
        h.controller.start_purge(PurgeMode::ReversePurge);
        h.event(TransportEvent::WriteCompleted {
            device: Harness::device(),
            characteristic: handle(Field::ReversePurgeStart),
            result: Err("GATT error".into()),
        });
        assert_eq!(h.controller.state(), &EquipmentState::Failed);
    }

    #[test]
    fn test_purge_oxygen_chain() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.link_up(false);
        h.controller.fetch_purge_oxygen();

        h.value(Field::PurgeOxygen, &[0xFF, 0xFF]);
        assert_eq!(
            h.transport.count(&TransportCall::Read(handle(Field::PurgePressure))),
            0
        );

        // 20.0 %
        h.value(Field::PurgeOxygen, &[0x00, 0x0A]);
        // 12.5 mbar
        h.value(Field::PurgePressure, &[0x40, 0x06]);
        h.value(Field::AtmosphericPressure, &[0xF5, 0x03]);

        let events = drain(&mut h.rx);
        let input = events
            .iter()
            .find_map(|e| match e {
                EquipmentEvent::ActivityInput(input) => Some(*input),
                _ => None,
            })
            .unwrap();
        assert_eq!(input.start_oxygen_percent, Some(20.0));
        assert_eq!(input.start_pressure_mbar, Some(12.5));
        assert_eq!(input.start_atmospheric_pressure_mbar, Some(1013));
        assert_eq!(input.start_oxygen_ppb(), Some(500));
        assert_eq!(h.controller.state(), &EquipmentState::ReadyToStart);
    }

    #[test]
    fn test_fermenter_oxygen_ready() {
        let mut h = Harness::new(ControllerProfile::Fermenter);
        h.link_up(false);
        h.controller.fetch_purge_oxygen();
        h.value(Field::PurgeOxygen, &[0x00, 0x0A]);
        assert_eq!(h.controller.state(), &EquipmentState::ReadyToStart);
    }

    #[test]
    fn test_read_calibration_info() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.connect_purge();
        drain(&mut h.rx);

        h.controller.read_calibration_info();
        h.value(Field::CalibrationLast, &1_700_000_000u32.to_le_bytes());
        h.value(Field::CalibrationOffset, &[0x80, 0x01, 0x00, 0x00]);

        let info = drain(&mut h.rx)
            .into_iter()
            .find_map(|e| match e {
                EquipmentEvent::CalibrationInfo(info) => Some(info),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            info.last_calibrated.map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
        assert_eq!(info.offset, Some(3.0));
        assert_eq!(h.controller.state(), &EquipmentState::CharacteristicRead);
    }

    #[test]
    fn test_ota_update_flow() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.connect_purge();
        h.transport.take();
        drain(&mut h.rx);

        h.controller.start_update(Bytes::from(vec![0xAB; 400]));
        assert_eq!(h.transport.writes_to(Field::OtaControl), vec![vec![0]]);

        h.ack(Field::OtaControl);
        let (_, settle) = h.scheduler.pending(TimerKind::OtaSettle).unwrap();
        assert_eq!(settle, Duration::from_secs(1));
        h.fire(TimerKind::OtaSettle);
        h.ack(Field::OtaData);
        h.ack(Field::OtaData);
        h.ack(Field::OtaData);

        let chunks: Vec<usize> = h
            .transport
            .writes_to(Field::OtaData)
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(chunks, vec![180, 180, 40]);

        h.fire(TimerKind::OtaPacing);
        h.ack(Field::OtaControl);
        h.fire(TimerKind::OtaPacing);
        assert_eq!(
            h.transport.writes_to(Field::OtaControl),
            vec![vec![0], vec![3], vec![4]]
        );

        // The device reboots and drops the link.
        h.event(TransportEvent::Disconnected {
            device: Harness::device(),
        });
        h.fire(TimerKind::OtaPacing);
        let (_, close) = h.scheduler.pending(TimerKind::OtaPacing).unwrap();
        assert_eq!(close, Duration::from_secs(4));
        h.fire(TimerKind::OtaPacing);

        assert_eq!(
            h.states(),
            vec![
                EquipmentState::UpdateStarting,
                EquipmentState::Updating(45),
                EquipmentState::Updating(90),
                EquipmentState::Updating(99),
                EquipmentState::Updated,
                EquipmentState::UpdateClosed,
            ]
        );
        assert!(h.controller.ota_session().is_none());
        assert!(h.scheduler.pending(TimerKind::Reconnect).is_some());
    }

    #[test]
    fn test_disconnect_during_transfer_fails_update() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.connect_purge();
        h.controller.start_update(Bytes::from(vec![1u8; 1000]));
        h.ack(Field::OtaControl);
        h.fire(TimerKind::OtaSettle);
        drain(&mut h.rx);

        h.event(TransportEvent::Disconnected {
            device: Harness::device(),
        });
        assert_eq!(h.states(), vec![EquipmentState::UpdateFailed]);
        assert!(h.controller.ota_session().is_none());
        assert!(h.scheduler.pending(TimerKind::OtaPacing).is_none());
        assert!(h.scheduler.pending(TimerKind::Reconnect).is_some());
    }

    #[test]
    fn test_cancel_update() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.connect_purge();
        h.controller.start_update(Bytes::from(vec![1u8; 10]));
        h.ack(Field::OtaControl);
        h.controller.cancel_update();
        assert_eq!(h.controller.state(), &EquipmentState::UpdateFailed);
        assert!(h.scheduler.pending(TimerKind::OtaSettle).is_none());
    }

    #[test]
    fn test_empty_firmware_returns_to_discovered() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.connect_purge();
        h.controller.start_update(Bytes::new());
        assert_eq!(
            h.controller.state(),
            &EquipmentState::CharacteristicsDiscovered
        );
        assert!(h.transport.writes_to(Field::OtaControl).is_empty());
    }

    #[test]
    fn test_late_connect_after_timeout_stays_failed() {
        let mut h = Harness::new(ControllerProfile::Chiller);
        h.controller.connect(Harness::device(), false);
        h.fire(TimerKind::ConnectTimeout);
        assert_eq!(h.controller.state(), &EquipmentState::Failed);
        h.transport.take();

        h.event(TransportEvent::Connected(Harness::device()));
        h.event(TransportEvent::ServicesDiscovered {
            device: Harness::device(),
            services: vec![MAIN_SERVICE_UUID],
        });
        let main = h.controller.profile().main_layout().known;
        h.discover(ServiceKind::Main, main);
        h.event(TransportEvent::Disconnected {
            device: Harness::device(),
        });

        assert_eq!(h.controller.state(), &EquipmentState::Failed);
        assert_eq!(
            h.transport.take(),
            vec![TransportCall::Disconnect(Harness::device())]
        );
        assert!(h.scheduler.pending(TimerKind::Reconnect).is_none());
    }

    #[test]
    fn test_late_connect_after_requested_disconnect() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.advertise(purge_advertisement(1));
        h.controller.connect(Harness::device(), false);
        h.controller.disconnect();
        assert_eq!(h.controller.state(), &EquipmentState::Disconnected);
        h.transport.take();

        h.event(TransportEvent::Connected(Harness::device()));
        h.event(TransportEvent::ServicesDiscovered {
            device: Harness::device(),
            services: vec![MAIN_SERVICE_UUID],
        });
        let main = h.controller.profile().main_layout().known;
        h.discover(ServiceKind::Main, main);

        assert_eq!(h.controller.state(), &EquipmentState::Disconnected);
        assert!(!h.controller.is_connection_activated());
        assert_eq!(
            h.transport.take(),
            vec![TransportCall::Disconnect(Harness::device())]
        );

        h.event(TransportEvent::Disconnected {
            device: Harness::device(),
        });
        assert!(h.scheduler.pending(TimerKind::Reconnect).is_none());
    }

    #[test]
    fn test_calibration_service_without_last_value() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.link_up(true);
        h.discover(ServiceKind::UpdateCheck, &[Field::SensorVersion]);
        h.discover(ServiceKind::Calibration, &[Field::CalibrationRequest]);
        h.value(Field::SensorVersion, b"1.4.0");
        assert_eq!(
            h.controller.state(),
            &EquipmentState::CharacteristicsDiscovered
        );
        assert_eq!(
            h.transport
                .count(&TransportCall::Read(handle(Field::CalibrationLast))),
            0
        );

        // Version first, calibration listing second.
        let mut h = Harness::new(ControllerProfile::Purge);
        h.link_up(true);
        h.discover(ServiceKind::UpdateCheck, &[Field::SensorVersion]);
        h.value(Field::SensorVersion, b"1.4.0");
        assert_eq!(h.controller.state(), &EquipmentState::Connecting);
        h.discover(ServiceKind::Calibration, &[Field::CalibrationRequest]);
        assert_eq!(
            h.controller.state(),
            &EquipmentState::CharacteristicsDiscovered
        );
    }

    #[test]
    fn test_transport_error_cancels_calibration_request() {
        let mut h = Harness::new(ControllerProfile::Purge);
        h.connect_purge();
        h.controller.request_calibration();
        let token = h.scheduler.all(TimerKind::CalibrationRequest)[0];
        h.transport.take();

        h.event(TransportEvent::OperationFailed {
            device: Harness::device(),
            operation: "read".into(),
            reason: "link lost".into(),
        });
        assert_eq!(h.controller.state(), &EquipmentState::Failed);
        assert!(h.scheduler.pending(TimerKind::CalibrationRequest).is_none());

        h.controller.handle_timer(token);
        assert!(h.transport.writes_to(Field::CalibrationRequest).is_empty());
        assert_eq!(h.controller.state(), &EquipmentState::Failed);
    }
}
