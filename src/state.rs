//! Equipment state and controller profiles.

use crate::ble::advertising::EquipmentKind;
use crate::ble::characteristics::Field;
use crate::ble::services::{ServiceKind, ServiceLayout};
use crate::config::FirmwareBaselines;
use crate::firmware::FirmwareImage;
use crate::protocol::version::FirmwareVersion;

/// State of the equipment a controller manages.
///
/// Exactly one value is current at any time. Only the controller transitions
/// it; everything else observes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EquipmentState {
    /// Idle, not connected.
    #[default]
    Stopped,
    /// Connecting or running a pre-check.
    Connecting,
    /// Link up, main service not resolved yet.
    Connected,
    /// A connection or characteristic operation failed.
    Failed,
    /// Disconnected on request.
    Disconnected,
    /// Main service resolved and ready for commands.
    CharacteristicsDiscovered,
    /// Waiting for write acknowledgements.
    CharacteristicUpdating,
    /// Every expected write was acknowledged.
    CharacteristicUpdated,
    /// A requested read chain completed.
    CharacteristicRead,
    /// Purge starting conditions were read.
    ReadyToStart,
    /// Firmware is older than the update baseline.
    NeedsUpdate,
    /// OTA begin command sent.
    UpdateStarting,
    /// OTA transfer in progress, percent complete.
    Updating(u8),
    /// Firmware transferred and rebooted.
    Updated,
    /// OTA session closed.
    UpdateClosed,
    /// OTA session failed.
    UpdateFailed,
    /// Calibration is due; carries "last calibrated N units ago".
    NeedsCalibration(String),
    /// Calibration request pending.
    CalibrationStarting,
    /// Calibration request acknowledged.
    CalibrationSucceeded,
}

impl EquipmentState {
    /// Whether an OTA transfer is in flight.
    pub fn is_updating(&self) -> bool {
        matches!(self, Self::UpdateStarting | Self::Updating(_))
    }

    /// Whether a terminal error state is current.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed | Self::UpdateFailed)
    }
}

impl std::fmt::Display for EquipmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Failed => write!(f, "Failed"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::CharacteristicsDiscovered => write!(f, "Characteristics Discovered"),
            Self::CharacteristicUpdating => write!(f, "Characteristic Updating"),
            Self::CharacteristicUpdated => write!(f, "Characteristic Updated"),
            Self::CharacteristicRead => write!(f, "Characteristic Read"),
            Self::ReadyToStart => write!(f, "Ready To Start"),
            Self::NeedsUpdate => write!(f, "Needs Update"),
            Self::UpdateStarting => write!(f, "Update Starting"),
            Self::Updating(p) => write!(f, "Updating {}%", p),
            Self::Updated => write!(f, "Updated"),
            Self::UpdateClosed => write!(f, "Update Closed"),
            Self::UpdateFailed => write!(f, "Update Failed"),
            Self::NeedsCalibration(ago) => write!(f, "Needs Calibration ({})", ago),
            Self::CalibrationStarting => write!(f, "Calibration Starting"),
            Self::CalibrationSucceeded => write!(f, "Calibration Succeeded"),
        }
    }
}

/// Equipment a stop controller shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopTarget {
    /// Purge running on a brite tank.
    BriteTank,
    /// Reverse purge running on a fermenter.
    Fermenter,
    /// DO measurement session.
    DoSensor,
}

/// Which purge characteristic a start writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PurgeMode {
    /// Regular purge.
    Purge,
    /// Reverse purge.
    ReversePurge,
}

impl PurgeMode {
    /// Characteristic written with the start time.
    pub fn field(self) -> Field {
        match self {
            Self::Purge => Field::PurgeStart,
            Self::ReversePurge => Field::ReversePurgeStart,
        }
    }
}

/// What a controller instance is built to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControllerProfile {
    /// Purge probe on a brite tank.
    Purge,
    /// Chiller probe.
    Chiller,
    /// Dissolved-oxygen probe.
    DissolvedOxygen,
    /// Purge probe running a reverse purge on a fermenter.
    Fermenter,
    /// Stops a running session.
    Stop(StopTarget),
}

const PURGE_KNOWN: &[Field] = &[
    Field::PurgeStart,
    Field::ReversePurgeStart,
    Field::PurgeStop,
    Field::PurgeOxygen,
    Field::PurgePressure,
    Field::AtmosphericPressure,
];
const PURGE_REQUIRED: &[Field] = &[
    Field::PurgeStart,
    Field::ReversePurgeStart,
    Field::PurgeStop,
    Field::PurgeOxygen,
];
const CHILLER_FIELDS: &[Field] = &[
    Field::ChillerLowAlarm,
    Field::ChillerHighAlarm,
    Field::ChillerDuration,
];
const DO_KNOWN: &[Field] = &[
    Field::DoInterval,
    Field::DoDuration,
    Field::DoSessionDuration,
    Field::DoSessionState,
    Field::DoStop,
    Field::DoOxygenCount,
    Field::DoMaxOxygen,
    Field::DoMinOxygen,
    Field::DoAvgOxygen,
    Field::DoTemperature,
    Field::DoMaxTemperature,
    Field::DoMinTemperature,
    Field::DoAvgTemperature,
];
const DO_REQUIRED: &[Field] = &[Field::DoDuration, Field::DoStop];
const FERMENTER_FIELDS: &[Field] = &[
    Field::ReversePurgeStart,
    Field::PurgeStop,
    Field::PurgeOxygen,
];
const PURGE_STOP_FIELDS: &[Field] = &[Field::PurgeStop];
const DO_STOP_FIELDS: &[Field] = &[Field::DoStop];

impl ControllerProfile {
    /// Whether advertisements of `kind` belong to this profile.
    pub fn accepts(self, kind: EquipmentKind) -> bool {
        match self {
            Self::Purge | Self::Fermenter => kind == EquipmentKind::Purge,
            Self::Chiller => kind == EquipmentKind::Chiller,
            Self::DissolvedOxygen => kind == EquipmentKind::DissolvedOxygen,
            Self::Stop(StopTarget::BriteTank | StopTarget::Fermenter) => {
                kind == EquipmentKind::Purge
            }
            Self::Stop(StopTarget::DoSensor) => kind == EquipmentKind::DissolvedOxygen,
        }
    }

    /// Characteristics resolved on the main service.
    pub fn main_layout(self) -> ServiceLayout {
        let (known, required) = match self {
            Self::Purge => (PURGE_KNOWN, PURGE_REQUIRED),
            Self::Chiller => (CHILLER_FIELDS, CHILLER_FIELDS),
            Self::DissolvedOxygen => (DO_KNOWN, DO_REQUIRED),
            Self::Fermenter => (FERMENTER_FIELDS, FERMENTER_FIELDS),
            Self::Stop(StopTarget::BriteTank | StopTarget::Fermenter) => {
                (PURGE_STOP_FIELDS, PURGE_STOP_FIELDS)
            }
            Self::Stop(StopTarget::DoSensor) => (DO_STOP_FIELDS, DO_STOP_FIELDS),
        };
        ServiceLayout { known, required }
    }

    /// Layout for any service this profile uses.
    pub fn layout(self, kind: ServiceKind) -> Option<ServiceLayout> {
        match kind {
            ServiceKind::Main => Some(self.main_layout()),
            other if self.auxiliary_services().contains(&other) => {
                ServiceLayout::auxiliary(other)
            }
            _ => None,
        }
    }

    /// Services discovered on a full connection besides the main service.
    pub fn auxiliary_services(self) -> &'static [ServiceKind] {
        match self {
            Self::Purge => &[
                ServiceKind::UpdateCheck,
                ServiceKind::Ota,
                ServiceKind::Calibration,
            ],
            Self::DissolvedOxygen => &[ServiceKind::UpdateCheck, ServiceKind::Ota],
            _ => &[],
        }
    }

    /// Version below which an update is offered.
    pub fn update_baseline(self, baselines: &FirmwareBaselines) -> Option<FirmwareVersion> {
        match self {
            Self::Purge => Some(baselines.purge_update),
            Self::DissolvedOxygen => Some(baselines.do_update),
            _ => None,
        }
    }

    /// Version from which the calibration check applies.
    pub fn calibration_baseline(self, baselines: &FirmwareBaselines) -> Option<FirmwareVersion> {
        match self {
            Self::Purge => Some(baselines.purge_calibration),
            _ => None,
        }
    }

    /// Firmware image flashed by an update.
    pub fn firmware_image(self) -> Option<FirmwareImage> {
        match self {
            Self::Purge => Some(FirmwareImage::Purge),
            Self::DissolvedOxygen => Some(FirmwareImage::DissolvedOxygen),
            _ => None,
        }
    }
}

impl std::fmt::Display for ControllerProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Purge => write!(f, "Purge"),
            Self::Chiller => write!(f, "Chiller"),
            Self::DissolvedOxygen => write!(f, "Dissolved Oxygen"),
            Self::Fermenter => write!(f, "Fermenter"),
            Self::Stop(target) => write!(f, "Stop ({:?})", target),
        }
    }
}
