//! GATT characteristic table.
//!
//! Names every characteristic the controller touches and maps each one to the
//! handle discovered on the connected peripheral.

use std::collections::HashMap;
use tracing::trace;
use uuid::Uuid;

use crate::ble::services::ServiceKind;
use crate::ble::transport::CharacteristicHandle;
use crate::ble::uuids::*;
use crate::protocol::codec::FieldWidth;

/// A characteristic known to the equipment firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Field {
    /// Chiller low temperature alarm.
    ChillerLowAlarm,
    /// Chiller high temperature alarm.
    ChillerHighAlarm,
    /// Chiller alarm duration in minutes.
    ChillerDuration,
    /// Purge start time.
    PurgeStart,
    /// Reverse purge start time.
    ReversePurgeStart,
    /// Purge stop command.
    PurgeStop,
    /// Current oxygen reading.
    PurgeOxygen,
    /// Chamber pressure.
    PurgePressure,
    /// Atmospheric pressure.
    AtmosphericPressure,
    /// DO sampling interval.
    DoInterval,
    /// DO session duration setting.
    DoDuration,
    /// DO elapsed session duration.
    DoSessionDuration,
    /// DO session state.
    DoSessionState,
    /// DO stop command.
    DoStop,
    /// DO sample count.
    DoOxygenCount,
    /// DO maximum oxygen.
    DoMaxOxygen,
    /// DO minimum oxygen.
    DoMinOxygen,
    /// DO average oxygen.
    DoAvgOxygen,
    /// DO current temperature.
    DoTemperature,
    /// DO maximum temperature.
    DoMaxTemperature,
    /// DO minimum temperature.
    DoMinTemperature,
    /// DO average temperature.
    DoAvgTemperature,
    /// Firmware version string.
    SensorVersion,
    /// OTA control point.
    OtaControl,
    /// OTA data sink.
    OtaData,
    /// Calibration request.
    CalibrationRequest,
    /// Last calibration time.
    CalibrationLast,
    /// Calibration offset.
    CalibrationOffset,
}

impl Field {
    /// Characteristic UUID.
    pub fn uuid(self) -> Uuid {
        match self {
            Self::ChillerLowAlarm => CHILLER_LOW_ALARM_UUID,
            Self::ChillerHighAlarm => CHILLER_HIGH_ALARM_UUID,
            Self::ChillerDuration => CHILLER_DURATION_UUID,
            Self::PurgeStart => PURGE_START_UUID,
            Self::ReversePurgeStart => REVERSE_PURGE_START_UUID,
            Self::PurgeStop => PURGE_STOP_UUID,
            Self::PurgeOxygen => PURGE_OXYGEN_UUID,
            Self::PurgePressure => PURGE_PRESSURE_MBAR_UUID,
            Self::AtmosphericPressure => ATMOSPHERIC_PRESSURE_UUID,
            Self::DoInterval => DO_INTERVAL_UUID,
            Self::DoDuration => DO_DURATION_UUID,
            Self::DoSessionDuration => DO_SESSION_DURATION_UUID,
            Self::DoSessionState => DO_SESSION_STATE_UUID,
            Self::DoStop => DO_STOP_UUID,
            Self::DoOxygenCount => DO_OXYGEN_COUNT_UUID,
            Self::DoMaxOxygen => DO_MAX_OXYGEN_UUID,
            Self::DoMinOxygen => DO_MIN_OXYGEN_UUID,
            Self::DoAvgOxygen => DO_AVG_OXYGEN_UUID,
            Self::DoTemperature => DO_TEMPERATURE_UUID,
            Self::DoMaxTemperature => DO_MAX_TEMPERATURE_UUID,
            Self::DoMinTemperature => DO_MIN_TEMPERATURE_UUID,
            Self::DoAvgTemperature => DO_AVG_TEMPERATURE_UUID,
            Self::SensorVersion => SENSOR_VERSION_UUID,
            Self::OtaControl => OTA_CONTROL_UUID,
            Self::OtaData => OTA_DATA_UUID,
            Self::CalibrationRequest => CALIBRATION_REQUEST_UUID,
            Self::CalibrationLast => CALIBRATION_LAST_UUID,
            Self::CalibrationOffset => CALIBRATION_OFFSET_UUID,
        }
    }

    /// Service the characteristic lives in.
    pub fn service(self) -> ServiceKind {
        match self {
            Self::SensorVersion => ServiceKind::UpdateCheck,
            Self::OtaControl | Self::OtaData => ServiceKind::Ota,
            Self::CalibrationRequest | Self::CalibrationLast | Self::CalibrationOffset => {
                ServiceKind::Calibration
            }
            _ => ServiceKind::Main,
        }
    }

    /// Encoded width for integer writes. `None` for read-only fields and
    /// the raw OTA data sink.
    pub fn width(self) -> Option<FieldWidth> {
        match self {
            Self::ChillerLowAlarm
            | Self::ChillerHighAlarm
            | Self::PurgeStart
            | Self::ReversePurgeStart
            | Self::DoDuration
            | Self::CalibrationRequest => Some(FieldWidth::U32),
            Self::ChillerDuration | Self::DoInterval => Some(FieldWidth::U16),
            Self::PurgeStop | Self::DoStop | Self::OtaControl => Some(FieldWidth::U8),
            _ => None,
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Resolved handles for one service instance.
#[derive(Debug, Clone, Default)]
pub struct CharacteristicTable {
    handles: HashMap<Field, CharacteristicHandle>,
}

impl CharacteristicTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match discovered characteristics against `known`.
    ///
    /// Returns how many fields were newly resolved.
    pub fn resolve(&mut self, known: &[Field], discovered: &[CharacteristicHandle]) -> usize {
        let mut added = 0;
        for handle in discovered {
            if let Some(field) = known.iter().find(|f| f.uuid() == handle.uuid) {
                if self.handles.insert(*field, *handle).is_none() {
                    trace!("Resolved {} -> {}", field, handle.uuid);
                    added += 1;
                }
            }
        }
        added
    }

    /// Look up a resolved handle.
    pub fn get(&self, field: Field) -> Option<&CharacteristicHandle> {
        self.handles.get(&field)
    }

    /// True if every field in `required` is resolved.
    pub fn has_characteristics(&self, required: &[Field]) -> bool {
        !required.is_empty() && required.iter().all(|f| self.handles.contains_key(f))
    }

    /// Reverse lookup from a handle to its field.
    pub fn field_for(&self, handle: &CharacteristicHandle) -> Option<Field> {
        self.handles
            .iter()
            .find(|(_, h)| *h == handle)
            .map(|(field, _)| *field)
    }

    /// Number of resolved handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True if nothing is resolved.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Drop every handle.
    pub fn clear(&mut self) {
        self.handles.clear();
    }
}
