//! BLE Service and Characteristic UUIDs.
//!
//! Wire constants shared with the equipment firmware. The main sensor
//! service reuses one characteristic UUID range across equipment kinds, so
//! several names below alias the same value.

use uuid::Uuid;

// Main Sensor Service
/// Main sensor service UUID, present on every equipment kind.
pub const MAIN_SERVICE_UUID: Uuid = Uuid::from_u128(0x09e0_2000_300e_1b1c_1c17_111e0b151b0d);

// Chiller
/// Chiller low temperature alarm (write).
pub const CHILLER_LOW_ALARM_UUID: Uuid = Uuid::from_u128(0x09e0_2002_300e_1b1c_1c17_111e0b151b0d);
/// Chiller high temperature alarm (write).
pub const CHILLER_HIGH_ALARM_UUID: Uuid =
    Uuid::from_u128(0x09e0_2003_300e_1b1c_1c17_111e0b151b0d);
/// Chiller alarm duration in minutes (write).
pub const CHILLER_DURATION_UUID: Uuid = Uuid::from_u128(0x09e0_2004_300e_1b1c_1c17_111e0b151b0d);

// Purge
/// Purge start, written with the current Unix time.
pub const PURGE_START_UUID: Uuid = Uuid::from_u128(0x09e0_2004_300e_1b1c_1c17_111e0b151b0d);
/// Reverse purge start, written with the current Unix time.
pub const REVERSE_PURGE_START_UUID: Uuid =
    Uuid::from_u128(0x09e0_2005_300e_1b1c_1c17_111e0b151b0d);
/// Purge stop command.
pub const PURGE_STOP_UUID: Uuid = Uuid::from_u128(0x09e0_2006_300e_1b1c_1c17_111e0b151b0d);
/// Current oxygen reading (read).
pub const PURGE_OXYGEN_UUID: Uuid = Uuid::from_u128(0x09e0_2007_300e_1b1c_1c17_111e0b151b0d);
/// Chamber pressure in millibar (read).
pub const PURGE_PRESSURE_MBAR_UUID: Uuid =
    Uuid::from_u128(0x09e0_2008_300e_1b1c_1c17_111e0b151b0d);
/// Atmospheric pressure in millibar (read).
pub const ATMOSPHERIC_PRESSURE_UUID: Uuid =
    Uuid::from_u128(0x09e0_200a_300e_1b1c_1c17_111e0b151b0d);

// Dissolved oxygen
/// DO sampling interval (write, firmware 1.1 and later).
pub const DO_INTERVAL_UUID: Uuid = Uuid::from_u128(0x09e0_2001_300e_1b1c_1c17_111e0b151b0d);
/// DO session duration request (write).
pub const DO_DURATION_UUID: Uuid = Uuid::from_u128(0x09e0_2002_300e_1b1c_1c17_111e0b151b0d);
/// DO elapsed session duration (read).
pub const DO_SESSION_DURATION_UUID: Uuid =
    Uuid::from_u128(0x09e0_2003_300e_1b1c_1c17_111e0b151b0d);
/// DO session state (read).
pub const DO_SESSION_STATE_UUID: Uuid = Uuid::from_u128(0x09e0_2004_300e_1b1c_1c17_111e0b151b0d);
/// DO stop command.
pub const DO_STOP_UUID: Uuid = Uuid::from_u128(0x09e0_2005_300e_1b1c_1c17_111e0b151b0d);
/// DO oxygen sample count.
pub const DO_OXYGEN_COUNT_UUID: Uuid = Uuid::from_u128(0x09e0_2006_300e_1b1c_1c17_111e0b151b0d);
/// DO maximum oxygen.
pub const DO_MAX_OXYGEN_UUID: Uuid = Uuid::from_u128(0x09e0_2007_300e_1b1c_1c17_111e0b151b0d);
/// DO minimum oxygen.
pub const DO_MIN_OXYGEN_UUID: Uuid = Uuid::from_u128(0x09e0_2008_300e_1b1c_1c17_111e0b151b0d);
/// DO average oxygen.
pub const DO_AVG_OXYGEN_UUID: Uuid = Uuid::from_u128(0x09e0_2009_300e_1b1c_1c17_111e0b151b0d);
/// DO temperature.
pub const DO_TEMPERATURE_UUID: Uuid = Uuid::from_u128(0x09e0_200a_300e_1b1c_1c17_111e0b151b0d);
/// DO maximum temperature.
pub const DO_MAX_TEMPERATURE_UUID: Uuid =
    Uuid::from_u128(0x09e0_200b_300e_1b1c_1c17_111e0b151b0d);
/// DO minimum temperature.
pub const DO_MIN_TEMPERATURE_UUID: Uuid =
    Uuid::from_u128(0x09e0_200c_300e_1b1c_1c17_111e0b151b0d);
/// DO average temperature.
pub const DO_AVG_TEMPERATURE_UUID: Uuid =
    Uuid::from_u128(0x09e0_200d_300e_1b1c_1c17_111e0b151b0d);

// Update check
/// Firmware update-check service UUID.
pub const UPDATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x09e0_0100_300e_1b1c_1c17_111e0b151b0d);
/// Firmware version string (read).
pub const SENSOR_VERSION_UUID: Uuid = Uuid::from_u128(0x09e0_0103_300e_1b1c_1c17_111e0b151b0d);

// OTA
/// OTA service UUID.
pub const OTA_SERVICE_UUID: Uuid = Uuid::from_u128(0x1d14_d6ee_fd63_4fa1_bfa4_8f47b42119f0);
/// OTA control characteristic (begin/finalize/reboot).
pub const OTA_CONTROL_UUID: Uuid = Uuid::from_u128(0xf7bf_3564_fb6d_4e53_88a4_5e37e0326063);
/// OTA data characteristic (firmware chunks).
pub const OTA_DATA_UUID: Uuid = Uuid::from_u128(0x9842_27f3_34fc_4045_a5d0_2c581f81a153);

// Calibration
/// Calibration service UUID.
pub const CALIBRATION_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x09e0_2200_300e_1b1c_1c17_111e0b151b0d);
/// Calibration request, written with the current Unix time.
pub const CALIBRATION_REQUEST_UUID: Uuid =
    Uuid::from_u128(0x09e0_2201_300e_1b1c_1c17_111e0b151b0d);
/// Last calibration timestamp (read).
pub const CALIBRATION_LAST_UUID: Uuid = Uuid::from_u128(0x09e0_2204_300e_1b1c_1c17_111e0b151b0d);
/// Calibration offset, scaled by 128 (read).
pub const CALIBRATION_OFFSET_UUID: Uuid =
    Uuid::from_u128(0x09e0_2205_300e_1b1c_1c17_111e0b151b0d);

/// Bluetooth SIG company identifier carried in the manufacturer data.
pub const PREDDIO_MANUFACTURER_ID: u16 = 0x09E0;

/// All service UUIDs the controller knows how to resolve.
pub const SERVICE_UUIDS: [Uuid; 4] = [
    MAIN_SERVICE_UUID,
    UPDATE_SERVICE_UUID,
    OTA_SERVICE_UUID,
    CALIBRATION_SERVICE_UUID,
];

/// Check if a service UUID belongs to the equipment firmware.
pub fn is_equipment_service(uuid: &Uuid) -> bool {
    SERVICE_UUIDS.contains(uuid)
}
