//! Controller configuration.
//!
//! Every delay the firmware protocol depends on lives here as a named value.
//! The defaults match the shipped firmware; tests shrink or inspect them.

use std::time::Duration;

use crate::protocol::ota::OTA_CHUNK_SIZE;
use crate::protocol::version::FirmwareVersion;

/// Fixed delays used by the connection controller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimingConfig {
    /// How long a connect attempt may take before it is abandoned.
    pub connect_timeout: Duration,
    /// Backoff between an unexpected disconnect and the reconnect attempt.
    pub reconnect_delay: Duration,
    /// Pause between the OTA begin acknowledgment and the first chunk.
    pub ota_settle_delay: Duration,
    /// Pause after the last chunk before the finalize command.
    pub ota_finalize_delay: Duration,
    /// Pause after finalize before the reboot command.
    pub ota_reboot_delay: Duration,
    /// Pause after reboot before reporting completion.
    pub ota_done_delay: Duration,
    /// Pause after completion before reporting the session closed.
    pub ota_close_delay: Duration,
    /// Delay between a calibration request and the request write.
    pub calibration_request_delay: Duration,
    /// Delay before scanning resumes after a stop-with-restart.
    pub scan_restart_delay: Duration,
    /// Age after which a reading no longer reports a signal.
    pub signal_stale_after: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_millis(200),
            ota_settle_delay: Duration::from_secs(1),
            ota_finalize_delay: Duration::from_secs(1),
            ota_reboot_delay: Duration::from_secs(1),
            ota_done_delay: Duration::from_secs(8),
            ota_close_delay: Duration::from_secs(4),
            calibration_request_delay: Duration::from_secs(5),
            scan_restart_delay: Duration::from_secs(2),
            signal_stale_after: Duration::from_secs(30),
        }
    }
}

/// Firmware versions the controller compares device reports against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareBaselines {
    /// Purge probes below this version are offered an update.
    pub purge_update: FirmwareVersion,
    /// DO probes below this version are offered an update.
    pub do_update: FirmwareVersion,
    /// DO probes at or above this major/minor accept interval writes.
    pub do_interval_write: FirmwareVersion,
    /// Purge probes at or above this version support the calibration check.
    pub purge_calibration: FirmwareVersion,
}

impl Default for FirmwareBaselines {
    fn default() -> Self {
        Self {
            purge_update: FirmwareVersion::new(1, 4, 0),
            do_update: FirmwareVersion::new(1, 1, 0),
            do_interval_write: FirmwareVersion::new(1, 1, 0),
            purge_calibration: FirmwareVersion::new(1, 4, 0),
        }
    }
}

/// Complete configuration for an equipment controller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerConfig {
    /// Protocol delays.
    pub timing: TimingConfig,
    /// Version baselines.
    pub baselines: FirmwareBaselines,
    /// OTA chunk size in bytes.
    pub ota_chunk_size: usize,
    /// Capacity of the broadcast channel carrying controller events.
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            baselines: FirmwareBaselines::default(),
            ota_chunk_size: OTA_CHUNK_SIZE,
            event_capacity: 64,
        }
    }
}

impl ControllerConfig {
    /// Replace the timing table.
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Replace the version baselines.
    pub fn with_baselines(mut self, baselines: FirmwareBaselines) -> Self {
        self.baselines = baselines;
        self
    }

    /// Override the OTA chunk size. Zero is ignored.
    pub fn with_ota_chunk_size(mut self, chunk_size: usize) -> Self {
        if chunk_size > 0 {
            self.ota_chunk_size = chunk_size;
        }
        self
    }

    /// Override the event channel capacity (minimum 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
