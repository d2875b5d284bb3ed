//! OTA firmware transfer session.
//!
//! The session is a pure state machine. Every acknowledgment or pacing timer
//! is fed in by the controller, which executes the returned [`OtaAction`]s
//! against the OTA service and its timer scheduler.
//!
//! Wire protocol:
//!
//! 1. Write control `0` (begin).
//! 2. After each acknowledged write, send the next chunk of at most
//!    [`OTA_CHUNK_SIZE`] bytes and report the percentage sent.
//! 3. Once everything is sent: wait, write control `3` (finalize), wait,
//!    write control `4` (reboot), wait, report `100`, wait, report `101`.

use bytes::Bytes;
use std::time::Duration;

use crate::config::TimingConfig;

/// Chunk size used for every transfer, independent of the negotiated MTU.
pub const OTA_CHUNK_SIZE: usize = 180;

/// Control byte written to the OTA control characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OtaControl {
    /// Start a transfer.
    Begin = 0,
    /// All data sent; verify the image.
    Finalize = 3,
    /// Reboot into the new image.
    Reboot = 4,
}

impl OtaControl {
    /// Raw byte value.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Progress reported to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtaProgress {
    /// Percentage of the image sent, always below 100.
    Percent(u8),
    /// The device has rebooted into the new image.
    Done,
    /// The session is over and can be torn down.
    Closed,
}

impl OtaProgress {
    /// Numeric form used by the firmware tooling (`100` done, `101` close).
    pub fn code(&self) -> u8 {
        match self {
            Self::Percent(p) => *p,
            Self::Done => 100,
            Self::Closed => 101,
        }
    }
}

/// Step of the post-transfer sequence waiting on a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinishStep {
    /// Next: write finalize.
    Finalize,
    /// Next: write reboot.
    Reboot,
    /// Next: report done.
    ReportDone,
    /// Next: report closed.
    ReportClosed,
}

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OtaPhase {
    /// Prepared but the begin command has not been sent.
    #[default]
    NotStarted,
    /// Streaming chunks.
    Transferring,
    /// All chunks sent; running the finalize/reboot sequence.
    Finishing(FinishStep),
    /// The closed report has been emitted.
    Done,
    /// Cancelled by the user.
    Cancelled,
    /// A write failed.
    Failed,
}

/// Command the controller should carry out for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaAction {
    /// Write a control byte with acknowledgment.
    WriteControl(OtaControl),
    /// Write a firmware chunk with acknowledgment.
    WriteData(Bytes),
    /// Arm the pacing timer; call [`OtaSession::on_timer`] when it fires.
    Wait(Duration),
    /// Publish progress.
    Report(OtaProgress),
}

/// Delays of the finishing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaPacing {
    /// Before finalize.
    pub finalize: Duration,
    /// Before reboot.
    pub reboot: Duration,
    /// Before the done report.
    pub done: Duration,
    /// Before the closed report.
    pub close: Duration,
}

impl From<&TimingConfig> for OtaPacing {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            finalize: timing.ota_finalize_delay,
            reboot: timing.ota_reboot_delay,
            done: timing.ota_done_delay,
            close: timing.ota_close_delay,
        }
    }
}

impl Default for OtaPacing {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

/// One firmware transfer attempt.
#[derive(Debug, Clone)]
pub struct OtaSession {
    firmware: Bytes,
    chunk_size: usize,
    cursor: usize,
    percentage: u8,
    phase: OtaPhase,
    pacing: OtaPacing,
}

impl OtaSession {
    /// Create a session for `firmware`, already prepared.
    pub fn new(firmware: Bytes, chunk_size: usize, pacing: OtaPacing) -> Self {
        let mut session = Self {
            firmware: Bytes::new(),
            chunk_size: chunk_size.max(1),
            cursor: 0,
            percentage: 0,
            phase: OtaPhase::NotStarted,
            pacing,
        };
        session.prepare(firmware);
        session
    }

    /// Reset the cursor and percentage and load a new image.
    pub fn prepare(&mut self, firmware: Bytes) {
        self.firmware = firmware;
        self.cursor = 0;
        self.percentage = 0;
        self.phase = OtaPhase::NotStarted;
    }

    /// Begin the transfer.
    pub fn start(&mut self) -> OtaAction {
        self.phase = OtaPhase::Transferring;
        OtaAction::WriteControl(OtaControl::Begin)
    }

    /// Handle an acknowledged write.
    ///
    /// While transferring this sends the next chunk, or moves to the
    /// finishing sequence once the whole image is out. Acknowledgments in any
    /// other phase produce no actions.
    pub fn on_write_ack(&mut self) -> Vec<OtaAction> {
        if self.phase != OtaPhase::Transferring {
            return Vec::new();
        }

        let total = self.firmware.len();
        if self.cursor >= total {
            self.phase = OtaPhase::Finishing(FinishStep::Finalize);
            return vec![OtaAction::Wait(self.pacing.finalize)];
        }

        let end = (self.cursor + self.chunk_size).min(total);
        let chunk = self.firmware.slice(self.cursor..end);
        self.cursor = end;

        // 100 is reserved for the done report after reboot.
        let sent = (self.cursor as u128 * 100 / total as u128) as u8;
        self.percentage = self.percentage.max(sent.min(99));

        vec![
            OtaAction::WriteData(chunk),
            OtaAction::Report(OtaProgress::Percent(self.percentage)),
        ]
    }

    /// Handle the pacing timer.
    pub fn on_timer(&mut self) -> Vec<OtaAction> {
        let OtaPhase::Finishing(step) = self.phase else {
            return Vec::new();
        };

        match step {
            FinishStep::Finalize => {
                self.phase = OtaPhase::Finishing(FinishStep::Reboot);
                vec![
                    OtaAction::WriteControl(OtaControl::Finalize),
                    OtaAction::Wait(self.pacing.reboot),
                ]
            }
            FinishStep::Reboot => {
                self.phase = OtaPhase::Finishing(FinishStep::ReportDone);
                vec![
                    OtaAction::WriteControl(OtaControl::Reboot),
                    OtaAction::Wait(self.pacing.done),
                ]
            }
            FinishStep::ReportDone => {
                self.phase = OtaPhase::Finishing(FinishStep::ReportClosed);
                self.percentage = 100;
                vec![
                    OtaAction::Report(OtaProgress::Done),
                    OtaAction::Wait(self.pacing.close),
                ]
            }
            FinishStep::ReportClosed => {
                self.phase = OtaPhase::Done;
                vec![OtaAction::Report(OtaProgress::Closed)]
            }
        }
    }

    /// Abandon the transfer without sending anything to the device.
    pub fn cancel(&mut self) {
        self.cursor = 0;
        self.percentage = 0;
        self.phase = OtaPhase::Cancelled;
    }

    /// Mark the transfer as failed after a write error.
    pub fn fail(&mut self) {
        self.phase = OtaPhase::Failed;
    }

    /// Current phase.
    pub fn phase(&self) -> OtaPhase {
        self.phase
    }

    /// Bytes sent so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Image size in bytes.
    pub fn total_len(&self) -> usize {
        self.firmware.len()
    }

    /// Last reported percentage.
    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    /// True while chunks are still being streamed.
    pub fn is_transferring(&self) -> bool {
        matches!(self.phase, OtaPhase::NotStarted | OtaPhase::Transferring)
    }

    /// True once every chunk is out and the device is finishing.
    pub fn is_finishing(&self) -> bool {
        matches!(self.phase, OtaPhase::Finishing(_))
    }
}
