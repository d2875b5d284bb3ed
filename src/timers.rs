//! Cancellable timers for the controller's suspend points.
//!
//! Each timer kind has at most one live token. Starting or cancelling a kind
//! bumps its generation, so an expiry that was already queued is recognised
//! as stale and dropped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Suspend points of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Abandon a connect attempt.
    ConnectTimeout,
    /// Reconnect after an unexpected disconnect.
    Reconnect,
    /// Send the first OTA chunk after the begin acknowledgement.
    OtaSettle,
    /// Next finishing step of an OTA session.
    OtaPacing,
    /// Write the calibration request.
    CalibrationRequest,
    /// Resume scanning after a stop.
    ScanRestart,
}

/// Identifies one scheduled expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    /// Timer kind.
    pub kind: TimerKind,
    /// Generation at scheduling time.
    pub generation: u64,
}

/// Schedules expiries on behalf of the controller.
pub trait TimerScheduler: Send + Sync {
    /// Deliver `token` after `delay`.
    fn schedule(&self, token: TimerToken, delay: Duration);

    /// Drop a pending delivery if it has not fired yet.
    fn cancel(&self, token: TimerToken);
}

/// Bookkeeping of the live token per kind.
#[derive(Debug, Default)]
pub struct TimerSet {
    next_generation: u64,
    live: HashMap<TimerKind, TimerToken>,
}

impl TimerSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any live timer of `kind` and schedule a new one.
    pub fn start(&mut self, scheduler: &dyn TimerScheduler, kind: TimerKind, delay: Duration) {
        self.cancel(scheduler, kind);
        self.next_generation += 1;
        let token = TimerToken {
            kind,
            generation: self.next_generation,
        };
        trace!("Timer {:?} armed for {:?}", kind, delay);
        self.live.insert(kind, token);
        scheduler.schedule(token, delay);
    }

    /// Invalidate the live timer of `kind`.
    pub fn cancel(&mut self, scheduler: &dyn TimerScheduler, kind: TimerKind) {
        if let Some(token) = self.live.remove(&kind) {
            trace!("Timer {:?} cancelled", kind);
            scheduler.cancel(token);
        }
    }

    /// Accept an expiry if it is the live token, consuming it.
    pub fn take_if_current(&mut self, token: TimerToken) -> bool {
        match self.live.get(&token.kind) {
            Some(live) if *live == token => {
                self.live.remove(&token.kind);
                true
            }
            _ => false,
        }
    }

    /// Whether a timer of `kind` is pending.
    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.live.contains_key(&kind)
    }

    /// Invalidate every live timer.
    pub fn cancel_all(&mut self, scheduler: &dyn TimerScheduler) {
        for (_, token) in self.live.drain() {
            scheduler.cancel(token);
        }
    }
}

/// Scheduler backed by tokio sleeps that post expired tokens to a channel.
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<TimerToken>,
    tasks: Arc<Mutex<HashMap<TimerToken, JoinHandle<()>>>>,
}

impl TokioScheduler {
    /// Create a scheduler and the receiver expiries arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerToken>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                tasks: Arc::new(Mutex::new(HashMap::new())),
            },
            rx,
        )
    }
}

impl TimerScheduler for TokioScheduler {
    fn schedule(&self, token: TimerToken, delay: Duration) {
        let tx = self.tx.clone();
        let tasks = self.tasks.clone();
        // Held until the handle is stored, so the task's own removal runs after the insert.
        let mut live = self.tasks.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tasks.lock().remove(&token);
            let _ = tx.send(token);
        });
        live.insert(token, handle);
    }

    fn cancel(&self, token: TimerToken) {
        if let Some(handle) = self.tasks.lock().remove(&token) {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.lock().drain() {
            handle.abort();
        }
    }
}
