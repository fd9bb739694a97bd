use crate::capture::Camera;
use crate::config::{CycleConfig, Polarity};
use crate::debounce::EdgeDebouncer;
use crate::production::ProductionInfo;
use crate::store::{new_capture, PendingImageStore};
use crate::uploader::UploadOrchestrator;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Phase of the detect -> capture -> upload cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoState {
    Wait,
    Capture,
    Upload,
}

impl AutoState {
    fn next(self) -> Self {
        match self {
            Self::Wait => Self::Capture,
            Self::Capture => Self::Upload,
            Self::Upload => Self::Wait,
        }
    }
}

/// The collaborators a phase's entry effect touches, shared with the effect
/// task so the controller itself never needs to cross a task boundary.
struct CycleEffects {
    camera: Arc<dyn Camera>,
    store: Arc<PendingImageStore>,
    orchestrator: Arc<UploadOrchestrator>,
    production: ProductionInfo,
    calibration_delay: Duration,
    /// Raised while an entry effect is in flight
    busy: AtomicBool,
}

impl CycleEffects {
    async fn run(&self, state: AutoState) {
        match state {
            AutoState::Wait => {}
            AutoState::Capture => self.capture_one().await,
            AutoState::Upload => {
                if self.store.snapshot_count().await > 0 {
                    let _ = self.orchestrator.drain().await;
                } else {
                    debug!("upload phase entered with nothing pending");
                }
            }
        }
    }

    /// Take one photo and append it to the pending queue. Failures are
    /// logged; the cycle continues from its current phase.
    async fn capture_one(&self) {
        if !self.calibration_delay.is_zero() {
            tokio::time::sleep(self.calibration_delay).await;
        }

        match self.camera.capture(&self.production).await {
            Ok(uri) => {
                if let Err(e) = self
                    .store
                    .append(new_capture(uri, self.production.clone()))
                    .await
                {
                    error!(error = %e, "captured image could not be queued");
                }
            }
            Err(e) => error!(error = %e, "capture failed, cycle continues"),
        }
    }
}

/// Drives the capture cycle from debounced sensor pulses.
///
/// Each accepted pulse advances the state machine by exactly one phase and
/// runs that phase's entry effect: Capture takes a photo into the pending
/// queue, Upload flushes the queue, Wait does nothing. Effects run on their
/// own task; pulses that arrive while one is still in flight are dropped,
/// never queued. A stale pulse (gap above the maximum interval) resets the
/// machine to Wait before advancing.
pub struct AutoCaptureController {
    effects: Arc<CycleEffects>,
    idle_reset_ms: u64,
    /// Monotonic origin all `now_ms` timestamps are measured from
    epoch: Instant,
    active: AtomicBool,
    state: Mutex<AutoState>,
    debouncer: Mutex<EdgeDebouncer>,
    last_pulse_ms: AtomicU64,
}

impl AutoCaptureController {
    pub fn new(
        camera: Arc<dyn Camera>,
        store: Arc<PendingImageStore>,
        orchestrator: Arc<UploadOrchestrator>,
        production: ProductionInfo,
        polarity: Polarity,
        cycle: &CycleConfig,
        calibration_delay: Duration,
    ) -> Self {
        Self {
            effects: Arc::new(CycleEffects {
                camera,
                store,
                orchestrator,
                production,
                calibration_delay,
                busy: AtomicBool::new(false),
            }),
            idle_reset_ms: cycle.idle_reset_ms,
            epoch: Instant::now(),
            active: AtomicBool::new(false),
            state: Mutex::new(AutoState::Wait),
            debouncer: Mutex::new(EdgeDebouncer::new(polarity, cycle)),
            last_pulse_ms: AtomicU64::new(0),
        }
    }

    /// Milliseconds since the controller was built. All observations and the
    /// idle watchdog share this clock.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub async fn state(&self) -> AutoState {
        *self.state.lock().await
    }

    /// Whether the "pulse ignored" flag is raised.
    pub async fn pulse_ignored(&self, now_ms: u64) -> bool {
        self.debouncer.lock().await.pulse_ignored(now_ms)
    }

    /// Enter automatic mode: reset to Wait and flush any images left over
    /// from a previous run. The startup flush is not a cycle; the machine
    /// stays in Wait while it runs.
    #[instrument(skip(self))]
    pub async fn activate(&self) -> Option<JoinHandle<()>> {
        self.debouncer.lock().await.reset();
        *self.state.lock().await = AutoState::Wait;
        self.last_pulse_ms.store(self.now_ms(), Ordering::Release);
        self.active.store(true, Ordering::Release);
        info!("automatic capture mode activated");

        if self.effects.store.snapshot_count().await == 0 {
            return None;
        }

        let effects = Arc::clone(&self.effects);
        Some(tokio::spawn(async move {
            info!("flushing images pending from a previous run");
            let _ = effects.orchestrator.drain().await;
        }))
    }

    /// Leave automatic mode. Drops edge bookkeeping and resets to Wait with
    /// no side effects; an in-flight upload is left to finish.
    pub async fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.debouncer.lock().await.reset();
        *self.state.lock().await = AutoState::Wait;
        info!("automatic capture mode deactivated");
    }

    /// Feed one sample of the detection signal.
    ///
    /// Returns the handle of the spawned entry effect when the sample
    /// produced an accepted pulse, `None` otherwise (no qualifying edge,
    /// suppressed edge, inactive controller, or a cycle still in flight).
    pub async fn observe(&self, signal: bool, now_ms: u64) -> Option<JoinHandle<()>> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }

        // One cycle in flight at a time; a concurrent pulse is dropped
        // before any interval bookkeeping, so it neither shifts the debounce
        // window nor feeds the idle watchdog
        let event = {
            let mut debouncer = self.debouncer.lock().await;
            if self.effects.busy.load(Ordering::Acquire) {
                if debouncer.track_only(signal, now_ms) {
                    warn!(timestamp_ms = now_ms, "pulse dropped, previous cycle still running");
                }
                return None;
            }
            debouncer.observe(signal, now_ms)?
        };

        self.last_pulse_ms.store(now_ms, Ordering::Release);
        self.effects.busy.store(true, Ordering::Release);

        let entered = {
            let mut state = self.state.lock().await;
            if event.stale {
                debug!(from = ?*state, "stale pulse, falling back to Wait");
                *state = AutoState::Wait;
            }
            let next = state.next();
            *state = next;
            next
        };

        info!(state = ?entered, timestamp_ms = now_ms, "cycle advanced");

        let effects = Arc::clone(&self.effects);
        Some(tokio::spawn(async move {
            effects.run(entered).await;
            effects.busy.store(false, Ordering::Release);
        }))
    }

    /// Reset to Wait if no pulse has been accepted for the idle window.
    /// Returns whether a reset happened. An in-flight upload is not touched.
    pub async fn maybe_idle_reset(&self, now_ms: u64) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }

        let last = self.last_pulse_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(last) < self.idle_reset_ms {
            return false;
        }

        let stale_state = {
            let mut state = self.state.lock().await;
            let prior = *state;
            *state = AutoState::Wait;
            prior
        };
        self.debouncer.lock().await.reset();
        self.last_pulse_ms.store(now_ms, Ordering::Release);
        info!(
            idle_ms = now_ms.saturating_sub(last),
            stale_state = ?stale_state,
            "idle watchdog reset cycle to Wait"
        );
        true
    }

    /// Spawn the periodic idle watchdog.
    pub fn spawn_idle_watchdog(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let now_ms = self.now_ms();
                self.maybe_idle_reset(now_ms).await;
            }
        })
    }
}
