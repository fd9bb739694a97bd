use crate::controller::AutoCaptureController;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Source of the boolean detection signal.
///
/// `true` means an object is currently in front of the sensor. The poll loop
/// samples this level; edge detection happens downstream in the debouncer.
pub trait SignalSource: Send + Sync {
    fn level(&self) -> bool;

    /// Instant of the most recent level change, if one has happened yet.
    fn last_change(&self) -> Option<std::time::Instant>;
}

/// Free-running simulated sensor for bench runs without hardware.
///
/// Raises the signal for the configured pulse width, lowers it for the
/// configured interval, and repeats until its task is aborted.
pub struct SimulatedSensor {
    level: AtomicBool,
    last_change: std::sync::Mutex<Option<std::time::Instant>>,
}

impl SimulatedSensor {
    pub fn spawn(pulse_width: Duration, interval: Duration) -> (Arc<Self>, JoinHandle<()>) {
        let sensor = Arc::new(Self {
            level: AtomicBool::new(false),
            last_change: std::sync::Mutex::new(None),
        });

        let this = Arc::clone(&sensor);
        let handle = tokio::spawn(async move {
            loop {
                this.set_level(true);
                tokio::time::sleep(pulse_width).await;
                this.set_level(false);
                tokio::time::sleep(interval).await;
            }
        });

        (sensor, handle)
    }

    fn set_level(&self, level: bool) {
        self.level.store(level, Ordering::Release);
        if let Ok(mut guard) = self.last_change.lock() {
            *guard = Some(std::time::Instant::now());
        }
    }
}

impl SignalSource for SimulatedSensor {
    fn level(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }

    fn last_change(&self) -> Option<std::time::Instant> {
        self.last_change.lock().ok().and_then(|guard| *guard)
    }
}

/// Spawn the poll loop feeding sensor samples into the controller.
pub fn spawn_sensor_loop(
    source: Arc<dyn SignalSource>,
    controller: Arc<AutoCaptureController>,
    poll_period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(poll_period_ms = poll_period.as_millis() as u64, "sensor loop started");
        let mut ticker = tokio::time::interval(poll_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let now_ms = controller.now_ms();
            // Entry effects run on their own task; the loop keeps sampling
            let _ = controller.observe(source.level(), now_ms).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_sensor_toggles_between_levels() {
        let (sensor, handle) =
            SimulatedSensor::spawn(Duration::from_millis(10), Duration::from_millis(10));

        let mut saw_high = false;
        let mut saw_low = false;
        for _ in 0..40 {
            match sensor.level() {
                true => saw_high = true,
                false => saw_low = true,
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        handle.abort();

        assert!(saw_high);
        assert!(saw_low);
        assert!(sensor.last_change().is_some());
    }
}
