use crate::config::{CycleConfig, Polarity};
use tracing::{debug, trace};

/// How long the "pulse ignored" observability flag stays raised
const IGNORED_DISPLAY_DURATION_MS: u64 = 500;

/// A discrete event produced from a qualifying edge of the detection signal.
///
/// Ephemeral: produced by [`EdgeDebouncer::observe`], consumed once by the
/// controller, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseEvent {
    /// Monotonic time of the accepted edge, in milliseconds
    pub timestamp_ms: u64,
    /// Edge polarity that produced this event
    pub polarity: Polarity,
    /// Set when the gap since the previous event exceeded the maximum
    /// interval; the controller must fall back to Wait before advancing.
    pub stale: bool,
}

/// Turns a noisy boolean detection signal into discrete pulse events.
///
/// Emits at most one event per qualifying transition (falling or rising per
/// configured polarity), suppressing edges that arrive faster than the
/// minimum interval and flagging events after an over-long silence as stale.
pub struct EdgeDebouncer {
    polarity: Polarity,
    min_interval_ms: u64,
    max_gap_ms: u64,
    /// Previous observed signal; seeded by the first observation
    last_signal: Option<bool>,
    /// Interval anchor: the baseline observation at first, then the time of
    /// each emitted event
    last_event_ms: u64,
    /// "Pulse ignored" flag stays raised until this instant
    ignored_until_ms: u64,
}

impl EdgeDebouncer {
    pub fn new(polarity: Polarity, cycle: &CycleConfig) -> Self {
        Self {
            polarity,
            min_interval_ms: cycle.min_pulse_interval_ms,
            max_gap_ms: cycle.max_pulse_gap_ms,
            last_signal: None,
            last_event_ms: 0,
            ignored_until_ms: 0,
        }
    }

    /// Feed one observation of the detection signal.
    ///
    /// Returns a [`PulseEvent`] only when a qualifying edge occurred and at
    /// least the minimum interval has elapsed since the last emitted event
    /// (or since the baseline observation, before the first emission).
    pub fn observe(&mut self, signal: bool, now_ms: u64) -> Option<PulseEvent> {
        let previous = match self.last_signal.replace(signal) {
            Some(p) => p,
            None => {
                // First observation seeds the baseline and anchors the
                // interval; an edge hard on its heels is treated as noise.
                self.last_event_ms = now_ms;
                trace!(signal, "signal baseline seeded");
                return None;
            }
        };

        let qualifying = match self.polarity {
            Polarity::Falling => previous && !signal,
            Polarity::Rising => !previous && signal,
        };
        if !qualifying {
            return None;
        }

        let elapsed = now_ms.saturating_sub(self.last_event_ms);
        if elapsed < self.min_interval_ms {
            self.ignored_until_ms = now_ms + IGNORED_DISPLAY_DURATION_MS;
            debug!(
                elapsed_ms = elapsed,
                min_interval_ms = self.min_interval_ms,
                "edge suppressed: faster than minimum interval"
            );
            return None;
        }

        let stale = elapsed > self.max_gap_ms;
        if stale {
            debug!(elapsed_ms = elapsed, "gap exceeded maximum, cycle is stale");
        }

        self.last_event_ms = now_ms;
        Some(PulseEvent {
            timestamp_ms: now_ms,
            polarity: self.polarity,
            stale,
        })
    }

    /// Consume one observation without emitting an event or moving the
    /// interval anchor. Used while a cycle is in flight: the signal is still
    /// tracked so a dropped edge cannot fire late, but the debounce window
    /// stays where the last emitted event put it. Returns whether a
    /// qualifying edge was discarded.
    pub fn track_only(&mut self, signal: bool, now_ms: u64) -> bool {
        let previous = match self.last_signal.replace(signal) {
            Some(p) => p,
            None => {
                self.last_event_ms = now_ms;
                return false;
            }
        };

        match self.polarity {
            Polarity::Falling => previous && !signal,
            Polarity::Rising => !previous && signal,
        }
    }

    /// Whether the "pulse ignored" observability flag is currently raised.
    pub fn pulse_ignored(&self, now_ms: u64) -> bool {
        now_ms < self.ignored_until_ms
    }

    /// Drop all edge/debounce bookkeeping. Used on controller deactivation.
    pub fn reset(&mut self) {
        self.last_signal = None;
        self.last_event_ms = 0;
        self.ignored_until_ms = 0;
    }
}
