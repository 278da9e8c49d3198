//! Audio playout scheduling
//!
//! Decoded audio buffers are laid back to back on the playout clock. When the
//! scheduled position runs too far ahead of the clock (because buffers arrived
//! in a burst, or the clock stalled), the schedule is pulled back to just ahead
//! of the clock instead of letting latency grow without bound.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::types::DecodedAudio;

/// Time source audio is scheduled against
pub trait AudioClock: Send + Sync {
    /// Current playout time
    fn current_time(&self) -> Duration;

    /// Release the clock
    fn close(&self) {}
}

/// Clock that measures time elapsed since it was created
#[derive(Debug)]
pub struct MonotonicAudioClock {
    origin: Instant,
    closed: AtomicBool,
}

impl MonotonicAudioClock {
    /// Start a clock at zero
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for MonotonicAudioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for MonotonicAudioClock {
    fn current_time(&self) -> Duration {
        self.origin.elapsed()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Clock moved by hand, for tests and offline rendering
#[derive(Debug, Default)]
pub struct ManualAudioClock {
    now: Mutex<Duration>,
    closed: AtomicBool,
}

impl ManualAudioClock {
    /// Start a clock at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to `now`
    pub fn set(&self, now: Duration) {
        *self.now.lock() = now;
    }

    /// Move forward by `step`
    pub fn advance(&self, step: Duration) {
        *self.now.lock() += step;
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl AudioClock for ManualAudioClock {
    fn current_time(&self) -> Duration {
        *self.now.lock()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// A decoded audio buffer with its playout start time
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledAudio {
    /// Clock time at which playback of the buffer starts
    pub start_at: Duration,
    /// The buffer
    pub audio: DecodedAudio,
}

/// Assigns start times to consecutive audio buffers
#[derive(Debug, Clone)]
pub struct AudioScheduler {
    next_start_time: Duration,
    max_drift: Duration,
    resync_offset: Duration,
    resyncs: u64,
}

impl AudioScheduler {
    /// Create a scheduler with the given drift bound and resync lead
    pub fn new(max_drift: Duration, resync_offset: Duration) -> Self {
        Self {
            next_start_time: Duration::ZERO,
            max_drift,
            resync_offset,
            resyncs: 0,
        }
    }

    /// Start time for a buffer of `duration` arriving when the clock reads `now`
    pub fn schedule(&mut self, now: Duration, duration: Duration) -> Duration {
        let mut start = self.next_start_time.max(now);
        let drift = start - now;
        if drift > self.max_drift {
            debug!(
                "Audio drift {:?} exceeds {:?}, resyncing",
                drift, self.max_drift
            );
            start = now + self.resync_offset;
            self.resyncs += 1;
        }
        self.next_start_time = start + duration;
        start
    }

    /// Where the next buffer would start if the clock were behind it
    pub fn next_start_time(&self) -> Duration {
        self.next_start_time
    }

    /// Number of times the schedule has been pulled back
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }

    /// Forget the current schedule
    pub fn reset(&mut self) {
        self.next_start_time = Duration::ZERO;
        self.resyncs = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn scheduler() -> AudioScheduler {
        AudioScheduler::new(100 * MS, 20 * MS)
    }

    #[test]
    fn test_back_to_back_when_on_time() {
        let mut sched = scheduler();
        assert_eq!(sched.schedule(Duration::ZERO, 20 * MS), Duration::ZERO);
        assert_eq!(sched.schedule(5 * MS, 20 * MS), 20 * MS);
        assert_eq!(sched.schedule(30 * MS, 20 * MS), 40 * MS);
        assert_eq!(sched.next_start_time(), 60 * MS);
    }

    #[test]
    fn test_late_buffer_starts_now() {
        let mut sched = scheduler();
        sched.schedule(Duration::ZERO, 20 * MS);
        assert_eq!(sched.schedule(500 * MS, 20 * MS), 500 * MS);
        assert_eq!(sched.resync_count(), 0);
    }

    #[test]
    fn test_drift_boundary() {
        let mut sched = scheduler();
        sched.schedule(Duration::ZERO, 100 * MS);
        // exactly max_drift ahead is still allowed
        assert_eq!(sched.schedule(Duration::ZERO, 20 * MS), 100 * MS);
        // now 120ms ahead
        assert_eq!(sched.schedule(Duration::ZERO, 20 * MS), 20 * MS);
        assert_eq!(sched.resync_count(), 1);
        assert_eq!(sched.next_start_time(), 40 * MS);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualAudioClock::new();
        clock.set(10 * MS);
        clock.advance(5 * MS);
        assert_eq!(clock.current_time(), 15 * MS);
        clock.close();
        assert!(clock.is_closed());
    }

    #[tokio::test]
    async fn test_monotonic_clock_advances() {
        let clock = MonotonicAudioClock::new();
        let before = clock.current_time();
        tokio::time::sleep(5 * MS).await;
        assert!(clock.current_time() >= before + 5 * MS);
    }
}
