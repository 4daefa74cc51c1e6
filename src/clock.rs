//! Monotonic time source shared by the bus, the calibrator and every agent.
//! All engine timestamps are offsets from the clock's origin, so tests can
//! drive irregular frame and tick spacing deterministically.

use std::time::Duration;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Injectable clock. `now()` must be monotonic.
pub trait Clock: Send + Sync {
    /// Elapsed time since the clock's origin.
    fn now(&self) -> Duration;
}

/// Wall clock backed by `tokio::time::Instant`.
/// Follows tokio's paused time inside `start_paused` tests.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for deterministic tests and offline replays.
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Jump to an absolute offset. Ignored if it would move time backwards.
    pub fn set(&self, at: Duration) {
        let mut now = self.now.lock();
        if at > *now {
            *now = at;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

/// Seconds between two clock readings, zero if `later` is not after `earlier`.
#[inline]
pub fn secs_between(earlier: Duration, later: Duration) -> f64 {
    later.saturating_sub(earlier).as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_never_runs_backwards() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_millis(500));
        clock.set(Duration::from_millis(200));
        assert_eq!(clock.now(), Duration::from_millis(500));
        clock.set(Duration::from_secs(2));
        assert_eq!(clock.now(), Duration::from_secs(2));
    }

    #[test]
    fn secs_between_saturates() {
        let a = Duration::from_millis(1500);
        let b = Duration::from_millis(1000);
        assert_eq!(secs_between(a, b), 0.0);
        assert!((secs_between(b, a) - 0.5).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn system_clock_follows_paused_tokio_time() {
        let clock = SystemClock::new();
        tokio::time::advance(Duration::from_millis(750)).await;
        assert_eq!(clock.now(), Duration::from_millis(750));
    }
}
