//! Vocalization scheduling.
//! A fixed-interval timer per agent runs a Bernoulli trial whose probability
//! is a *rate*: it is scaled by the real time elapsed since the previous
//! attempt, so throttled or late ticks do not change how often a frog chirps.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::agent::{Agent, ChirpOutcome};

const EAGERNESS_BASE_FACTOR: f64 = 0.01;

/// Eagerness mapped onto a square-root curve with a small floor.
#[inline]
pub fn eagerness_factor(eagerness: f64) -> f64 {
    EAGERNESS_BASE_FACTOR + eagerness.max(0.0).sqrt() * (1.0 - EAGERNESS_BASE_FACTOR)
}

/// Shyness mapped onto `1 - s^(2/3)`: even mild shyness suppresses a lot.
#[inline]
pub fn shyness_factor(shyness: f64) -> f64 {
    1.0 - shyness.max(0.0).powf(2.0 / 3.0)
}

/// Chirp probability per probability interval. Full eagerness always chirps.
pub fn chirp_probability(shyness: f64, eagerness: f64) -> f64 {
    if eagerness == 1.0 {
        1.0
    } else {
        eagerness_factor(eagerness) * shyness_factor(shyness)
    }
}

/// Scale a per-interval probability to the time actually elapsed.
#[inline]
pub fn normalize_probability(base: f64, elapsed_secs: f64, probability_interval_secs: f64) -> f64 {
    base * elapsed_secs / probability_interval_secs
}

/// The trial itself: chirp iff `probability >= draw`, with `draw` uniform in `[0, 1)`.
#[inline]
pub fn should_chirp(probability: f64, draw: f64) -> bool {
    probability >= draw
}

/// Drive `agent.try_chirp()` every `period` until the agent falls asleep.
/// Must be called from within a tokio runtime.
pub fn spawn_chirp_timer(agent: Arc<Agent>, period: Duration) -> JoinHandle<()> {
    let sleep_token = agent.sleep_token();
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(agent_id = agent.id(), period_ms = period.as_millis() as u64, "chirp timer started");

        loop {
            tokio::select! {
                _ = sleep_token.asleep() => break,
                _ = ticker.tick() => {
                    if let ChirpOutcome::Asleep = agent.try_chirp() {
                        break;
                    }
                }
            }
        }

        debug!(agent_id = agent.id(), "chirp timer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_eagerness_is_certain_regardless_of_shyness() {
        for shyness in [0.0, 0.3, 0.999, 1.0] {
            assert_eq!(chirp_probability(shyness, 1.0), 1.0);
        }
    }

    #[test]
    fn full_shyness_silences_partial_eagerness() {
        assert_eq!(chirp_probability(1.0, 0.0), 0.0);
        assert_eq!(chirp_probability(1.0, 0.99), 0.0);
    }

    #[test]
    fn factors_follow_their_curves() {
        assert!((eagerness_factor(0.0) - 0.01).abs() < 1e-12);
        assert!((eagerness_factor(0.25) - (0.01 + 0.5 * 0.99)).abs() < 1e-12);
        assert!((eagerness_factor(1.0) - 1.0).abs() < 1e-12);
        assert!((shyness_factor(0.0) - 1.0).abs() < 1e-12);
        assert!((shyness_factor(0.125) - 0.75).abs() < 1e-12);
        let p = chirp_probability(0.125, 0.25);
        assert!((p - 0.505 * 0.75).abs() < 1e-12);
    }

    #[test]
    fn probability_scales_with_elapsed_time() {
        let base = chirp_probability(0.0, 0.0); // 0.01 per second
        assert!((normalize_probability(base, 0.25, 1.0) - 0.0025).abs() < 1e-12);
        // A throttled tick four seconds late carries four seconds' worth of chance.
        assert!((normalize_probability(base, 4.0, 1.0) - 0.04).abs() < 1e-12);
        assert_eq!(normalize_probability(base, 0.0, 1.0), 0.0);
    }

    #[test]
    fn trial_compares_against_draw() {
        assert!(should_chirp(0.3, 0.3));
        assert!(should_chirp(1.0, 0.999_999));
        assert!(!should_chirp(0.299, 0.3));
        assert!(!should_chirp(0.0, 0.0001));
    }
}
