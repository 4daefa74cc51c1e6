//! Shyness and eagerness rate equations.
//! Both drives integrate over the real time between frames, so any frame
//! spacing yields the same trajectory for a constant input.

use crate::config::ChorusConfig;

#[derive(Debug, Clone, Copy)]
pub struct DynamicsConfig {
    pub loudness_threshold: f64,
    pub quiet_margin: f64,
    pub rate_of_losing_shyness: f64,
    pub shyness_gain: f64,
    pub loudness_reference: f64,
    pub base_rate_of_change: f64,
    pub eagerness_gain: f64,
}

impl From<&ChorusConfig> for DynamicsConfig {
    fn from(config: &ChorusConfig) -> Self {
        Self {
            loudness_threshold: config.loudness_threshold,
            quiet_margin: config.quiet_margin,
            rate_of_losing_shyness: config.rate_of_losing_shyness,
            shyness_gain: config.shyness_gain,
            loudness_reference: config.loudness_reference,
            base_rate_of_change: config.base_rate_of_change,
            eagerness_gain: config.eagerness_gain,
        }
    }
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self::from(&ChorusConfig::default())
    }
}

impl DynamicsConfig {
    /// Eagerness gained per second while a call is heard.
    #[inline]
    pub fn eagerness_velocity(&self) -> f64 {
        self.base_rate_of_change * self.eagerness_gain
    }

    /// Loudness below this counts as a quiet room for shyness.
    #[inline]
    pub fn quiet_ceiling(&self) -> f64 {
        self.loudness_threshold + self.quiet_margin
    }
}

/// Shyness after `dt_secs` at `loudness`.
/// Quiet rooms wear shyness off at a fixed rate; loud rooms build it in
/// proportion to loudness. Missing loudness leaves it unchanged.
pub fn next_shyness(shyness: f64, loudness: Option<f64>, dt_secs: f64, config: &DynamicsConfig) -> f64 {
    let Some(loudness) = loudness else {
        return shyness.clamp(0.0, 1.0);
    };
    let dt = dt_secs.max(0.0);

    let next = if loudness < config.quiet_ceiling() {
        shyness - config.rate_of_losing_shyness * dt
    } else {
        let velocity = config.shyness_gain * (loudness / config.loudness_reference);
        shyness + velocity * dt
    };

    if next.is_nan() {
        return shyness.clamp(0.0, 1.0);
    }
    next.clamp(0.0, 1.0)
}

/// Eagerness after `dt_secs`. Only hearing another call raises it; it never
/// decays on its own (a successful chirp resets it instead).
pub fn next_eagerness(eagerness: f64, call_detected: bool, dt_secs: f64, config: &DynamicsConfig) -> f64 {
    let next = if call_detected {
        eagerness + config.eagerness_velocity() * dt_secs.max(0.0)
    } else {
        eagerness
    };
    next.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DynamicsConfig {
        DynamicsConfig {
            rate_of_losing_shyness: 0.05,
            ..DynamicsConfig::default()
        }
    }

    #[test]
    fn quiet_room_wears_shyness_off_linearly() {
        let config = config();
        // 3 seconds of quiet delivered as 30 frames of 100ms
        let mut shyness = 1.0;
        for _ in 0..30 {
            shyness = next_shyness(shyness, Some(10.0), 0.1, &config);
        }
        assert!((shyness - 0.85).abs() < 1e-9, "got {shyness}");
    }

    #[test]
    fn frame_spacing_does_not_change_the_result() {
        let config = config();
        let mut fine = 0.9;
        for _ in 0..40 {
            fine = next_shyness(fine, Some(12.0), 0.05, &config);
        }
        let coarse = next_shyness(0.9, Some(12.0), 2.0, &config);
        assert!((fine - coarse).abs() < 1e-9);
    }

    #[test]
    fn loud_room_builds_shyness_with_loudness() {
        let config = config();
        // 0.8 * (40 / 40) per second
        let s = next_shyness(0.2, Some(40.0), 0.5, &config);
        assert!((s - 0.6).abs() < 1e-9, "got {s}");
        // at the quiet ceiling itself the room counts as loud
        let at_ceiling = next_shyness(0.0, Some(33.0), 1.0, &config);
        assert!((at_ceiling - 0.8 * 33.0 / 40.0).abs() < 1e-9);
    }

    #[test]
    fn shyness_is_clamped() {
        let config = config();
        assert_eq!(next_shyness(0.01, Some(0.0), 10.0, &config), 0.0);
        assert_eq!(next_shyness(0.99, Some(90.0), 10.0, &config), 1.0);
    }

    #[test]
    fn missing_loudness_leaves_shyness() {
        assert_eq!(next_shyness(0.4, None, 5.0, &config()), 0.4);
    }

    #[test]
    fn eagerness_rises_only_on_detection() {
        let config = config();
        // 0.2 * 5 = 1.0 per second
        let e = next_eagerness(0.1, true, 0.25, &config);
        assert!((e - 0.35).abs() < 1e-9);
        assert_eq!(next_eagerness(0.35, false, 100.0, &config), 0.35);
        assert_eq!(next_eagerness(0.9, true, 1.0, &config), 1.0);
    }

    #[test]
    fn drives_stay_in_unit_interval_for_arbitrary_inputs() {
        let config = config();
        let mut shyness = 1.0;
        let mut eagerness = 0.0;
        let loudness = [0.0, 55.0, 31.0, 33.5, 120.0, -5.0, 28.0];
        let dts = [0.0, 0.08, 1.7, 0.2, 30.0, 0.12, 3.3];
        for step in 0..500 {
            let l = loudness[step % loudness.len()];
            let dt = dts[step % dts.len()];
            shyness = next_shyness(shyness, Some(l), dt, &config);
            eagerness = next_eagerness(eagerness, step % 3 == 0, dt, &config);
            assert!((0.0..=1.0).contains(&shyness), "shyness {shyness} at step {step}");
            assert!((0.0..=1.0).contains(&eagerness), "eagerness {eagerness} at step {step}");
        }
    }
}
