//! Chorus configuration: every threshold and rate the engine uses, passed
//! explicitly at construction. Loaded from camelCase JSON; any field left out
//! keeps its default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Whether the ambient baseline is ever re-measured after the first settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum RecalibrationPolicy {
    /// The first profile stays active until an explicit reset.
    Never,
    /// After `interval_ms` in `Settled`, accumulate a fresh window while the
    /// current profile stays active; a new profile replaces it on settle.
    #[serde(rename_all = "camelCase")]
    Periodic { interval_ms: u64 },
}

impl Default for RecalibrationPolicy {
    fn default() -> Self {
        RecalibrationPolicy::Never
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChorusConfig {
    /// Perceptual loudness above which the room is not quiet (Meyda units).
    pub loudness_threshold: f64,
    /// Uninterrupted quiet needed before a baseline is captured.
    pub calibration_window_ms: u64,
    /// Shyness lost per second of quiet.
    pub rate_of_losing_shyness: f64,
    pub chirp_attempt_interval_ms: u64,
    /// Minimum spacing between frames handed to agents.
    pub sampling_interval_ms: u64,

    // Classifier
    pub rolloff_tolerance: f64,
    pub centroid_tolerance: f64,
    pub crest_threshold: f64,
    pub peak_bin_tolerance: usize,
    pub amplitude_excess_threshold: f64,

    // Dynamics
    /// Loudness below `loudness_threshold + quiet_margin` counts as quiet for shyness.
    pub quiet_margin: f64,
    pub shyness_gain: f64,
    pub loudness_reference: f64,
    pub base_rate_of_change: f64,
    pub eagerness_gain: f64,

    // Scheduler
    pub probability_interval_secs: f64,
    /// Suspension after a chirp, in multiples of the call sample duration.
    pub suspension_factor: f64,
    pub detune_range_cents: f64,

    pub recalibration: RecalibrationPolicy,
}

impl Default for ChorusConfig {
    fn default() -> Self {
        Self {
            loudness_threshold: 28.0,
            calibration_window_ms: 2500,
            rate_of_losing_shyness: 0.08,
            chirp_attempt_interval_ms: 250,
            sampling_interval_ms: 120,
            rolloff_tolerance: 600.0,
            centroid_tolerance: 1.0,
            crest_threshold: 10.0,
            peak_bin_tolerance: 4,
            amplitude_excess_threshold: 20.0,
            quiet_margin: 5.0,
            shyness_gain: 0.8,
            loudness_reference: 40.0,
            base_rate_of_change: 0.2,
            eagerness_gain: 5.0,
            probability_interval_secs: 1.0,
            suspension_factor: 2.0,
            detune_range_cents: 100.0,
            recalibration: RecalibrationPolicy::Never,
        }
    }
}

impl ChorusConfig {
    /// Load and validate a JSON config file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ChorusConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the dynamics or the trial ill-defined.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = [
            ("loudnessThreshold", self.loudness_threshold),
            ("rateOfLosingShyness", self.rate_of_losing_shyness),
            ("rolloffTolerance", self.rolloff_tolerance),
            ("centroidTolerance", self.centroid_tolerance),
            ("crestThreshold", self.crest_threshold),
            ("amplitudeExcessThreshold", self.amplitude_excess_threshold),
            ("quietMargin", self.quiet_margin),
            ("shynessGain", self.shyness_gain),
            ("baseRateOfChange", self.base_rate_of_change),
            ("eagernessGain", self.eagerness_gain),
            ("detuneRangeCents", self.detune_range_cents),
        ];
        for (field, value) in finite {
            if !value.is_finite() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is not finite"),
                });
            }
        }

        let positive = [
            ("loudnessReference", self.loudness_reference),
            ("probabilityIntervalSecs", self.probability_interval_secs),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} must be > 0"),
                });
            }
        }

        if self.rate_of_losing_shyness < 0.0 {
            return Err(ConfigError::Invalid {
                field: "rateOfLosingShyness",
                reason: "must not be negative".into(),
            });
        }
        if !(self.suspension_factor.is_finite() && self.suspension_factor >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "suspensionFactor",
                reason: format!("{} must be >= 0", self.suspension_factor),
            });
        }
        if self.detune_range_cents < 0.0 {
            return Err(ConfigError::Invalid {
                field: "detuneRangeCents",
                reason: "must not be negative".into(),
            });
        }
        if self.chirp_attempt_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "chirpAttemptIntervalMs",
                reason: "must be > 0".into(),
            });
        }
        if let RecalibrationPolicy::Periodic { interval_ms: 0 } = self.recalibration {
            return Err(ConfigError::Invalid {
                field: "recalibration.intervalMs",
                reason: "must be > 0".into(),
            });
        }
        Ok(())
    }

    pub fn calibration_window(&self) -> Duration {
        Duration::from_millis(self.calibration_window_ms)
    }

    pub fn chirp_attempt_interval(&self) -> Duration {
        Duration::from_millis(self.chirp_attempt_interval_ms)
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    /// How long an agent stays silent-to-input after chirping a sample of `sample_duration`.
    pub fn suspension(&self, sample_duration: Duration) -> Duration {
        let nanos = sample_duration.as_nanos() as f64 * self.suspension_factor;
        Duration::from_nanos(nanos.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ChorusConfig = serde_json::from_str(
            r#"{ "loudnessThreshold": 30, "rateOfLosingShyness": 0.05 }"#,
        )
        .unwrap();
        assert_eq!(config.loudness_threshold, 30.0);
        assert_eq!(config.rate_of_losing_shyness, 0.05);
        assert_eq!(config.calibration_window_ms, 2500);
        assert_eq!(config.rolloff_tolerance, 600.0);
        assert_eq!(config.peak_bin_tolerance, 4);
        assert_eq!(config.recalibration, RecalibrationPolicy::Never);
    }

    #[test]
    fn periodic_recalibration_parses() {
        let config: ChorusConfig = serde_json::from_str(
            r#"{ "recalibration": { "mode": "periodic", "intervalMs": 60000 } }"#,
        )
        .unwrap();
        assert_eq!(
            config.recalibration,
            RecalibrationPolicy::Periodic { interval_ms: 60_000 }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_attempt_interval() {
        let config = ChorusConfig {
            chirp_attempt_interval_ms: 0,
            ..ChorusConfig::default()
        };
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "chirpAttemptIntervalMs"),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_non_positive_probability_interval() {
        let config = ChorusConfig {
            probability_interval_secs: 0.0,
            ..ChorusConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn suspension_scales_sample_duration() {
        let config = ChorusConfig::default();
        assert_eq!(
            config.suspension(Duration::from_millis(400)),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let err = ChorusConfig::load_from_file(Path::new("/nonexistent/chorus.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
