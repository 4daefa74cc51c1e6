//! Call detection: does the live frame look like another frog's call?
//!
//! Peak proximity and loudness excess establish that a sound matching our own
//! call is present above the ambient baseline. Crest, centroid and rolloff
//! reject broadband or off-timbre noise that happens to peak near our
//! frequency. All five must hold.

use serde::Serialize;

use crate::calibration::BaselineProfile;
use crate::config::ChorusConfig;
use crate::features::{peak_bin, FeatureFrame};

/// Thresholds used by the classifier, lifted out of `ChorusConfig`.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierConfig {
    pub peak_bin_tolerance: usize,
    pub amplitude_excess_threshold: f64,
    pub crest_threshold: f64,
    pub centroid_tolerance: f64,
    pub rolloff_tolerance: f64,
}

impl From<&ChorusConfig> for ClassifierConfig {
    fn from(config: &ChorusConfig) -> Self {
        Self {
            peak_bin_tolerance: config.peak_bin_tolerance,
            amplitude_excess_threshold: config.amplitude_excess_threshold,
            crest_threshold: config.crest_threshold,
            centroid_tolerance: config.centroid_tolerance,
            rolloff_tolerance: config.rolloff_tolerance,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::from(&ChorusConfig::default())
    }
}

/// Per-criterion outcome for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub peaks_are_similar: bool,
    pub convolution_is_louder: bool,
    pub has_sharp_crest: bool,
    pub centroid_is_similar: bool,
    pub rolloff_is_similar: bool,
}

impl Detection {
    /// Another frog's call is present.
    #[inline]
    pub fn is_call(&self) -> bool {
        self.peaks_are_similar
            && self.convolution_is_louder
            && self.has_sharp_crest
            && self.centroid_is_similar
            && self.rolloff_is_similar
    }
}

/// Evaluate every criterion. Without a baseline nothing can match.
/// A missing descriptor fails its criterion.
pub fn evaluate(
    frame: &FeatureFrame,
    baseline: Option<&BaselineProfile>,
    config: &ClassifierConfig,
) -> Detection {
    let Some(baseline) = baseline else {
        return Detection::default();
    };

    let live_peak = peak_bin(&frame.convolution_spectrum).index;
    let ambient_peak = peak_bin(&baseline.convolution_spectrum).index;

    Detection {
        peaks_are_similar: live_peak.abs_diff(ambient_peak) < config.peak_bin_tolerance,
        convolution_is_louder: frame.amplitude_convolved - baseline.amplitude_threshold
            > config.amplitude_excess_threshold,
        has_sharp_crest: frame
            .spectral_crest
            .is_some_and(|crest| crest > config.crest_threshold),
        centroid_is_similar: frame
            .spectral_centroid
            .is_some_and(|c| (c - baseline.mean_centroid).abs() < config.centroid_tolerance),
        rolloff_is_similar: frame
            .spectral_rolloff
            .is_some_and(|r| (r - baseline.mean_rolloff).abs() < config.rolloff_tolerance),
    }
}

/// `true` iff another frog's call is detected in `frame`.
#[inline]
pub fn detect(frame: &FeatureFrame, baseline: Option<&BaselineProfile>, config: &ClassifierConfig) -> bool {
    evaluate(frame, baseline, config).is_call()
}
