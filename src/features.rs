//! Feature frames as delivered by the external extractor, plus the two
//! spectrum helpers the engine needs: total amplitude and peak bin.

use std::time::Duration;

use serde::Serialize;

/// One throttled measurement of the microphone pipeline.
/// Scalar descriptors are optional; a missing value skips whatever update
/// depends on it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureFrame {
    /// Capture time on the source's clock. Informational only.
    pub timestamp: Duration,
    /// Log-scale loudness of the raw input.
    pub amplitude_direct: f64,
    /// Log-scale loudness after matching against the agent's own call.
    pub amplitude_convolved: f64,
    pub loudness_total: Option<f64>,
    pub spectral_rolloff: Option<f64>,
    pub spectral_centroid: Option<f64>,
    pub spectral_crest: Option<f64>,
    /// Match spectrum, one log magnitude per frequency bin.
    pub convolution_spectrum: Vec<f32>,
    /// Raw input spectrum. Diagnostics only.
    pub direct_spectrum: Vec<f32>,
}

impl FeatureFrame {
    /// Build a frame from its two spectra, deriving both amplitudes.
    pub fn from_spectra(
        timestamp: Duration,
        convolution_spectrum: Vec<f32>,
        direct_spectrum: Vec<f32>,
    ) -> Self {
        Self {
            timestamp,
            amplitude_direct: spectrum_amplitude(&direct_spectrum),
            amplitude_convolved: spectrum_amplitude(&convolution_spectrum),
            convolution_spectrum,
            direct_spectrum,
            ..Self::default()
        }
    }

    pub fn with_loudness(mut self, loudness: f64) -> Self {
        self.loudness_total = Some(loudness);
        self
    }

    pub fn with_descriptors(mut self, rolloff: f64, centroid: f64, crest: f64) -> Self {
        self.spectral_rolloff = Some(rolloff);
        self.spectral_centroid = Some(centroid);
        self.spectral_crest = Some(crest);
        self
    }
}

/// Total amplitude of a log-scale spectrum: `log10(sum(10^bin))`.
/// An empty spectrum has amplitude `-inf`.
pub fn spectrum_amplitude(spectrum: &[f32]) -> f64 {
    let sum: f64 = spectrum.iter().map(|&bin| 10f64.powf(bin as f64)).sum();
    sum.log10()
}

/// Index and value of the loudest bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakBin {
    pub index: usize,
    pub value: f32,
}

/// Loudest bin of `spectrum`; the first maximum wins.
/// An empty spectrum (or one of NaN/-inf only) reports bin 0 at `-inf`.
pub fn peak_bin(spectrum: &[f32]) -> PeakBin {
    spectrum.iter().enumerate().fold(
        PeakBin {
            index: 0,
            value: f32::NEG_INFINITY,
        },
        |peak, (index, &value)| {
            if value > peak.value {
                PeakBin { index, value }
            } else {
                peak
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amplitude_of_single_bin_is_the_bin() {
        assert!((spectrum_amplitude(&[-3.0]) - -3.0).abs() < 1e-9);
    }

    #[test]
    fn amplitude_of_equal_bins_adds_log10_n() {
        let amp = spectrum_amplitude(&[-2.0; 10]);
        assert!((amp - (-2.0 + 1.0)).abs() < 1e-9, "got {amp}");
    }

    #[test]
    fn amplitude_of_empty_spectrum_is_neg_infinity() {
        assert_eq!(spectrum_amplitude(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn peak_bin_prefers_first_maximum() {
        let peak = peak_bin(&[-80.0, -20.0, -50.0, -20.0]);
        assert_eq!(peak.index, 1);
        assert_eq!(peak.value, -20.0);
    }

    #[test]
    fn peak_bin_of_empty_spectrum() {
        let peak = peak_bin(&[]);
        assert_eq!(peak.index, 0);
        assert_eq!(peak.value, f32::NEG_INFINITY);
    }

    #[test]
    fn from_spectra_derives_amplitudes() {
        let frame = FeatureFrame::from_spectra(Duration::ZERO, vec![-1.0, -1.0], vec![-4.0])
            .with_loudness(12.0);
        assert!((frame.amplitude_convolved - (-1.0 + 2f64.log10())).abs() < 1e-9);
        assert!((frame.amplitude_direct - -4.0).abs() < 1e-9);
        assert_eq!(frame.loudness_total, Some(12.0));
        assert_eq!(frame.spectral_crest, None);
    }
}
