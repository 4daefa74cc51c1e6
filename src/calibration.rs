//! Ambient calibration: Unsettled → AccumulatingQuiet → Settled.
//! Captures a baseline of the match spectrum once the room has stayed quiet for
//! a full calibration window. A loud frame mid-window cancels the window and
//! discards the collected rolloff/centroid samples.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ChorusConfig, RecalibrationPolicy};
use crate::features::FeatureFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CalibrationState {
    Unsettled,
    AccumulatingQuiet,
    Settled,
}

impl std::fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationState::Unsettled => write!(f, "Unsettled"),
            CalibrationState::AccumulatingQuiet => write!(f, "AccumulatingQuiet"),
            CalibrationState::Settled => write!(f, "Settled"),
        }
    }
}

impl CalibrationState {
    /// Returns whether moving from `self` to `next` is a legal calibration step.
    pub fn can_transition_to(self, next: CalibrationState) -> bool {
        matches!(
            (self, next),
            (CalibrationState::Unsettled, CalibrationState::AccumulatingQuiet)
                | (CalibrationState::AccumulatingQuiet, CalibrationState::Unsettled) // loud interruption
                | (CalibrationState::AccumulatingQuiet, CalibrationState::Settled)
                | (CalibrationState::Settled, CalibrationState::Unsettled) // reset / recalibration
        )
    }
}

/// Spectral snapshot of the quiet room. Immutable once captured.
#[derive(Debug, Clone, Serialize)]
pub struct BaselineProfile {
    pub convolution_spectrum: Vec<f32>,
    /// Convolved amplitude at capture time.
    pub amplitude_threshold: f64,
    pub mean_rolloff: f64,
    pub mean_centroid: f64,
    /// Calibration epoch this profile belongs to.
    pub epoch: u64,
    pub captured_at: Duration,
}

fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Match spectrum of the latest quiet frame inside the open window.
struct QuietSnapshot {
    convolution_spectrum: Vec<f32>,
    amplitude_convolved: f64,
}

/// Pipeline-wide calibrator. Owned by the frame bus; agents only ever see
/// the resulting `Arc<BaselineProfile>`.
pub struct AmbientCalibrator {
    loudness_threshold: f64,
    window: Duration,
    recalibration: RecalibrationPolicy,
    /// Frames before this offset may still carry the agent's own playback tail.
    settle_delay: Duration,
    started_at: Duration,

    state: CalibrationState,
    window_started: Option<Duration>,
    rolloffs: Vec<f64>,
    centroids: Vec<f64>,
    last_quiet: Option<QuietSnapshot>,
    profile: Option<Arc<BaselineProfile>>,
    settled_at: Option<Duration>,
    epoch: u64,

    state_tx: watch::Sender<CalibrationState>,
    state_rx: watch::Receiver<CalibrationState>,
}

impl AmbientCalibrator {
    pub fn new(config: &ChorusConfig, settle_delay: Duration, started_at: Duration) -> Self {
        let (state_tx, state_rx) = watch::channel(CalibrationState::Unsettled);
        Self {
            loudness_threshold: config.loudness_threshold,
            window: config.calibration_window(),
            recalibration: config.recalibration,
            settle_delay,
            started_at,
            state: CalibrationState::Unsettled,
            window_started: None,
            rolloffs: Vec::new(),
            centroids: Vec::new(),
            last_quiet: None,
            profile: None,
            settled_at: None,
            epoch: 0,
            state_tx,
            state_rx,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// Active baseline, if one has been captured.
    pub fn profile(&self) -> Option<Arc<BaselineProfile>> {
        self.profile.clone()
    }

    /// The classifier's notion of "quiet room": a baseline is in force.
    pub fn environment_is_quiet(&self) -> bool {
        self.profile.is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Subscribe to calibration state changes.
    pub fn subscribe(&self) -> watch::Receiver<CalibrationState> {
        self.state_rx.clone()
    }

    /// Number of (rolloff, centroid) samples collected in the open window.
    pub fn pending_samples(&self) -> (usize, usize) {
        (self.rolloffs.len(), self.centroids.len())
    }

    /// Feed one frame observed at `now`. Returns the new profile if a
    /// calibration window completed.
    ///
    /// A window whose deadline passed before this frame arrived settles from
    /// the quiet frames it already holds; this frame cannot interrupt it.
    pub fn observe(&mut self, frame: &FeatureFrame, now: Duration) -> Option<Arc<BaselineProfile>> {
        if self.state == CalibrationState::Settled {
            if !self.recalibration_due(now) {
                return None;
            }
            info!(epoch = self.epoch, "periodic recalibration started");
            self.transition(CalibrationState::Unsettled);
        }

        if now.saturating_sub(self.started_at) < self.settle_delay {
            return None;
        }

        if let Some(deadline) = self.window_deadline() {
            if now > deadline {
                if let Some(profile) = self.settle(deadline) {
                    return Some(profile);
                }
            }
        }

        let loudness = match frame.loudness_total {
            Some(l) if l > self.loudness_threshold => {
                self.interrupt(l);
                return None;
            }
            Some(l) => l,
            None => return None,
        };

        let window_started = match self.window_started {
            Some(at) => at,
            None => {
                self.open_window(now);
                debug!(loudness, "quiet detected, calibration window opened");
                now
            }
        };

        if let Some(rolloff) = frame.spectral_rolloff {
            self.rolloffs.push(rolloff);
        }
        if let Some(centroid) = frame.spectral_centroid {
            self.centroids.push(centroid);
        }
        self.last_quiet = Some(QuietSnapshot {
            convolution_spectrum: frame.convolution_spectrum.clone(),
            amplitude_convolved: frame.amplitude_convolved,
        });

        if now.saturating_sub(window_started) < self.window {
            return None;
        }
        self.settle(now)
    }

    /// Discard the active profile and start over in a new epoch.
    pub fn reset(&mut self) {
        self.window_started = None;
        self.clear_window();
        self.profile = None;
        self.settled_at = None;
        self.epoch += 1;
        if self.state != CalibrationState::Unsettled {
            self.transition(CalibrationState::Unsettled);
        }
        info!(epoch = self.epoch, "baseline reset");
    }

    fn recalibration_due(&self, now: Duration) -> bool {
        match (self.recalibration, self.settled_at) {
            (RecalibrationPolicy::Periodic { interval_ms }, Some(at)) => {
                now.saturating_sub(at) >= Duration::from_millis(interval_ms)
            }
            _ => false,
        }
    }

    fn window_deadline(&self) -> Option<Duration> {
        self.window_started.map(|at| at + self.window)
    }

    fn clear_window(&mut self) {
        self.rolloffs.clear();
        self.centroids.clear();
        self.last_quiet = None;
    }

    fn open_window(&mut self, now: Duration) {
        self.window_started = Some(now);
        self.clear_window();
        self.transition(CalibrationState::AccumulatingQuiet);
    }

    fn interrupt(&mut self, loudness: f64) {
        if self.window_started.take().is_some() {
            debug!(
                loudness,
                discarded = self.rolloffs.len().max(self.centroids.len()),
                "calibration window interrupted"
            );
        }
        self.clear_window();
        if self.state == CalibrationState::AccumulatingQuiet {
            self.transition(CalibrationState::Unsettled);
        }
    }

    /// Close the open window at `at` (its deadline, or the frame that reached it).
    fn settle(&mut self, at: Duration) -> Option<Arc<BaselineProfile>> {
        let (Some(mean_rolloff), Some(mean_centroid), Some(snapshot)) =
            (mean(&self.rolloffs), mean(&self.centroids), self.last_quiet.take())
        else {
            // Quiet, but no descriptors arrived: not a usable baseline yet.
            warn!(
                rolloffs = self.rolloffs.len(),
                centroids = self.centroids.len(),
                "calibration window elapsed without descriptor samples, reopening"
            );
            self.window_started = Some(at);
            self.clear_window();
            return None;
        };

        if self.profile.is_some() {
            self.epoch += 1;
        }
        let profile = Arc::new(BaselineProfile {
            convolution_spectrum: snapshot.convolution_spectrum,
            amplitude_threshold: snapshot.amplitude_convolved,
            mean_rolloff,
            mean_centroid,
            epoch: self.epoch,
            captured_at: at,
        });

        self.profile = Some(Arc::clone(&profile));
        self.settled_at = Some(at);
        self.window_started = None;
        self.clear_window();
        self.transition(CalibrationState::Settled);

        info!(
            epoch = profile.epoch,
            amplitude_threshold = profile.amplitude_threshold,
            mean_rolloff,
            mean_centroid,
            "baseline captured"
        );
        Some(profile)
    }

    fn transition(&mut self, next: CalibrationState) {
        let current = self.state;
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "invalid calibration transition");
            return;
        }
        self.state = next;
        let _ = self.state_tx.send(next);
        debug!(from = %current, to = %next, "calibration_transition");
    }
}
