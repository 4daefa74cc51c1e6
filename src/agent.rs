//! A single frog: listens to frames, evolves shyness and eagerness, and
//! chirps when its scheduler trial succeeds.
//!
//! Two paths touch the agent state: frame delivery (`handle_frame`) and the
//! chirp timer (`try_chirp`). Both run to completion under one mutex. While a
//! chirp is sounding the agent is suspended: frames are dropped, not queued.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::audio::{CallSample, SoundEmitter};
use crate::bus::FrameListener;
use crate::calibration::BaselineProfile;
use crate::cancellation::SleepToken;
use crate::classifier::{self, ClassifierConfig};
use crate::clock::{secs_between, Clock};
use crate::config::ChorusConfig;
use crate::dynamics::{self, DynamicsConfig};
use crate::features::FeatureFrame;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::scheduler;

pub type AgentId = u64;

/// Mutable per-agent state.
#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    /// Tendency toward silence, in `[0, 1]`.
    pub shyness: f64,
    /// Tendency toward chirping, in `[0, 1]`.
    pub eagerness: f64,
    pub is_vocalizing: bool,
    pub vocalizing_until: Option<Duration>,
    pub last_update: Duration,
    pub last_attempt: Duration,
    pub last_chirp: Option<Duration>,
    pub signal_detected: bool,
    pub chirp_probability: f64,
    pub chirps: u64,
}

impl AgentState {
    fn new(now: Duration) -> Self {
        Self {
            shyness: 1.0,
            eagerness: 0.0,
            is_vocalizing: false,
            vocalizing_until: None,
            last_update: now,
            last_attempt: now,
            last_chirp: None,
            signal_detected: false,
            chirp_probability: 0.0,
            chirps: 0,
        }
    }

    /// End the suspension once its deadline has passed.
    fn refresh(&mut self, now: Duration) {
        if let Some(until) = self.vocalizing_until {
            if now >= until {
                self.is_vocalizing = false;
                self.vocalizing_until = None;
            }
        }
    }
}

/// Result of one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChirpOutcome {
    Chirped { probability: f64 },
    Silent { probability: f64 },
    Asleep,
}

/// Diagnostic view of an agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub shyness: f64,
    pub eagerness: f64,
    pub is_vocalizing: bool,
    pub is_sleeping: bool,
    pub signal_detected: bool,
    pub chirp_probability: f64,
    pub detune_cents: f64,
    pub chirps: u64,
}

pub struct Agent {
    id: AgentId,
    detune_cents: f64,
    sample: CallSample,
    suspension: Duration,
    probability_interval_secs: f64,
    classifier: ClassifierConfig,
    dynamics: DynamicsConfig,

    state: Mutex<AgentState>,
    rng: Mutex<StdRng>,
    clock: Arc<dyn Clock>,
    emitter: Arc<dyn SoundEmitter>,
    sleep: SleepToken,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Agent {
    /// Create an agent. The detune offset is drawn once from `rng` and the
    /// same generator then drives the chirp trials.
    pub fn new(
        id: AgentId,
        config: &ChorusConfig,
        sample: CallSample,
        clock: Arc<dyn Clock>,
        emitter: Arc<dyn SoundEmitter>,
        mut rng: StdRng,
    ) -> Self {
        let range = config.detune_range_cents;
        let detune_cents = if range > 0.0 {
            rng.random_range(-range..=range)
        } else {
            0.0
        };
        let now = clock.now();
        debug!(agent_id = id, detune_cents, "agent created");

        Self {
            id,
            detune_cents,
            suspension: config.suspension(sample.duration),
            sample,
            probability_interval_secs: config.probability_interval_secs,
            classifier: ClassifierConfig::from(config),
            dynamics: DynamicsConfig::from(config),
            state: Mutex::new(AgentState::new(now)),
            rng: Mutex::new(rng),
            clock,
            emitter,
            sleep: SleepToken::standalone(),
            metrics: None,
        }
    }

    /// Tie the agent to an externally owned sleep token (e.g. a chorus child token).
    pub fn with_sleep_token(mut self, sleep: SleepToken) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn detune_cents(&self) -> f64 {
        self.detune_cents
    }

    pub fn sample(&self) -> &CallSample {
        &self.sample
    }

    pub fn sleep_token(&self) -> SleepToken {
        self.sleep.clone()
    }

    pub fn is_asleep(&self) -> bool {
        self.sleep.is_asleep()
    }

    /// Stop listening and chirping for good. Idempotent.
    pub fn sleep(&self) {
        if !self.sleep.is_asleep() {
            info!(agent_id = self.id, "agent asleep");
        }
        self.sleep.sleep();
    }

    /// Copy of the current state, with the suspension brought up to date.
    pub fn state(&self) -> AgentState {
        let mut state = self.state.lock();
        state.refresh(self.clock.now());
        state.clone()
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let state = self.state();
        AgentSnapshot {
            id: self.id,
            shyness: state.shyness,
            eagerness: state.eagerness,
            is_vocalizing: state.is_vocalizing,
            is_sleeping: self.is_asleep(),
            signal_detected: state.signal_detected,
            chirp_probability: state.chirp_probability,
            detune_cents: self.detune_cents,
            chirps: state.chirps,
        }
    }

    /// Integrate one frame into shyness and eagerness.
    /// Returns whether the frame was used (false while asleep or vocalizing).
    pub fn handle_frame(&self, frame: &FeatureFrame, baseline: Option<&BaselineProfile>) -> bool {
        if self.is_asleep() {
            return false;
        }
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.refresh(now);
        if state.is_vocalizing {
            return false;
        }

        let detected = classifier::detect(frame, baseline, &self.classifier);
        let dt = secs_between(state.last_update, now);

        state.signal_detected = detected;
        state.shyness = dynamics::next_shyness(state.shyness, frame.loudness_total, dt, &self.dynamics);
        state.eagerness = dynamics::next_eagerness(state.eagerness, detected, dt, &self.dynamics);
        state.last_update = now;
        drop(state);

        if detected {
            debug!(agent_id = self.id, "call detected");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record(metric_names::AGENT_FRAME_DT_MS, dt * 1000.0);
        }
        true
    }

    /// One scheduler tick: run the time-normalized trial and chirp on success.
    pub fn try_chirp(&self) -> ChirpOutcome {
        if self.is_asleep() {
            return ChirpOutcome::Asleep;
        }
        let now = self.clock.now();
        let draw: f64 = self.rng.lock().random();

        let mut state = self.state.lock();
        state.refresh(now);

        let base = scheduler::chirp_probability(state.shyness, state.eagerness);
        let elapsed = secs_between(state.last_attempt, now);
        let probability = scheduler::normalize_probability(base, elapsed, self.probability_interval_secs);
        state.chirp_probability = probability;
        state.last_attempt = now;

        if !scheduler::should_chirp(probability, draw) {
            drop(state);
            self.record(metric_names::AGENT_ATTEMPT_GAP_MS, elapsed * 1000.0);
            return ChirpOutcome::Silent { probability };
        }

        let previous_chirp = state.last_chirp.replace(now);
        state.is_vocalizing = true;
        state.vocalizing_until = Some(now + self.suspension);
        state.eagerness = 0.0;
        state.chirps += 1;
        let shyness = state.shyness;
        drop(state);

        info!(
            agent_id = self.id,
            probability,
            shyness,
            detune_cents = self.detune_cents,
            "chirp"
        );
        self.emitter.play(&self.sample, self.detune_cents);

        self.record(metric_names::AGENT_ATTEMPT_GAP_MS, elapsed * 1000.0);
        if let Some(previous) = previous_chirp {
            self.record(metric_names::AGENT_CHIRP_GAP_MS, secs_between(previous, now) * 1000.0);
        }
        ChirpOutcome::Chirped { probability }
    }

    fn record(&self, name: &'static str, value: f64) {
        if let Some(metrics) = &self.metrics {
            metrics.record(name, value);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_drives(&self, shyness: f64, eagerness: f64) {
        let mut state = self.state.lock();
        state.shyness = shyness;
        state.eagerness = eagerness;
    }
}

impl FrameListener for Agent {
    fn on_frame(&self, frame: &FeatureFrame, baseline: Option<&BaselineProfile>) {
        self.handle_frame(frame, baseline);
    }
}
