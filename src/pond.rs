//! In-process pond: stands in for microphones, the feature extractor and the
//! air between devices so a chorus can be watched without hardware.
//!
//! Every chirp played through a `PondVoice` becomes a sounding call in the
//! pond for the sample's duration; the frame generator renders whatever is
//! sounding (plus ambient noise and the odd loud disturbance) into feature
//! frames. A generator thread feeds frames over a channel to a delivery
//! thread that publishes them to the chorus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel as cb;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info};

use crate::audio::{CallSample, SoundEmitter};
use crate::chorus::Chorus;
use crate::clock::Clock;
use crate::features::FeatureFrame;

const BINS: usize = 64;
const CALL_BIN: usize = 20;
/// Detune cents per spectrum bin when placing a call's peak.
const CENTS_PER_BIN: f64 = 50.0;

/// Acoustic character of the simulated pond.
#[derive(Debug, Clone)]
pub struct PondProfile {
    pub ambient_loudness: f64,
    pub call_loudness: f64,
    pub disturbance_loudness: f64,
    /// Chance per second of a loud non-frog disturbance starting.
    pub disturbance_rate: f64,
    pub disturbance_length: Duration,
    pub ambient_rolloff: f64,
    pub ambient_centroid: f64,
}

impl Default for PondProfile {
    fn default() -> Self {
        Self {
            ambient_loudness: 10.0,
            call_loudness: 18.0,
            disturbance_loudness: 45.0,
            disturbance_rate: 0.02,
            disturbance_length: Duration::from_millis(1500),
            ambient_rolloff: 4000.0,
            ambient_centroid: 12.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SoundingCall {
    until: Duration,
    detune_cents: f64,
}

pub struct Pond {
    profile: PondProfile,
    clock: Arc<dyn Clock>,
    calls: Mutex<Vec<SoundingCall>>,
    disturbance_until: Mutex<Option<Duration>>,
    last_frame: Mutex<Option<Duration>>,
    rng: Mutex<StdRng>,
}

impl Pond {
    pub fn new(profile: PondProfile, clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        Self {
            profile,
            clock,
            calls: Mutex::new(Vec::new()),
            disturbance_until: Mutex::new(None),
            last_frame: Mutex::new(None),
            rng: Mutex::new(rng),
        }
    }

    /// An emitter whose output is heard by everyone in this pond.
    pub fn voice(self: &Arc<Self>) -> Arc<dyn SoundEmitter> {
        Arc::new(PondVoice {
            pond: Arc::clone(self),
        })
    }

    pub fn sounding_calls(&self) -> usize {
        let now = self.clock.now();
        self.calls.lock().iter().filter(|c| c.until > now).count()
    }

    fn add_call(&self, duration: Duration, detune_cents: f64) {
        let until = self.clock.now() + duration;
        self.calls.lock().push(SoundingCall { until, detune_cents });
    }

    /// Render what the microphone hears right now.
    pub fn frame(&self) -> FeatureFrame {
        let now = self.clock.now();
        let elapsed = {
            let mut last = self.last_frame.lock();
            let elapsed = last.map_or(Duration::ZERO, |l| now.saturating_sub(l));
            *last = Some(now);
            elapsed
        };

        let calls: Vec<SoundingCall> = {
            let mut calls = self.calls.lock();
            calls.retain(|c| c.until > now);
            calls.clone()
        };

        let mut rng = self.rng.lock();
        let disturbed = {
            let mut until = self.disturbance_until.lock();
            if until.is_some_and(|u| u <= now) {
                *until = None;
            }
            let chance = self.profile.disturbance_rate * elapsed.as_secs_f64();
            if until.is_none() && rng.random::<f64>() < chance {
                *until = Some(now + self.profile.disturbance_length);
                debug!("pond disturbance");
            }
            until.is_some()
        };

        let mut convolution: Vec<f32> = (0..BINS).map(|_| -90.0 + rng.random_range(-3.0..3.0)).collect();
        convolution[CALL_BIN] = -70.0 + rng.random_range(-1.0..1.0);
        let direct = convolution.clone();

        let mut loudness = self.profile.ambient_loudness + rng.random_range(-2.0..2.0);
        let mut rolloff = self.profile.ambient_rolloff + rng.random_range(-50.0..50.0);
        let mut centroid = self.profile.ambient_centroid + rng.random_range(-0.2..0.2);
        let mut crest: f64 = 3.0 + rng.random_range(-0.5..0.5);

        for call in &calls {
            let offset = (call.detune_cents / CENTS_PER_BIN).round() as isize;
            let bin = (CALL_BIN as isize + offset).clamp(0, BINS as isize - 1) as usize;
            convolution[bin] = convolution[bin].max(-30.0 + rng.random_range(-2.0..2.0));
            loudness = loudness.max(self.profile.call_loudness + rng.random_range(-2.0..2.0));
            rolloff += 150.0;
            centroid += 0.3;
            crest = crest.max(15.0);
        }

        if disturbed {
            for value in convolution.iter_mut() {
                *value = -40.0 + rng.random_range(-5.0..5.0);
            }
            loudness = self.profile.disturbance_loudness + rng.random_range(-3.0..3.0);
            rolloff += 3000.0;
            centroid += 6.0;
            crest = 2.0;
        }

        FeatureFrame::from_spectra(now, convolution, direct)
            .with_loudness(loudness)
            .with_descriptors(rolloff, centroid, crest)
    }
}

struct PondVoice {
    pond: Arc<Pond>,
}

impl SoundEmitter for PondVoice {
    fn play(&self, sample: &CallSample, detune_cents: f64) {
        self.pond.add_call(sample.duration, detune_cents);
    }
}

/// Generator + delivery threads. Dropping the handle stops both.
pub struct PondHandle {
    stop_flag: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl PondHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

impl Drop for PondHandle {
    fn drop(&mut self) {
        self.stop();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Start producing frames every `frame_interval` and publishing them to `chorus`.
pub fn start_pond(pond: Arc<Pond>, chorus: Arc<Chorus>, frame_interval: Duration) -> Result<PondHandle, String> {
    let (tx, rx) = cb::bounded::<FeatureFrame>(64);
    let stop_flag = Arc::new(AtomicBool::new(false));

    let stop_gen = Arc::clone(&stop_flag);
    let generator = std::thread::Builder::new()
        .name("pond-frames".into())
        .spawn(move || {
            while !stop_gen.load(Ordering::Relaxed) {
                if tx.send(pond.frame()).is_err() {
                    break;
                }
                std::thread::sleep(frame_interval);
            }
            // dropping tx closes the channel and ends the delivery loop
        })
        .map_err(|e| format!("failed to spawn frame generator: {e}"))?;

    let delivery = std::thread::Builder::new()
        .name("frame-delivery".into())
        .spawn(move || loop {
            match rx.recv() {
                Ok(frame) => {
                    chorus.publish(frame);
                }
                Err(cb::RecvError) => {
                    info!("frame channel closed, exiting delivery loop");
                    break;
                }
            }
        })
        .map_err(|e| {
            error!(error = %e, "failed to spawn frame delivery thread");
            format!("failed to spawn frame delivery thread: {e}")
        })?;

    Ok(PondHandle {
        stop_flag,
        threads: vec![generator, delivery],
    })
}

/// A synthetic spring-peeper call: a short rising whistle with a soft envelope.
pub fn peeper_call(sample_rate: u32, duration: Duration) -> CallSample {
    let len = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
    let rate = sample_rate.max(1) as f64;
    let mut phase = 0.0f64;
    let pcm = (0..len)
        .map(|i| {
            let t = i as f64 / len.max(1) as f64;
            let freq = 2800.0 + 400.0 * t;
            phase += std::f64::consts::TAU * freq / rate;
            let envelope = (std::f64::consts::PI * t).sin();
            (0.6 * envelope * phase.sin()) as f32
        })
        .collect();
    CallSample::from_pcm("peeper", pcm, sample_rate)
}

/// Settings for the demo binary, read from the environment.
#[derive(Debug, Clone)]
pub struct PondOptions {
    pub frogs: usize,
    pub run_for: Duration,
    pub frame_interval: Duration,
    pub report_every: Duration,
    pub seed: Option<u64>,
}

impl Default for PondOptions {
    fn default() -> Self {
        Self {
            frogs: 5,
            run_for: Duration::from_secs(60),
            frame_interval: Duration::from_millis(40),
            report_every: Duration::from_secs(5),
            seed: None,
        }
    }
}

impl PondOptions {
    /// `CHORUS_FROGS`, `CHORUS_RUN_SECS`, `CHORUS_SEED`; anything unparsable keeps its default.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
        }
        let defaults = Self::default();
        Self {
            frogs: var("CHORUS_FROGS").unwrap_or(defaults.frogs),
            run_for: var("CHORUS_RUN_SECS").map(Duration::from_secs).unwrap_or(defaults.run_for),
            seed: var("CHORUS_SEED"),
            ..defaults
        }
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::BaselineProfile;
    use crate::classifier::{detect, ClassifierConfig};
    use crate::clock::ManualClock;

    fn quiet_pond(clock: Arc<ManualClock>) -> Arc<Pond> {
        let profile = PondProfile {
            disturbance_rate: 0.0,
            ..PondProfile::default()
        };
        Arc::new(Pond::new(profile, clock, StdRng::seed_from_u64(9)))
    }

    fn baseline_from(frame: &FeatureFrame) -> BaselineProfile {
        BaselineProfile {
            convolution_spectrum: frame.convolution_spectrum.clone(),
            amplitude_threshold: frame.amplitude_convolved,
            mean_rolloff: 4000.0,
            mean_centroid: 12.0,
            epoch: 0,
            captured_at: Duration::ZERO,
        }
    }

    #[test]
    fn ambient_frames_are_quiet_and_not_calls() {
        let clock = Arc::new(ManualClock::new());
        let pond = quiet_pond(clock.clone());
        let base = baseline_from(&pond.frame());
        for _ in 0..50 {
            clock.advance(Duration::from_millis(40));
            let frame = pond.frame();
            assert!(frame.loudness_total.unwrap() < 28.0);
            assert!(!detect(&frame, Some(&base), &ClassifierConfig::default()));
        }
    }

    #[test]
    fn a_voice_is_heard_as_a_call_while_it_sounds() {
        let clock = Arc::new(ManualClock::new());
        let pond = quiet_pond(clock.clone());
        let base = baseline_from(&pond.frame());
        let sample = CallSample::new("peeper", Duration::from_millis(400));

        pond.voice().play(&sample, 60.0);
        assert_eq!(pond.sounding_calls(), 1);
        clock.advance(Duration::from_millis(100));
        let frame = pond.frame();
        assert_eq!(frame.spectral_crest, Some(15.0));
        assert!(detect(&frame, Some(&base), &ClassifierConfig::default()));

        clock.advance(Duration::from_millis(400));
        assert_eq!(pond.sounding_calls(), 0);
        assert!(!detect(&pond.frame(), Some(&base), &ClassifierConfig::default()));
    }

    #[test]
    fn peeper_call_has_requested_length() {
        let call = peeper_call(8000, Duration::from_millis(250));
        assert_eq!(call.pcm.as_ref().map(|p| p.len()), Some(2000));
        assert_eq!(call.duration, Duration::from_millis(250));
        assert!(call.pcm.unwrap().iter().all(|s| s.abs() <= 0.6));
    }

    #[test]
    fn disturbances_are_loud() {
        let clock = Arc::new(ManualClock::new());
        let profile = PondProfile {
            disturbance_rate: 1000.0,
            ..PondProfile::default()
        };
        let pond = Pond::new(profile, clock.clone(), StdRng::seed_from_u64(1));
        pond.frame();
        clock.advance(Duration::from_millis(100));
        assert!(pond.frame().loudness_total.unwrap() > 40.0);
    }
}
