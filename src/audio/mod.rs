//! Sound output boundary.
//! An agent hands its call sample and detune to a `SoundEmitter` and forgets
//! about it; playback itself (device, mixing, decoding) lives behind the trait.

#[cfg(feature = "device-output")]
pub mod device;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// The agent's own call: what it plays, and what the convolution matches against.
#[derive(Debug, Clone)]
pub struct CallSample {
    pub name: String,
    pub duration: Duration,
    /// Mono PCM in `[-1, 1]`. Only needed for device playback.
    pub pcm: Option<Arc<[f32]>>,
    pub sample_rate: u32,
}

impl CallSample {
    /// A sample known only by name and length (simulation, tests).
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
            pcm: None,
            sample_rate: 0,
        }
    }

    /// A decoded mono sample. Duration follows from length and rate.
    pub fn from_pcm(name: impl Into<String>, pcm: Vec<f32>, sample_rate: u32) -> Self {
        let duration = if sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(pcm.len() as f64 / sample_rate as f64)
        };
        Self {
            name: name.into(),
            duration,
            pcm: Some(pcm.into()),
            sample_rate,
        }
    }
}

/// Playback rate multiplier for a detune in cents.
#[inline]
pub fn detune_ratio(detune_cents: f64) -> f64 {
    2f64.powf(detune_cents / 1200.0)
}

/// Fire-and-forget playback. Implementations must not block the caller;
/// device failures are theirs to report.
pub trait SoundEmitter: Send + Sync {
    fn play(&self, sample: &CallSample, detune_cents: f64);
}

/// Emitter that only logs the request. Useful headless.
pub struct TracingEmitter;

impl SoundEmitter for TracingEmitter {
    fn play(&self, sample: &CallSample, detune_cents: f64) {
        info!(sample = %sample.name, detune_cents, "play");
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayRequest {
    pub sample: String,
    pub detune_cents: f64,
}

/// Emitter that remembers every request, in order.
#[derive(Default)]
pub struct RecordingEmitter {
    requests: Mutex<Vec<PlayRequest>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<PlayRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl SoundEmitter for RecordingEmitter {
    fn play(&self, sample: &CallSample, detune_cents: f64) {
        self.requests.lock().push(PlayRequest {
            sample: sample.name.clone(),
            detune_cents,
        });
    }
}

/// Plays every request on each inner emitter, in order.
pub struct FanOutEmitter {
    emitters: Vec<Arc<dyn SoundEmitter>>,
}

impl FanOutEmitter {
    pub fn new(emitters: Vec<Arc<dyn SoundEmitter>>) -> Self {
        Self { emitters }
    }
}

impl SoundEmitter for FanOutEmitter {
    fn play(&self, sample: &CallSample, detune_cents: f64) {
        for emitter in &self.emitters {
            emitter.play(sample, detune_cents);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_duration_follows_rate() {
        let sample = CallSample::from_pcm("peeper", vec![0.0; 22_050], 44_100);
        assert_eq!(sample.duration, Duration::from_millis(500));
        assert_eq!(CallSample::from_pcm("empty", vec![0.0; 10], 0).duration, Duration::ZERO);
    }

    #[test]
    fn detune_ratio_is_an_octave_per_1200_cents() {
        assert!((detune_ratio(1200.0) - 2.0).abs() < 1e-12);
        assert!((detune_ratio(-1200.0) - 0.5).abs() < 1e-12);
        assert_eq!(detune_ratio(0.0), 1.0);
    }

    #[test]
    fn recording_emitter_keeps_order() {
        let emitter = RecordingEmitter::new();
        let sample = CallSample::new("peeper", Duration::from_millis(300));
        emitter.play(&sample, -12.5);
        emitter.play(&sample, 40.0);
        let requests = emitter.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].detune_cents, -12.5);
        assert_eq!(requests[1].sample, "peeper");
    }

    #[test]
    fn fan_out_reaches_every_emitter() {
        let a = Arc::new(RecordingEmitter::new());
        let b = Arc::new(RecordingEmitter::new());
        let fan = FanOutEmitter::new(vec![a.clone(), b.clone()]);
        fan.play(&CallSample::new("peeper", Duration::from_millis(300)), 7.0);
        assert_eq!(a.count(), 1);
        assert_eq!(b.requests()[0].detune_cents, 7.0);
    }
}
