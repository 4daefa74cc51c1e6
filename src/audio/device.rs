//! Playback on the default output device via cpal.
//! Each request gets its own short-lived thread that owns the stream
//! (cpal streams are not `Send` on every host) and drops it once the
//! detuned sample has finished. The stream is built in the device's
//! default sample format (f32, i16 or u16).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use tracing::{debug, error, warn};

use super::{detune_ratio, CallSample, SoundEmitter};
use crate::error::EmitterError;

/// Extra time the stream is kept alive past the nominal sample length.
const TAIL_MARGIN: Duration = Duration::from_millis(100);

pub struct DeviceEmitter;

impl DeviceEmitter {
    /// Fails early if the host has no output device at all.
    pub fn new() -> Result<Self, EmitterError> {
        cpal::default_host()
            .default_output_device()
            .ok_or(EmitterError::NoOutputDevice)?;
        Ok(Self)
    }
}

impl SoundEmitter for DeviceEmitter {
    fn play(&self, sample: &CallSample, detune_cents: f64) {
        let sample = sample.clone();
        let spawned = std::thread::Builder::new()
            .name("call-playback".into())
            .spawn(move || {
                if let Err(e) = play_blocking(&sample, detune_cents) {
                    warn!(error = %e, sample = %sample.name, "playback failed");
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn playback thread");
        }
    }
}

/// Walks a mono PCM buffer at a fixed step, interpolating between
/// neighbouring samples. `None` once the buffer is exhausted.
struct Resampler {
    pcm: Arc<[f32]>,
    position: f64,
    step: f64,
}

impl Resampler {
    fn new(pcm: Arc<[f32]>, step: f64) -> Self {
        Self { pcm, position: 0.0, step }
    }

    fn next_value(&mut self) -> Option<f32> {
        let index = self.position as usize;
        if index + 1 >= self.pcm.len() {
            return None;
        }
        let frac = (self.position - index as f64) as f32;
        let value = self.pcm[index] * (1.0 - frac) + self.pcm[index + 1] * frac;
        self.position += self.step;
        Some(value)
    }
}

/// Play `sample` resampled by the detune ratio, blocking until it ends.
fn play_blocking(sample: &CallSample, detune_cents: f64) -> Result<(), EmitterError> {
    let pcm = sample
        .pcm
        .clone()
        .ok_or_else(|| EmitterError::MissingPcm(sample.name.clone()))?;

    let device = cpal::default_host()
        .default_output_device()
        .ok_or(EmitterError::NoOutputDevice)?;
    let supported = device
        .default_output_config()
        .map_err(|e| EmitterError::Device(e.to_string()))?;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.config();

    let ratio = detune_ratio(detune_cents);
    let step = ratio * sample.sample_rate as f64 / config.sample_rate.0 as f64;
    let resampler = Resampler::new(pcm, step);
    let finished = Arc::new(AtomicBool::new(false));

    let stream = match format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, resampler, Arc::clone(&finished)),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, resampler, Arc::clone(&finished)),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, resampler, Arc::clone(&finished)),
        other => Err(EmitterError::Device(format!("unsupported sample format {other}"))),
    }?;

    stream
        .play()
        .map_err(|e| EmitterError::Device(format!("failed to start output stream: {e}")))?;
    debug!(sample = %sample.name, detune_cents, %format, "playback started");

    let nominal = sample.duration.div_f64(ratio.max(f64::EPSILON)) + TAIL_MARGIN;
    let poll = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while !finished.load(Ordering::Relaxed) && waited < nominal {
        std::thread::sleep(poll);
        waited += poll;
    }
    Ok(())
}

/// Output stream writing the resampled call to every channel as `T`.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut resampler: Resampler,
    finished: Arc<AtomicBool>,
) -> Result<cpal::Stream, EmitterError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let value = resampler.next_value().unwrap_or_else(|| {
                        finished.store(true, Ordering::Relaxed);
                        0.0
                    });
                    for out in frame.iter_mut() {
                        *out = T::from_sample(value);
                    }
                }
            },
            |err| {
                error!(error = %err, "audio output error");
            },
            None,
        )
        .map_err(|e| EmitterError::Device(format!("failed to build output stream: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resampler_interpolates_and_ends_at_the_buffer() {
        let pcm: Arc<[f32]> = vec![0.0, 1.0, 0.0].into();
        let mut resampler = Resampler::new(pcm, 0.5);
        let values: Vec<f32> = std::iter::from_fn(|| resampler.next_value()).collect();
        assert_eq!(values, vec![0.0, 0.5, 1.0, 0.5]);
    }

    #[test]
    fn silence_converts_to_each_output_format() {
        assert_eq!(i16::from_sample(0.0f32), 0);
        assert_eq!(u16::from_sample(0.0f32), 32768);
        assert_eq!(f32::from_sample(0.5f32), 0.5);
    }

    #[test]
    fn empty_pcm_ends_immediately() {
        let mut resampler = Resampler::new(Vec::<f32>::new().into(), 1.0);
        assert_eq!(resampler.next_value(), None);
    }
}
