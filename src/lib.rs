//! Frog chorus: agents that listen to a shared feature stream, learn the
//! ambient noise floor, recognize each other's calls and chirp back with a
//! probability shaped by shyness and eagerness.
//! Library root: module wiring plus the pond simulation entry point.

pub mod agent;
pub mod audio;
pub mod bus;
pub mod calibration;
pub mod cancellation;
pub mod chorus;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod dynamics;
pub mod error;
pub mod features;
pub mod metrics;
pub mod pond;
pub mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};

pub use agent::{Agent, AgentId, AgentSnapshot, ChirpOutcome};
pub use audio::{CallSample, SoundEmitter};
pub use bus::{FrameBus, FrameListener, Subscription};
pub use calibration::{AmbientCalibrator, BaselineProfile, CalibrationState};
pub use chorus::{Chorus, ChorusSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChorusConfig, RecalibrationPolicy};
pub use error::{ConfigError, EmitterError};
pub use features::FeatureFrame;

use pond::{Pond, PondOptions, PondProfile};

const DEFAULT_CONFIG_PATH: &str = "chorus.json";
const CALL_SAMPLE_RATE: u32 = 44_100;
const CALL_LENGTH: Duration = Duration::from_millis(400);

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("frog_chorus=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    if std::env::var("CHORUS_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config() -> ChorusConfig {
    let path = std::env::var_os("CHORUS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    match ChorusConfig::load_from_file(&path) {
        Ok(config) => {
            info!(path = %path.display(), "config loaded");
            config
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "config load failed, using defaults");
            ChorusConfig::default()
        }
    }
}

/// Run a pond of simulated frogs until `CHORUS_RUN_SECS` elapse or Ctrl-C.
pub fn run() {
    init_tracing();
    info!("frog-chorus starting");

    let config = load_config();
    let options = PondOptions::from_env();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("chorus")
        .build()
        .expect("failed to build tokio runtime");

    runtime.block_on(simulate(config, options));
    info!("frog-chorus stopped");
}

async fn simulate(config: ChorusConfig, options: PondOptions) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let mut rng = options.rng();
    let pond_rng = StdRng::seed_from_u64(rng.random());
    let pond = Arc::new(Pond::new(PondProfile::default(), Arc::clone(&clock), pond_rng));
    let sample = pond::peeper_call(CALL_SAMPLE_RATE, CALL_LENGTH);
    let chorus = Arc::new(Chorus::with_rng(config, sample, Arc::clone(&clock), rng));

    let emitter = frog_voice(&pond);
    for _ in 0..options.frogs {
        chorus.add_agent(Arc::clone(&emitter));
    }

    let mut calibration = chorus.watch_calibration();
    tokio::spawn(async move {
        while calibration.changed().await.is_ok() {
            let state = *calibration.borrow_and_update();
            info!(%state, "calibration changed");
        }
    });

    let handle = match pond::start_pond(Arc::clone(&pond), Arc::clone(&chorus), options.frame_interval) {
        Ok(handle) => handle,
        Err(e) => {
            warn!(error = %e, "pond failed to start");
            chorus.sleep_all();
            chorus.join_timers().await;
            return;
        }
    };

    let deadline = tokio::time::sleep(options.run_for);
    tokio::pin!(deadline);
    let mut report = interval_at(Instant::now() + options.report_every, options.report_every);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = report.tick() => log_snapshot(&chorus, &pond),
        }
    }

    chorus.sleep_all();
    chorus.join_timers().await;
    handle.stop();
    // joins the generator and delivery threads
    if let Err(e) = tokio::task::spawn_blocking(move || drop(handle)).await {
        warn!(error = %e, "pond shutdown panicked");
    }

    log_snapshot(&chorus, &pond);
    match serde_json::to_string(&chorus.metrics_summary()) {
        Ok(summary) => info!(%summary, "metrics"),
        Err(e) => warn!(error = %e, "metrics summary not serializable"),
    }
}

fn log_snapshot(chorus: &Chorus, pond: &Pond) {
    let snapshot = chorus.snapshot();
    info!(
        calibration = %snapshot.calibration,
        quiet = snapshot.environment_is_quiet,
        sounding = pond.sounding_calls(),
        "pond"
    );
    for agent in &snapshot.agents {
        info!(
            agent_id = agent.id,
            shyness = agent.shyness,
            eagerness = agent.eagerness,
            chirps = agent.chirps,
            vocalizing = agent.is_vocalizing,
            "frog"
        );
    }
}

#[cfg(feature = "device-output")]
fn frog_voice(pond: &Arc<Pond>) -> Arc<dyn SoundEmitter> {
    match audio::device::DeviceEmitter::new() {
        Ok(device) => {
            let device: Arc<dyn SoundEmitter> = Arc::new(device);
            Arc::new(audio::FanOutEmitter::new(vec![pond.voice(), device]))
        }
        Err(e) => {
            warn!(error = %e, "no playback device, pond only");
            pond.voice()
        }
    }
}

#[cfg(not(feature = "device-output"))]
fn frog_voice(pond: &Arc<Pond>) -> Arc<dyn SoundEmitter> {
    pond.voice()
}
