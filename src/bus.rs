//! Frame bus: the one shared listening pipeline.
//! The external extractor publishes frames here; the bus runs the ambient
//! calibrator on every frame and hands a throttled stream of frames, together
//! with the current baseline, to each subscribed listener in turn.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::calibration::{AmbientCalibrator, BaselineProfile, CalibrationState};
use crate::clock::Clock;
use crate::config::ChorusConfig;
use crate::features::FeatureFrame;
use crate::metrics::{metric_names, MetricsRegistry};

/// Anything that wants to hear the pipeline.
pub trait FrameListener: Send + Sync {
    fn on_frame(&self, frame: &FeatureFrame, baseline: Option<&BaselineProfile>);
}

/// Leading-edge throttle: pass at most one event per `interval`.
/// Events inside the interval are dropped, never deferred.
struct Throttle {
    interval: Duration,
    last: Option<Duration>,
}

impl Throttle {
    fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    fn admit(&mut self, now: Duration) -> bool {
        match self.last {
            Some(last) if now.saturating_sub(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

pub struct FrameBus {
    calibrator: Mutex<AmbientCalibrator>,
    listeners: Mutex<Vec<(u64, Arc<dyn FrameListener>)>>,
    next_subscription: AtomicU64,
    throttle: Mutex<Throttle>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl FrameBus {
    /// `settle_delay` keeps calibration from starting before the agents' own
    /// playback could have died away (the call sample duration).
    pub fn new(config: &ChorusConfig, settle_delay: Duration, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            calibrator: Mutex::new(AmbientCalibrator::new(config, settle_delay, now)),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            throttle: Mutex::new(Throttle::new(config.sampling_interval())),
            clock,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a listener. Frames flow until the subscription is cancelled.
    pub fn subscribe(self: &Arc<Self>, listener: Arc<dyn FrameListener>) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        debug!(subscription = id, "listener subscribed");
        Subscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        let removed = listeners.len() != before;
        if removed {
            debug!(subscription = id, "listener unsubscribed");
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Feed one frame from the extractor. Delivery is synchronous: every
    /// listener has handled the frame when this returns.
    /// Returns whether the frame passed the throttle and reached listeners.
    pub fn publish(&self, frame: FeatureFrame) -> bool {
        let now = self.clock.now();
        let baseline = {
            let mut calibrator = self.calibrator.lock();
            calibrator.observe(&frame, now);
            calibrator.profile()
        };

        if !self.throttle.lock().admit(now) {
            trace!("frame throttled");
            return false;
        }

        let listeners: Vec<Arc<dyn FrameListener>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        let start = Instant::now();
        for listener in &listeners {
            listener.on_frame(&frame, baseline.as_deref());
        }
        if let Some(metrics) = &self.metrics {
            metrics.record(metric_names::BUS_FANOUT_US, start.elapsed().as_micros() as f64);
        }
        true
    }

    pub fn baseline(&self) -> Option<Arc<BaselineProfile>> {
        self.calibrator.lock().profile()
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.calibrator.lock().state()
    }

    pub fn environment_is_quiet(&self) -> bool {
        self.calibrator.lock().environment_is_quiet()
    }

    pub fn watch_calibration(&self) -> watch::Receiver<CalibrationState> {
        self.calibrator.lock().subscribe()
    }

    /// Throw away the baseline and calibrate again from scratch.
    pub fn reset_baseline(&self) {
        self.calibrator.lock().reset();
    }
}

/// Handle for one listener registration.
pub struct Subscription {
    id: u64,
    bus: Weak<FrameBus>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop delivery to this listener. Safe to call more than once.
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.unsubscribe(self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Default)]
    struct Counter {
        frames: Mutex<Vec<bool>>,
        loudness: Mutex<Vec<Option<f64>>>,
    }

    impl FrameListener for Counter {
        fn on_frame(&self, frame: &FeatureFrame, baseline: Option<&BaselineProfile>) {
            self.frames.lock().push(baseline.is_some());
            self.loudness.lock().push(frame.loudness_total);
        }
    }

    fn quiet() -> FeatureFrame {
        FeatureFrame::from_spectra(Duration::ZERO, vec![-70.0, -30.0], vec![])
            .with_loudness(8.0)
            .with_descriptors(2500.0, 9.0, 3.0)
    }

    fn bus(clock: &Arc<ManualClock>, sampling_ms: u64) -> Arc<FrameBus> {
        let config = ChorusConfig {
            sampling_interval_ms: sampling_ms,
            ..ChorusConfig::default()
        };
        Arc::new(FrameBus::new(&config, Duration::ZERO, clock.clone()))
    }

    #[test]
    fn throttle_admits_leading_edge_only() {
        let mut throttle = Throttle::new(Duration::from_millis(120));
        assert!(throttle.admit(Duration::from_millis(0)));
        assert!(!throttle.admit(Duration::from_millis(50)));
        assert!(!throttle.admit(Duration::from_millis(119)));
        assert!(throttle.admit(Duration::from_millis(120)));
    }

    #[test]
    fn throttled_frames_are_dropped_not_delivered_late() {
        let clock = Arc::new(ManualClock::new());
        let bus = bus(&clock, 1000);
        let counter = Arc::new(Counter::default());
        let _sub = bus.subscribe(counter.clone());

        assert!(bus.publish(quiet()));
        clock.set(Duration::from_millis(50));
        assert!(!bus.publish(quiet().with_loudness(60.0)));
        // The calibrator still heard the burst.
        assert_eq!(bus.calibration_state(), CalibrationState::Unsettled);

        clock.set(Duration::from_millis(1000));
        assert!(bus.publish(quiet()));
        assert_eq!(*counter.loudness.lock(), vec![Some(8.0), Some(8.0)]);
    }

    #[test]
    fn frames_reach_subscribers_until_unsubscribed() {
        let clock = Arc::new(ManualClock::new());
        let bus = bus(&clock, 0);
        let counter = Arc::new(Counter::default());
        let sub = bus.subscribe(counter.clone());

        assert!(bus.publish(quiet()));
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        clock.advance(Duration::from_millis(100));
        bus.publish(quiet());
        assert_eq!(counter.frames.lock().len(), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn calibration_sees_throttled_frames_too() {
        let clock = Arc::new(ManualClock::new());
        let bus = bus(&clock, 1000);
        let counter = Arc::new(Counter::default());
        let _sub = bus.subscribe(counter.clone());

        for _ in 0..=50 {
            bus.publish(quiet());
            clock.advance(Duration::from_millis(50));
        }
        // 2.55s of 50ms frames: only one frame per second reaches listeners,
        // but the calibrator settled from all of them.
        assert_eq!(bus.calibration_state(), CalibrationState::Settled);
        assert!(bus.environment_is_quiet());
        let frames = counter.frames.lock();
        assert_eq!(frames.len(), 3);
        assert_eq!(*frames, vec![false, false, false]);
    }

    #[test]
    fn listeners_receive_baseline_once_settled() {
        let clock = Arc::new(ManualClock::new());
        let bus = bus(&clock, 0);
        let counter = Arc::new(Counter::default());
        let _sub = bus.subscribe(counter.clone());
        for _ in 0..30 {
            bus.publish(quiet());
            clock.advance(Duration::from_millis(100));
        }
        let frames = counter.frames.lock();
        assert!(!frames[0]);
        assert!(frames[25]);
        assert!(*frames.last().unwrap());
    }

    #[test]
    fn reset_baseline_forgets_profile() {
        let clock = Arc::new(ManualClock::new());
        let bus = bus(&clock, 0);
        for _ in 0..30 {
            bus.publish(quiet());
            clock.advance(Duration::from_millis(100));
        }
        assert!(bus.baseline().is_some());
        bus.reset_baseline();
        assert!(bus.baseline().is_none());
        assert_eq!(bus.calibration_state(), CalibrationState::Unsettled);
    }
}
