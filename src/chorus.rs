//! Chorus: the orchestrator that owns the shared pipeline and its frogs.
//! Allocates agent ids, wires each agent to the bus and to its own chirp
//! timer, and puts everyone to sleep at the end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agent::{Agent, AgentId, AgentSnapshot};
use crate::audio::{CallSample, SoundEmitter};
use crate::bus::{FrameBus, Subscription};
use crate::calibration::CalibrationState;
use crate::cancellation::SleepCoordinator;
use crate::clock::Clock;
use crate::config::ChorusConfig;
use crate::features::FeatureFrame;
use crate::metrics::{MetricSummary, MetricsRegistry};
use crate::scheduler;

/// Hands out agent ids, starting at 1.
pub struct AgentIdAllocator {
    next: AtomicU64,
}

impl AgentIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> AgentId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for AgentIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

struct Member {
    agent: Arc<Agent>,
    subscription: Option<Subscription>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BaselineSummary {
    pub epoch: u64,
    pub amplitude_threshold: f64,
    pub mean_rolloff: f64,
    pub mean_centroid: f64,
    pub captured_at_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChorusSnapshot {
    pub calibration: CalibrationState,
    pub environment_is_quiet: bool,
    pub baseline: Option<BaselineSummary>,
    pub agents: Vec<AgentSnapshot>,
}

pub struct Chorus {
    config: ChorusConfig,
    sample: CallSample,
    clock: Arc<dyn Clock>,
    bus: Arc<FrameBus>,
    ids: AgentIdAllocator,
    sleep: SleepCoordinator,
    metrics: Arc<MetricsRegistry>,
    rng: Mutex<StdRng>,
    members: Mutex<Vec<Member>>,
}

impl Chorus {
    pub fn new(config: ChorusConfig, sample: CallSample, clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(config, sample, clock, StdRng::from_os_rng())
    }

    /// Deterministic variant: every agent's generator is seeded from `rng`.
    pub fn with_rng(config: ChorusConfig, sample: CallSample, clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let bus = Arc::new(
            FrameBus::new(&config, sample.duration, Arc::clone(&clock)).with_metrics(Arc::clone(&metrics)),
        );
        info!(
            sample = %sample.name,
            sample_ms = sample.duration.as_millis() as u64,
            "chorus created"
        );
        Self {
            config,
            sample,
            clock,
            bus,
            ids: AgentIdAllocator::new(),
            sleep: SleepCoordinator::new(),
            metrics,
            rng: Mutex::new(rng),
            members: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ChorusConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<FrameBus> {
        &self.bus
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Create an agent, subscribe it to the pipeline, but leave its chirp
    /// timer to the caller (`Agent::try_chirp`). Used for hand-driven runs.
    pub fn add_manual_agent(&self, emitter: Arc<dyn SoundEmitter>) -> Arc<Agent> {
        self.enlist(emitter, false)
    }

    /// Create an agent and start its chirp timer on the current tokio runtime.
    pub fn add_agent(&self, emitter: Arc<dyn SoundEmitter>) -> Arc<Agent> {
        self.enlist(emitter, true)
    }

    /// Once the chorus sleeps, new agents are born asleep and never wired
    /// to the bus or a timer.
    fn enlist(&self, emitter: Arc<dyn SoundEmitter>, with_timer: bool) -> Arc<Agent> {
        let id = self.ids.allocate();
        let seed: u64 = self.rng.lock().random();
        let agent = Arc::new(
            Agent::new(
                id,
                &self.config,
                self.sample.clone(),
                Arc::clone(&self.clock),
                emitter,
                StdRng::seed_from_u64(seed),
            )
            .with_sleep_token(self.sleep.agent_token())
            .with_metrics(Arc::clone(&self.metrics)),
        );

        // Held across the check so a concurrent `sleep_all` sees this member.
        let mut members = self.members.lock();
        if agent.is_asleep() {
            warn!(agent_id = id, "chorus is asleep, agent not attached");
            members.push(Member {
                agent: Arc::clone(&agent),
                subscription: None,
                timer: None,
            });
            return agent;
        }

        let subscription = Some(self.bus.subscribe(agent.clone()));
        let timer = with_timer
            .then(|| scheduler::spawn_chirp_timer(Arc::clone(&agent), self.config.chirp_attempt_interval()));

        members.push(Member {
            agent: Arc::clone(&agent),
            subscription,
            timer,
        });
        drop(members);
        info!(agent_id = id, detune_cents = agent.detune_cents(), "agent joined chorus");
        agent
    }

    /// Hand a frame from the extractor to the pipeline.
    pub fn publish(&self, frame: FeatureFrame) -> bool {
        self.bus.publish(frame)
    }

    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.members.lock().iter().map(|m| Arc::clone(&m.agent)).collect()
    }

    pub fn agent(&self, id: AgentId) -> Option<Arc<Agent>> {
        self.members
            .lock()
            .iter()
            .find(|m| m.agent.id() == id)
            .map(|m| Arc::clone(&m.agent))
    }

    /// Put one agent to sleep and detach it from the pipeline.
    pub fn sleep_agent(&self, id: AgentId) -> bool {
        let members = self.members.lock();
        let Some(member) = members.iter().find(|m| m.agent.id() == id) else {
            return false;
        };
        member.agent.sleep();
        if let Some(subscription) = &member.subscription {
            subscription.unsubscribe();
        }
        true
    }

    /// Put every agent to sleep. Idempotent.
    pub fn sleep_all(&self) {
        if !self.sleep.sleep_all() {
            return;
        }
        let members = self.members.lock();
        for member in members.iter() {
            member.agent.sleep();
            if let Some(subscription) = &member.subscription {
                subscription.unsubscribe();
            }
        }
        info!(agents = members.len(), "chorus asleep");
    }

    pub fn is_asleep(&self) -> bool {
        self.sleep.is_asleep()
    }

    /// Wait for every chirp timer to wind down after `sleep_all`.
    pub async fn join_timers(&self) {
        let timers: Vec<JoinHandle<()>> = self
            .members
            .lock()
            .iter_mut()
            .filter_map(|m| m.timer.take())
            .collect();
        for timer in timers {
            let _ = timer.await;
        }
    }

    pub fn watch_calibration(&self) -> watch::Receiver<CalibrationState> {
        self.bus.watch_calibration()
    }

    pub fn snapshot(&self) -> ChorusSnapshot {
        let baseline = self.bus.baseline().map(|p| BaselineSummary {
            epoch: p.epoch,
            amplitude_threshold: p.amplitude_threshold,
            mean_rolloff: p.mean_rolloff,
            mean_centroid: p.mean_centroid,
            captured_at_ms: p.captured_at.as_millis() as u64,
        });
        ChorusSnapshot {
            calibration: self.bus.calibration_state(),
            environment_is_quiet: self.bus.environment_is_quiet(),
            baseline,
            agents: self.agents().iter().map(|a| a.snapshot()).collect(),
        }
    }

    pub fn metrics_summary(&self) -> HashMap<String, MetricSummary> {
        self.metrics.summary()
    }
}
