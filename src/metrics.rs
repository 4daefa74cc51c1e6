//! Timing histograms for the chorus: how irregularly frames reach agents,
//! how far apart an agent's chirps land, and how long bus fan-out takes.
//! Sliding windows of recent samples with mean and p50/p95/p99 summaries.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// The most recent `capacity` samples of one metric, oldest first.
struct SampleWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SampleWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Nearest-rank percentile, `p` in 0-100.
    fn percentile(&self, p: f64) -> f64 {
        let n = self.samples.len();
        if n == 0 {
            return 0.0;
        }
        let rank = ((p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64).round() as usize;
        let mut scratch: Vec<f64> = self.samples.iter().copied().collect();
        let (_, value, _) = scratch.select_nth_unstable_by(rank.min(n - 1), f64::total_cmp);
        *value
    }
}

/// Named histograms shared by the bus and every agent.
pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, SampleWindow>>,
    window_capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(window_capacity: usize) -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            window_capacity: window_capacity.max(1),
        }
    }

    /// Record a sample for the named metric.
    pub fn record(&self, name: &'static str, value: f64) {
        let mut hists = self.histograms.lock();
        hists
            .entry(name)
            .or_insert_with(|| SampleWindow::new(self.window_capacity))
            .push(value);
        tracing::trace!(metric = name, value, "metric_recorded");
    }

    /// Percentile (0-100) of a metric; 0 if nothing was recorded.
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        self.histograms
            .lock()
            .get(name)
            .map(|window| window.percentile(p))
            .unwrap_or(0.0)
    }

    pub fn count(&self, name: &str) -> usize {
        self.histograms.lock().get(name).map_or(0, SampleWindow::len)
    }

    /// p50/p95/p99 of every metric.
    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        let hists = self.histograms.lock();
        hists
            .iter()
            .map(|(&name, window)| {
                (
                    name.to_string(),
                    MetricSummary {
                        mean: window.mean(),
                        p50: window.percentile(50.0),
                        p95: window.percentile(95.0),
                        p99: window.percentile(99.0),
                        count: window.len(),
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub count: usize,
}

/// Well-known metric names (constants to avoid typos).
pub mod metric_names {
    /// Seconds-of-input an agent integrated per frame, in ms.
    pub const AGENT_FRAME_DT_MS: &str = "agent_frame_dt_ms";
    pub const AGENT_CHIRP_GAP_MS: &str = "agent_chirp_gap_ms";
    pub const AGENT_ATTEMPT_GAP_MS: &str = "agent_attempt_gap_ms";
    pub const BUS_FANOUT_US: &str = "bus_fanout_us";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_recorded_samples() {
        let metrics = MetricsRegistry::new();
        for v in 1..=100 {
            metrics.record(metric_names::AGENT_FRAME_DT_MS, v as f64);
        }
        assert_eq!(metrics.percentile(metric_names::AGENT_FRAME_DT_MS, 50.0), 51.0);
        assert_eq!(metrics.percentile(metric_names::AGENT_FRAME_DT_MS, 99.0), 99.0);
        assert_eq!(metrics.count(metric_names::AGENT_FRAME_DT_MS), 100);
        assert_eq!(metrics.percentile("unknown", 50.0), 0.0);
    }

    #[test]
    fn window_keeps_only_latest_samples() {
        let metrics = MetricsRegistry::with_capacity(4);
        for v in [100.0, 200.0, 1.0, 2.0, 3.0, 4.0] {
            metrics.record(metric_names::AGENT_CHIRP_GAP_MS, v);
        }
        let summary = metrics.summary();
        let gap = &summary[metric_names::AGENT_CHIRP_GAP_MS];
        assert_eq!(gap.count, 4);
        assert_eq!(gap.p99, 4.0);
        assert_eq!(gap.p50, 3.0);
        assert!((gap.mean - 2.5).abs() < 1e-12);
    }
}
