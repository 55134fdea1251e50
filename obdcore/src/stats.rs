//! Running per-metric statistics over the acquisition stream. O(1) work per
//! payload; the subscription task is the sole writer through `SharedStats`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::catalog::MetricId;
use crate::transport::{DecodedPayload, FuelSystemState, MetricSample, MilStatus};

/// Latest value plus running min/max and sample count for one metric.
/// Invariant: `min <= latest.value <= max` after every update.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricStats {
    pub latest: MetricSample,
    pub min: f64,
    pub max: f64,
    pub sample_count: u64,
}

impl MetricStats {
    fn new(sample: MetricSample) -> Self {
        let value = sample.value;
        Self {
            latest: sample,
            min: value,
            max: value,
            sample_count: 1,
        }
    }

    fn update(&mut self, sample: MetricSample) {
        if sample.value < self.min {
            self.min = sample.value;
        }
        if sample.value > self.max {
            self.max = sample.value;
        }
        self.latest = sample;
        self.sample_count = self.sample_count.saturating_add(1);
    }

    /// Start a new observation window anchored at the current latest value.
    fn collapse(&mut self) {
        self.min = self.latest.value;
        self.max = self.latest.value;
        self.sample_count = 1;
    }
}

/// Shared handle; the subscription task writes, presentation reads.
pub type SharedStats = Arc<RwLock<StatsAggregator>>;

#[derive(Debug, Default)]
pub struct StatsAggregator {
    stats: HashMap<MetricId, MetricStats>,
    mil_status: Option<MilStatus>,
    fuel_status: Option<Vec<Option<FuelSystemState>>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStats {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Route one decoded payload. Status payloads replace whole-value
    /// snapshots; samples feed per-metric stats.
    pub fn apply(&mut self, payload: DecodedPayload) {
        match payload {
            DecodedPayload::Sample(sample) => self.on_sample(sample),
            DecodedPayload::MilStatus(status) => self.mil_status = Some(status),
            DecodedPayload::FuelStatus(banks) => self.fuel_status = Some(banks),
        }
    }

    pub fn on_sample(&mut self, sample: MetricSample) {
        match self.stats.get_mut(&sample.metric) {
            Some(existing) => existing.update(sample),
            None => {
                self.stats
                    .insert(sample.metric.clone(), MetricStats::new(sample));
            }
        }
    }

    pub fn stats(&self, id: &MetricId) -> Option<&MetricStats> {
        self.stats.get(id)
    }

    /// Owned copy of every tracked metric's stats, for presentation.
    pub fn snapshot(&self) -> HashMap<MetricId, MetricStats> {
        self.stats.clone()
    }

    pub fn tracked_count(&self) -> usize {
        self.stats.len()
    }

    pub fn mil_status(&self) -> Option<MilStatus> {
        self.mil_status
    }

    pub fn fuel_status(&self) -> Option<&[Option<FuelSystemState>]> {
        self.fuel_status.as_deref()
    }

    /// Collapse every tracked metric's window to its latest value.
    pub fn reset_all(&mut self) {
        for stats in self.stats.values_mut() {
            stats.collapse();
        }
    }

    /// Collapse one metric's window; no-op if untracked.
    pub fn reset(&mut self, id: &MetricId) {
        if let Some(stats) = self.stats.get_mut(id) {
            stats.collapse();
        }
    }

    /// Drop every tracked metric not in `keep`. Returns how many were
    /// removed so the caller can log subscription churn.
    pub fn prune(&mut self, keep: &BTreeSet<MetricId>) -> usize {
        let before = self.stats.len();
        self.stats.retain(|id, _| keep.contains(id));
        let removed = before - self.stats.len();
        if removed > 0 {
            debug!(removed, "pruned stats for metrics outside the keep set");
        }
        removed
    }

    /// Disconnect path: drop all per-metric stats. The MIL and fuel-system
    /// snapshots are kept; they describe the vehicle, not the session.
    pub fn clear(&mut self) {
        self.stats.clear();
    }
}
