//! Metrics sink abstraction.
//!
//! The pipeline and the ledger emit counters, gauges, and histograms through
//! this trait. Production wires a real sink; tests inject [`MemoryMetrics`]
//! and assert on recorded values. The sink is constructor-injected
//! everywhere so no component reaches for a global.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

pub type Labels = BTreeMap<String, String>;

/// Destination for operational metrics.
pub trait MetricsSink: Send + Sync {
    fn record_counter(&self, name: &str, labels: &Labels, value: u64);
    fn record_gauge(&self, name: &str, labels: &Labels, value: f64);
    fn record_histogram(&self, name: &str, labels: &Labels, value: f64);
}

/// Builds a label map from `(key, value)` pairs.
pub fn labels<const N: usize>(pairs: [(&str, &str); N]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Sink that forwards metrics as structured tracing events.
///
/// Useful as a default: the values land in the log stream where the fmt
/// subscriber or a collector can pick them up.
#[derive(Debug, Default, Clone)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_counter(&self, name: &str, labels: &Labels, value: u64) {
        tracing::debug!(metric = name, ?labels, value, kind = "counter");
    }

    fn record_gauge(&self, name: &str, labels: &Labels, value: f64) {
        tracing::debug!(metric = name, ?labels, value, kind = "gauge");
    }

    fn record_histogram(&self, name: &str, labels: &Labels, value: f64) {
        tracing::debug!(metric = name, ?labels, value, kind = "histogram");
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    counters: Mutex<BTreeMap<String, u64>>,
    gauges: Mutex<BTreeMap<String, f64>>,
    histograms: Mutex<BTreeMap<String, Vec<f64>>>,
}

impl MemoryMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn counter(&self, name: &str) -> u64 {
        *self.counters.lock().get(name).unwrap_or(&0)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.lock().get(name).copied()
    }

    pub fn histogram_len(&self, name: &str) -> usize {
        self.histograms.lock().get(name).map(Vec::len).unwrap_or(0)
    }
}

impl MetricsSink for MemoryMetrics {
    fn record_counter(&self, name: &str, _labels: &Labels, value: u64) {
        *self.counters.lock().entry(name.to_string()).or_insert(0) += value;
    }

    fn record_gauge(&self, name: &str, _labels: &Labels, value: f64) {
        self.gauges.lock().insert(name.to_string(), value);
    }

    fn record_histogram(&self, name: &str, _labels: &Labels, value: f64) {
        self.histograms
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}
