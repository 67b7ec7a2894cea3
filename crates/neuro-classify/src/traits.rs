//! Behavioural interfaces at the pipeline seams.

use std::collections::VecDeque;

use neuro_core::types::{ClassificationResult, FeatureMap, FeatureKey, Window};
use neuro_core::NeuroResult;

/// Turns a signal window into a typed feature map.
///
/// Extractors are stateful only where the domain demands it (EMA baselines,
/// previous-iteration deltas); the state is per-instance and instances are
/// never shared across streams.
pub trait FeatureExtractor: Send {
    /// Window duration this extractor needs, in milliseconds.
    fn required_window_ms(&self) -> f64;

    /// Static declaration of every key this extractor can emit.
    fn feature_keys(&self) -> &'static [FeatureKey];

    /// Compute features for one window.
    ///
    /// A window containing non-finite samples must yield a map with
    /// `signal_quality == 0` rather than an error.
    fn extract(&mut self, window: &Window) -> NeuroResult<FeatureMap>;
}

/// Turns a feature map into a labelled result.
pub trait Classifier: Send {
    /// Classify one feature map. Deterministic over the instance's
    /// temporal-history state.
    fn classify(&mut self, features: &FeatureMap) -> NeuroResult<ClassificationResult>;

    /// Running performance counters for this instance.
    fn metrics(&self) -> ClassifierMetrics;
}

/// Per-classifier performance counters.
#[derive(Debug, Clone, Default)]
pub struct ClassifierMetrics {
    pub inference_count: u64,
    pub error_count: u64,
    pub mean_latency_ms: f64,
    pub p95_latency_ms: f64,
}

/// Bounded latency history shared by the classifier implementations.
#[derive(Debug, Default)]
pub(crate) struct LatencyTracker {
    samples: VecDeque<f64>,
    pub inference_count: u64,
    pub error_count: u64,
}

impl LatencyTracker {
    const CAP: usize = 256;

    pub fn record(&mut self, latency_ms: f64) {
        if self.samples.len() == Self::CAP {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
        self.inference_count += 1;
    }

    pub fn snapshot(&self) -> ClassifierMetrics {
        if self.samples.is_empty() {
            return ClassifierMetrics {
                inference_count: self.inference_count,
                error_count: self.error_count,
                ..Default::default()
            };
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        let p95_idx = ((sorted.len() as f64) * 0.95) as usize;
        ClassifierMetrics {
            inference_count: self.inference_count,
            error_count: self.error_count,
            mean_latency_ms: mean,
            p95_latency_ms: sorted[p95_idx.min(sorted.len() - 1)],
        }
    }
}
