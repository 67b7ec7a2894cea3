//! Cadenced fan-out engine over per-stream ring buffers.
//!
//! Packets are appended to a buffer keyed by device; once the classification
//! interval has elapsed, every registered `(extractor, classifier)` pair is
//! run concurrently over its own window of the buffer. Results come out in
//! packet-arrival order; a failing pair never blocks its peers and is
//! surfaced through the error callback and the metrics sink.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::{Stream, StreamExt};
use neuro_core::metrics::{labels, MetricsSink, TracingMetrics};
use neuro_core::types::{ClassificationResult, SamplePacket};
use neuro_core::RingBuffer;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::traits::{Classifier, FeatureExtractor};

/// One registered pipeline: an extractor feeding a classifier.
struct PipelineEntry {
    extractor: Box<dyn FeatureExtractor>,
    classifier: Box<dyn Classifier>,
}

/// Error surfaced out-of-band when a pair fails on one window.
#[derive(Debug, Clone)]
pub struct PipelineError {
    pub classifier: String,
    pub message: String,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pipeline '{}' failed: {}", self.classifier, self.message)
    }
}

/// Configuration for the stream processor.
#[derive(Debug, Clone)]
pub struct StreamProcessorConfig {
    /// Ring-buffer span per stream, milliseconds.
    pub buffer_ms: f64,
    /// Classification cadence, milliseconds.
    pub cadence_ms: f64,
}

impl Default for StreamProcessorConfig {
    fn default() -> Self {
        Self {
            buffer_ms: 5000.0,
            cadence_ms: 100.0,
        }
    }
}

#[derive(Default)]
struct PipelineStatsInner {
    classifications: u64,
    errors: u64,
    dropped_packets: u64,
    latencies: VecDeque<f64>,
}

/// Snapshot of pipeline performance.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub classifications: u64,
    pub errors: u64,
    pub dropped_packets: u64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
}

const LATENCY_HISTORY: usize = 1000;

type ErrorCallback = dyn Fn(PipelineError) + Send + Sync;

/// Orchestrates the classification fan-out for sample-packet streams.
pub struct StreamProcessor {
    config: StreamProcessorConfig,
    pipelines: Arc<Mutex<BTreeMap<String, Arc<Mutex<PipelineEntry>>>>>,
    stats: Arc<Mutex<PipelineStatsInner>>,
    metrics: Arc<dyn MetricsSink>,
    on_error: Arc<Mutex<Option<Box<ErrorCallback>>>>,
}

impl StreamProcessor {
    pub fn new(config: StreamProcessorConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config,
            pipelines: Arc::new(Mutex::new(BTreeMap::new())),
            stats: Arc::new(Mutex::new(PipelineStatsInner::default())),
            metrics,
            on_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(StreamProcessorConfig::default(), Arc::new(TracingMetrics))
    }

    /// Register a pipeline under a unique name. Replacing an existing name
    /// is allowed but logged, since it discards classifier history.
    pub fn add_classifier(
        &self,
        name: impl Into<String>,
        extractor: Box<dyn FeatureExtractor>,
        classifier: Box<dyn Classifier>,
    ) {
        let name = name.into();
        let mut pipelines = self.pipelines.lock();
        if pipelines.contains_key(&name) {
            tracing::warn!(name = %name, "replacing existing classifier pipeline");
        }
        pipelines.insert(
            name.clone(),
            Arc::new(Mutex::new(PipelineEntry {
                extractor,
                classifier,
            })),
        );
        tracing::info!(name = %name, "registered classifier pipeline");
    }

    pub fn remove_classifier(&self, name: &str) -> bool {
        let removed = self.pipelines.lock().remove(name).is_some();
        if removed {
            tracing::info!(name = %name, "removed classifier pipeline");
        }
        removed
    }

    pub fn active_classifiers(&self) -> Vec<String> {
        self.pipelines.lock().keys().cloned().collect()
    }

    /// Install the out-of-band error callback.
    pub fn set_error_callback(&self, callback: impl Fn(PipelineError) + Send + Sync + 'static) {
        *self.on_error.lock() = Some(Box::new(callback));
    }

    pub fn performance(&self) -> PipelineStats {
        let inner = self.stats.lock();
        let mut sorted: Vec<f64> = inner.latencies.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let pct = |p: f64| -> f64 {
            if sorted.is_empty() {
                0.0
            } else {
                sorted[((sorted.len() as f64 * p) as usize).min(sorted.len() - 1)]
            }
        };
        PipelineStats {
            classifications: inner.classifications,
            errors: inner.errors,
            dropped_packets: inner.dropped_packets,
            p50_latency_ms: pct(0.50),
            p95_latency_ms: pct(0.95),
            p99_latency_ms: pct(0.99),
        }
    }

    /// Process a packet stream, yielding classification results.
    ///
    /// The driving task owns one ring buffer per device id seen on the
    /// stream. Results for one cadence tick are emitted in registration
    /// order; ticks follow packet-arrival order.
    pub fn process_stream(
        &self,
        input: impl Stream<Item = SamplePacket> + Send + 'static,
    ) -> impl Stream<Item = ClassificationResult> + Send {
        let (tx, rx) = mpsc::channel::<ClassificationResult>(64);
        let pipelines = Arc::clone(&self.pipelines);
        let stats = Arc::clone(&self.stats);
        let metrics = Arc::clone(&self.metrics);
        let on_error = Arc::clone(&self.on_error);
        let config = self.config.clone();

        tokio::spawn(async move {
            let mut input = Box::pin(input);
            // Per-device buffer plus the instant of the last classification
            // tick; None means no tick has happened yet.
            let mut buffers: BTreeMap<String, (Arc<RingBuffer>, Option<Instant>)> = BTreeMap::new();

            while let Some(packet) = input.next().await {
                let device_id = packet.device_id().to_string();
                let entry = match buffers.entry(device_id.clone()) {
                    std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
                    std::collections::btree_map::Entry::Vacant(slot) => {
                        let buffer = match RingBuffer::new(
                            packet.channels().len(),
                            config.buffer_ms,
                            packet.sampling_rate_hz(),
                        ) {
                            Ok(b) => Arc::new(b),
                            Err(err) => {
                                tracing::warn!(%device_id, %err, "cannot create stream buffer");
                                stats.lock().dropped_packets += 1;
                                continue;
                            }
                        };
                        tracing::info!(%device_id, "started processing stream");
                        slot.insert((buffer, None))
                    }
                };

                if let Err(err) = entry.0.add(&packet) {
                    tracing::warn!(%device_id, %err, "dropping malformed packet");
                    stats.lock().dropped_packets += 1;
                    metrics.record_counter(
                        "neuro.pipeline.dropped_packets",
                        &labels([("device", device_id.as_str())]),
                        1,
                    );
                    continue;
                }

                let due = entry
                    .1
                    .map_or(true, |t| t.elapsed().as_secs_f64() * 1000.0 >= config.cadence_ms);
                if !due || entry.0.duration_ms() < config.cadence_ms {
                    continue;
                }
                entry.1 = Some(Instant::now());

                // Snapshot the registry; each pair runs on the blocking
                // pool with its own lock so a slow classifier cannot stall
                // the others.
                let pairs: Vec<(String, Arc<Mutex<PipelineEntry>>)> = pipelines
                    .lock()
                    .iter()
                    .map(|(n, e)| (n.clone(), Arc::clone(e)))
                    .collect();

                let buffer = Arc::clone(&entry.0);
                let tasks = pairs.into_iter().map(|(name, pair)| {
                    let buffer = Arc::clone(&buffer);
                    tokio::task::spawn_blocking(move || {
                        let started = Instant::now();
                        let mut entry = pair.lock();

                        let window = buffer.window(entry.extractor.required_window_ms())?;

                        let extract_started = Instant::now();
                        let features = match entry.extractor.extract(&window) {
                            Ok(f) => f,
                            Err(err) => return Some((name, Err(err), 0.0, 0.0, started)),
                        };
                        let extract_ms = extract_started.elapsed().as_secs_f64() * 1000.0;

                        let classify_started = Instant::now();
                        let result = entry.classifier.classify(&features);
                        let classify_ms = classify_started.elapsed().as_secs_f64() * 1000.0;

                        Some((name, result, extract_ms, classify_ms, started))
                    })
                });

                for outcome in join_all(tasks).await {
                    let Ok(Some((name, result, extract_ms, classify_ms, started))) = outcome
                    else {
                        continue;
                    };
                    match result {
                        Ok(mut result) => {
                            let total_ms = started.elapsed().as_secs_f64() * 1000.0;
                            {
                                let common = result.common_mut();
                                common.latency_ms = total_ms;
                                common.extract_ms = extract_ms;
                                common.classify_ms = classify_ms;
                                common.metadata.insert(
                                    "classifier_name".into(),
                                    serde_json::json!(name),
                                );
                            }
                            {
                                let mut inner = stats.lock();
                                inner.classifications += 1;
                                if inner.latencies.len() == LATENCY_HISTORY {
                                    inner.latencies.pop_front();
                                }
                                inner.latencies.push_back(total_ms);
                            }
                            metrics.record_histogram(
                                "neuro.pipeline.latency_ms",
                                &labels([("classifier", name.as_str())]),
                                total_ms,
                            );
                            metrics.record_counter(
                                "neuro.pipeline.classifications",
                                &labels([("classifier", name.as_str())]),
                                1,
                            );
                            if tx.send(result).await.is_err() {
                                return; // Consumer dropped the stream.
                            }
                        }
                        Err(err) => {
                            stats.lock().errors += 1;
                            metrics.record_counter(
                                "neuro.pipeline.errors",
                                &labels([("classifier", name.as_str())]),
                                1,
                            );
                            tracing::warn!(classifier = %name, %err, "classification failed");
                            if let Some(callback) = on_error.lock().as_ref() {
                                callback(PipelineError {
                                    classifier: name,
                                    message: err.to_string(),
                                });
                            }
                        }
                    }
                }
            }
            tracing::info!("input stream ended, stopping processing");
        });

        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use neuro_core::metrics::MemoryMetrics;
    use neuro_core::types::{FeatureKey, FeatureMap, SignalType, Window};
    use neuro_core::{NeuroError, NeuroResult};

    struct PassthroughExtractor;

    impl FeatureExtractor for PassthroughExtractor {
        fn required_window_ms(&self) -> f64 {
            100.0
        }
        fn feature_keys(&self) -> &'static [FeatureKey] {
            &[FeatureKey::AlphaPower]
        }
        fn extract(&mut self, window: &Window) -> NeuroResult<FeatureMap> {
            let mut map = FeatureMap::new(window.start_timestamp, 100.0);
            map.insert_scalar(FeatureKey::AlphaPower, 0.9);
            Ok(map)
        }
    }

    struct FailingExtractor;

    impl FeatureExtractor for FailingExtractor {
        fn required_window_ms(&self) -> f64 {
            100.0
        }
        fn feature_keys(&self) -> &'static [FeatureKey] {
            &[]
        }
        fn extract(&mut self, _window: &Window) -> NeuroResult<FeatureMap> {
            Err(NeuroError::Feature {
                extractor: "failing".into(),
                message: "synthetic failure".into(),
            })
        }
    }

    fn packets(n: usize, rate: f64, samples: usize) -> Vec<SamplePacket> {
        (0..n)
            .map(|i| {
                SamplePacket::new(
                    vec!["C3".into(), "C4".into()],
                    rate,
                    vec![vec![0.5; samples]; 2],
                    Utc::now() + chrono::Duration::milliseconds((i * 100) as i64),
                    "dev-0",
                    "sess-0",
                    SignalType::Eeg,
                    "test",
                )
                .unwrap()
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn yields_results_once_buffer_fills() {
        let processor = StreamProcessor::new(
            StreamProcessorConfig {
                buffer_ms: 2000.0,
                // Zero cadence classifies on every packet with data.
                cadence_ms: 0.0,
            },
            MemoryMetrics::new(),
        );
        processor.add_classifier(
            "mental_state",
            Box::new(PassthroughExtractor),
            Box::new(crate::classifiers::MentalStateClassifier::new()),
        );

        let input = futures::stream::iter(packets(8, 256.0, 64));
        let results: Vec<ClassificationResult> = processor.process_stream(input).collect().await;

        assert!(!results.is_empty());
        for result in &results {
            assert!((result.probability_sum() - 1.0).abs() <= 1e-6);
            assert!(result.common().latency_ms >= result.common().classify_ms);
        }
        assert_eq!(processor.performance().classifications, results.len() as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_pair_does_not_block_peers() {
        let processor = StreamProcessor::new(
            StreamProcessorConfig {
                buffer_ms: 2000.0,
                cadence_ms: 0.0,
            },
            MemoryMetrics::new(),
        );
        processor.add_classifier(
            "broken",
            Box::new(FailingExtractor),
            Box::new(crate::classifiers::MentalStateClassifier::new()),
        );
        processor.add_classifier(
            "working",
            Box::new(PassthroughExtractor),
            Box::new(crate::classifiers::MentalStateClassifier::new()),
        );

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        processor.set_error_callback(move |e| sink.lock().push(e));

        let input = futures::stream::iter(packets(8, 256.0, 64));
        let results: Vec<ClassificationResult> = processor.process_stream(input).collect().await;

        assert!(!results.is_empty(), "working pipeline still produced");
        assert!(!errors.lock().is_empty(), "errors surfaced out-of-band");
        assert!(processor.performance().errors > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_packets_are_dropped_with_counter() {
        let processor = StreamProcessor::new(
            StreamProcessorConfig {
                buffer_ms: 2000.0,
                cadence_ms: 0.0,
            },
            MemoryMetrics::new(),
        );

        let mut all = packets(2, 256.0, 64);
        // Channel count changes mid-stream; the buffer must reject it.
        all.push(
            SamplePacket::new(
                vec!["C3".into()],
                256.0,
                vec![vec![0.0; 64]],
                Utc::now(),
                "dev-0",
                "sess-0",
                SignalType::Eeg,
                "test",
            )
            .unwrap(),
        );

        let input = futures::stream::iter(all);
        let _: Vec<ClassificationResult> = processor.process_stream(input).collect().await;
        assert_eq!(processor.performance().dropped_packets, 1);
    }

    #[test]
    fn add_remove_classifier() {
        let processor = StreamProcessor::with_defaults();
        processor.add_classifier(
            "a",
            Box::new(PassthroughExtractor),
            Box::new(crate::classifiers::MentalStateClassifier::new()),
        );
        assert_eq!(processor.active_classifiers(), vec!["a".to_string()]);
        assert!(processor.remove_classifier("a"));
        assert!(!processor.remove_classifier("a"));
        assert!(processor.active_classifiers().is_empty());
    }
}
