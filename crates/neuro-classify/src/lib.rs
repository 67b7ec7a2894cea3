//! Streaming classification engine.
//!
//! Feature extractors turn signal windows into typed feature maps, and
//! classifiers turn feature maps into labelled results with probability
//! vectors. The [`processor::StreamProcessor`] drives both over a ring
//! buffer at a fixed cadence, fanning out to every registered pair.
//!
//! Extraction and classification are synchronous CPU work by design; only
//! the stream orchestration is async.

pub mod classifiers;
pub mod features;
pub mod processor;
pub mod traits;

pub use processor::{PipelineError, StreamProcessor, StreamProcessorConfig};
pub use traits::{Classifier, ClassifierMetrics, FeatureExtractor};

/// Logistic squashing used by all threshold-based scorers.
pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
