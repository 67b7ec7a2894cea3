//! Core types and shared primitives for the neurostream platform.
//!
//! Everything the domain crates agree on lives here: sample packets and
//! windows, feature maps with a closed keyspace, classification results,
//! signal-quality types, the per-stream ring buffer, and the metrics sink
//! abstraction injected into the pipeline and the ledger.

pub mod buffer;
pub mod error;
pub mod metrics;
pub mod quality;
pub mod types;

pub use buffer::RingBuffer;
pub use error::{DeviceError, DeviceErrorKind, NeuroError, NeuroResult};
pub use metrics::MetricsSink;
