//! Deterministic signal-processing kernels.
//!
//! Everything here is a pure function over sample slices: given the same
//! signal and configuration the output is identical. No hidden state, no
//! I/O. The feature extractors and the signal-quality monitor are the only
//! consumers.

pub mod analytic;
pub mod filter;
pub mod quality;
pub mod spectral;
pub mod stats;
pub mod wavelet;

/// Convert an f32 sample slice into the f64 working domain.
pub(crate) fn to_f64(signal: &[f32]) -> Vec<f64> {
    signal.iter().map(|&v| v as f64).collect()
}
