//! Feature extractors, one per classification family.
//!
//! Each extractor declares its required window and its static keyspace, and
//! computes features with the kernels from `neuro-dsp`. Shared band maths
//! and channel-group helpers live here.

mod mental_state;
mod motor_imagery;
mod seizure;
mod sleep;

pub use mental_state::MentalStateFeatures;
pub use motor_imagery::MotorImageryFeatures;
pub use seizure::SeizureFeatures;
pub use sleep::SleepFeatures;

use neuro_core::types::Window;
use neuro_dsp::spectral::{welch_psd, Psd};

/// EEG band edges in Hz.
pub(crate) const DELTA: (f64, f64) = (0.5, 4.0);
pub(crate) const THETA: (f64, f64) = (4.0, 8.0);
pub(crate) const ALPHA: (f64, f64) = (8.0, 13.0);
pub(crate) const SIGMA: (f64, f64) = (11.0, 15.0);
pub(crate) const BETA: (f64, f64) = (13.0, 30.0);
pub(crate) const GAMMA: (f64, f64) = (30.0, 45.0);
pub(crate) const MU: (f64, f64) = (8.0, 12.0);
pub(crate) const SMR: (f64, f64) = (12.0, 15.0);
pub(crate) const TOTAL: (f64, f64) = (0.5, 45.0);

pub(crate) const WELCH_SEGMENT: usize = 256;

/// One PSD per channel.
pub(crate) fn channel_psds(window: &Window) -> Vec<Psd> {
    window
        .data
        .iter()
        .map(|ch| welch_psd(ch, window.sampling_rate_hz, WELCH_SEGMENT.min(ch.len().max(2))))
        .collect()
}

/// Mean absolute band power across a set of channel PSDs.
pub(crate) fn mean_band_power(psds: &[Psd], indices: &[usize], band: (f64, f64)) -> f64 {
    let powers: Vec<f64> = indices
        .iter()
        .filter_map(|&i| psds.get(i))
        .map(|p| p.band_power(band.0, band.1))
        .collect();
    if powers.is_empty() {
        0.0
    } else {
        powers.iter().sum::<f64>() / powers.len() as f64
    }
}

/// Indices of channels whose name matches one of `names` (case-insensitive).
pub(crate) fn named_indices(window: &Window, names: &[&str]) -> Vec<usize> {
    names
        .iter()
        .filter_map(|n| window.channel_index(n))
        .collect()
}

/// Sample-wise mean across the given channels.
pub(crate) fn mean_signal(window: &Window, indices: &[usize]) -> Vec<f32> {
    let n = window.n_samples();
    if indices.is_empty() || n == 0 {
        return Vec::new();
    }
    let mut out = vec![0.0f32; n];
    for &i in indices {
        if let Some(ch) = window.channel(i) {
            for (o, v) in out.iter_mut().zip(ch) {
                *o += v;
            }
        }
    }
    let scale = 1.0 / indices.len() as f32;
    out.iter_mut().for_each(|v| *v *= scale);
    out
}

/// Fraction of samples beyond `k` standard deviations, pooled over channels.
pub(crate) fn extreme_sample_fraction(window: &Window, k: f64) -> f64 {
    let mut extreme = 0usize;
    let mut total = 0usize;
    for ch in &window.data {
        let x: Vec<f64> = ch.iter().map(|&v| v as f64).collect();
        let mean = x.iter().sum::<f64>() / x.len().max(1) as f64;
        let var = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / x.len().max(1) as f64;
        let sd = var.sqrt();
        if sd <= 0.0 {
            total += ch.len();
            continue;
        }
        extreme += x.iter().filter(|v| (*v - mean).abs() > k * sd).count();
        total += ch.len();
    }
    if total == 0 {
        0.0
    } else {
        extreme as f64 / total as f64
    }
}
