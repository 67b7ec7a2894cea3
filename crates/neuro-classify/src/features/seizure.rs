//! Seizure-prediction feature battery: spectral edge, line length, Hjorth
//! parameters, nonlinear energy, wavelet sub-band energies, phase
//! synchronisation, coherence, entropies, per-channel spike statistics, and
//! the iteration-to-iteration feature velocity.

use std::collections::BTreeMap;

use neuro_core::types::{FeatureKey, FeatureMap, Window};
use neuro_core::NeuroResult;
use neuro_dsp::analytic::phase_locking_value;
use neuro_dsp::spectral::{band_coherence, welch_psd};
use neuro_dsp::wavelet::{db4_subband_energies, wavelet_entropy};
use neuro_dsp::{filter, stats};

use crate::traits::FeatureExtractor;

use super::{mean_signal, BETA};

/// Spike detection threshold in standard deviations.
const SPIKE_SIGMA: f64 = 3.5;
/// Minimum spike separation in seconds.
const SPIKE_SEPARATION_S: f64 = 0.020;
/// Wavelet decomposition depth.
const WAVELET_LEVELS: usize = 6;
/// Entropy computations subsample to this many points to bound the O(n^2)
/// template matching.
const ENTROPY_MAX_SAMPLES: usize = 512;
/// At most this many channels participate in pairwise synchrony measures.
const MAX_SYNC_CHANNELS: usize = 8;

static KEYS: &[FeatureKey] = &[
    FeatureKey::SpectralEdgeFrequency,
    FeatureKey::LineLength,
    FeatureKey::HjorthActivity,
    FeatureKey::HjorthMobility,
    FeatureKey::HjorthComplexity,
    FeatureKey::NonlinearEnergy,
    FeatureKey::WaveletEnergies,
    FeatureKey::WaveletEntropy,
    FeatureKey::PhaseSynchronization,
    FeatureKey::BetaCoherence,
    FeatureKey::SampleEntropy,
    FeatureKey::ApproximateEntropy,
    FeatureKey::SpikeRate,
    FeatureKey::SpikeAmplitude,
    FeatureKey::FeatureVelocity,
];

/// Seizure feature extractor; keeps the previous iteration's scalar
/// features to derive a feature velocity.
#[derive(Debug)]
pub struct SeizureFeatures {
    window_ms: f64,
    previous_scalars: Option<BTreeMap<FeatureKey, f64>>,
}

impl SeizureFeatures {
    pub fn new() -> Self {
        Self {
            window_ms: 2000.0,
            previous_scalars: None,
        }
    }
}

impl Default for SeizureFeatures {
    fn default() -> Self {
        Self::new()
    }
}

fn subsample(signal: &[f32], max_len: usize) -> Vec<f32> {
    if signal.len() <= max_len {
        return signal.to_vec();
    }
    let stride = signal.len().div_ceil(max_len);
    signal.iter().step_by(stride).copied().collect()
}

impl FeatureExtractor for SeizureFeatures {
    fn required_window_ms(&self) -> f64 {
        self.window_ms
    }

    fn feature_keys(&self) -> &'static [FeatureKey] {
        KEYS
    }

    fn extract(&mut self, window: &Window) -> NeuroResult<FeatureMap> {
        if window.has_non_finite() {
            return Ok(FeatureMap::unusable(window.start_timestamp, self.window_ms));
        }

        let mut map = FeatureMap::new(window.start_timestamp, self.window_ms);
        let rate = window.sampling_rate_hz;
        let all: Vec<usize> = (0..window.n_channels()).collect();
        let pooled = mean_signal(window, &all);
        let duration_s = pooled.len() as f64 / rate;

        // Spectral edge averaged over channels.
        let sefs: Vec<f64> = window
            .data
            .iter()
            .map(|ch| {
                welch_psd(ch, rate, super::WELCH_SEGMENT.min(ch.len().max(2)))
                    .spectral_edge_frequency(0.95)
            })
            .collect();
        if !sefs.is_empty() {
            map.insert_scalar(
                FeatureKey::SpectralEdgeFrequency,
                sefs.iter().sum::<f64>() / sefs.len() as f64,
            );
        }

        // Line length per second, averaged over channels.
        let line_lengths: Vec<f64> = window.data.iter().map(|ch| stats::line_length(ch)).collect();
        if !line_lengths.is_empty() && duration_s > 0.0 {
            map.insert_scalar(
                FeatureKey::LineLength,
                line_lengths.iter().sum::<f64>() / line_lengths.len() as f64 / duration_s,
            );
        }

        let (activity, mobility, complexity) = stats::hjorth(&pooled);
        map.insert_scalar(FeatureKey::HjorthActivity, activity);
        map.insert_scalar(FeatureKey::HjorthMobility, mobility);
        map.insert_scalar(FeatureKey::HjorthComplexity, complexity);
        map.insert_scalar(FeatureKey::NonlinearEnergy, stats::nonlinear_energy(&pooled));

        let energies = db4_subband_energies(&pooled, WAVELET_LEVELS);
        let total_energy: f64 = energies.iter().sum::<f64>().max(f64::MIN_POSITIVE);
        let fractions: Vec<f64> = energies.iter().map(|e| e / total_energy).collect();
        map.insert_scalar(FeatureKey::WaveletEntropy, wavelet_entropy(&energies));
        map.insert_vector(FeatureKey::WaveletEnergies, fractions);

        // Pairwise synchrony over the 4-30 Hz band, bounded channel count.
        let sync_channels = all.len().min(MAX_SYNC_CHANNELS);
        if sync_channels >= 2 {
            let filtered: Vec<Vec<f64>> = (0..sync_channels)
                .map(|i| filter::bandpass_zero_phase(&window.data[i], rate, 4.0, 30.0))
                .collect();
            let mut plvs = Vec::new();
            let mut coherences = Vec::new();
            for i in 0..sync_channels {
                for j in (i + 1)..sync_channels {
                    plvs.push(phase_locking_value(&filtered[i], &filtered[j]));
                    coherences.push(band_coherence(
                        &window.data[i],
                        &window.data[j],
                        rate,
                        super::WELCH_SEGMENT,
                        BETA.0,
                        BETA.1,
                    ));
                }
            }
            map.insert_scalar(
                FeatureKey::PhaseSynchronization,
                plvs.iter().sum::<f64>() / plvs.len() as f64,
            );
            map.insert_scalar(
                FeatureKey::BetaCoherence,
                coherences.iter().sum::<f64>() / coherences.len() as f64,
            );
        }

        let entropy_signal = subsample(&pooled, ENTROPY_MAX_SAMPLES);
        map.insert_scalar(
            FeatureKey::SampleEntropy,
            stats::sample_entropy(&entropy_signal, 2, 0.2),
        );
        map.insert_scalar(
            FeatureKey::ApproximateEntropy,
            stats::approximate_entropy(&entropy_signal, 2, 0.2),
        );

        // Per-channel spike statistics.
        let min_sep = ((SPIKE_SEPARATION_S * rate) as usize).max(1);
        let mut rates = Vec::with_capacity(window.n_channels());
        let mut amplitudes = Vec::new();
        for ch in &window.data {
            let spikes = stats::detect_spikes(ch, SPIKE_SIGMA, min_sep);
            rates.push(if duration_s > 0.0 {
                spikes.len() as f64 / duration_s
            } else {
                0.0
            });
            amplitudes.extend(spikes.iter().map(|&i| ch[i].abs() as f64));
        }
        map.insert_vector(FeatureKey::SpikeRate, rates);
        map.insert_scalar(
            FeatureKey::SpikeAmplitude,
            if amplitudes.is_empty() {
                0.0
            } else {
                amplitudes.iter().sum::<f64>() / amplitudes.len() as f64
            },
        );

        // Mean relative scalar change against the previous iteration, so
        // the velocity stays comparable across features of different scale.
        let scalars: BTreeMap<FeatureKey, f64> = map
            .features
            .iter()
            .filter(|(_, v)| v.len() == 1)
            .map(|(k, v)| (*k, v[0]))
            .collect();
        let velocity = match &self.previous_scalars {
            Some(prev) => {
                let deltas: Vec<f64> = scalars
                    .iter()
                    .filter_map(|(k, v)| {
                        prev.get(k)
                            .map(|p| ((v - p).abs() / (p.abs() + 1e-9)).min(5.0))
                    })
                    .collect();
                if deltas.is_empty() {
                    0.0
                } else {
                    deltas.iter().sum::<f64>() / deltas.len() as f64
                }
            }
            None => 0.0,
        };
        map.insert_scalar(FeatureKey::FeatureVelocity, velocity);
        self.previous_scalars = Some(scalars);

        Ok(map)
    }
}
