//! EEG features for mental-state classification: band powers, ratios,
//! frontal and hemispheric asymmetries, spectral entropy, and derived
//! attention/relaxation indices.

use neuro_core::types::{FeatureKey, FeatureMap, Window};
use neuro_core::NeuroResult;

use crate::traits::FeatureExtractor;

use super::{
    channel_psds, extreme_sample_fraction, mean_band_power, named_indices, ALPHA, BETA, DELTA,
    GAMMA, THETA, TOTAL,
};

/// Left/right electrode pairs used for the general alpha asymmetry average.
const ASYMMETRY_PAIRS: [(&str, &str); 5] = [
    ("F3", "F4"),
    ("C3", "C4"),
    ("P3", "P4"),
    ("T3", "T4"),
    ("O1", "O2"),
];

const FRONTAL: [&str; 5] = ["F3", "F4", "Fz", "Fp1", "Fp2"];

static KEYS: &[FeatureKey] = &[
    FeatureKey::DeltaPower,
    FeatureKey::ThetaPower,
    FeatureKey::AlphaPower,
    FeatureKey::BetaPower,
    FeatureKey::GammaPower,
    FeatureKey::BetaAlphaRatio,
    FeatureKey::ThetaBetaRatio,
    FeatureKey::AlphaThetaRatio,
    FeatureKey::FrontalTheta,
    FeatureKey::FrontalAlphaAsymmetry,
    FeatureKey::AlphaAsymmetry,
    FeatureKey::SpectralEntropy,
    FeatureKey::AttentionIndex,
    FeatureKey::RelaxationIndex,
    FeatureKey::MuscleArtifacts,
];

/// Mental-state feature extractor. Stateless; 1 s windows by default.
#[derive(Debug)]
pub struct MentalStateFeatures {
    window_ms: f64,
}

impl MentalStateFeatures {
    pub fn new() -> Self {
        Self { window_ms: 1000.0 }
    }

    pub fn with_window_ms(window_ms: f64) -> Self {
        Self { window_ms }
    }
}

impl Default for MentalStateFeatures {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for MentalStateFeatures {
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
        let psds = channel_psds(window);
        let all: Vec<usize> = (0..window.n_channels()).collect();

        let total = mean_band_power(&psds, &all, TOTAL).max(f64::MIN_POSITIVE);
        let delta = mean_band_power(&psds, &all, DELTA) / total;
        let theta = mean_band_power(&psds, &all, THETA) / total;
        let alpha = mean_band_power(&psds, &all, ALPHA) / total;
        let beta = mean_band_power(&psds, &all, BETA) / total;
        let gamma = mean_band_power(&psds, &all, GAMMA) / total;

        map.insert_scalar(FeatureKey::DeltaPower, delta);
        map.insert_scalar(FeatureKey::ThetaPower, theta);
        map.insert_scalar(FeatureKey::AlphaPower, alpha);
        map.insert_scalar(FeatureKey::BetaPower, beta);
        map.insert_scalar(FeatureKey::GammaPower, gamma);

        let eps = 1e-9;
        map.insert_scalar(FeatureKey::BetaAlphaRatio, beta / (alpha + eps));
        map.insert_scalar(FeatureKey::ThetaBetaRatio, theta / (beta + eps));
        map.insert_scalar(FeatureKey::AlphaThetaRatio, alpha / (theta + eps));
        map.insert_scalar(FeatureKey::AttentionIndex, (theta + beta) / (alpha + eps));
        map.insert_scalar(FeatureKey::RelaxationIndex, alpha / (alpha + beta + eps));

        // Spatial features require AASM electrode names; absent channels
        // simply leave the keys out.
        let frontal = named_indices(window, &FRONTAL);
        if !frontal.is_empty() {
            let frontal_total = mean_band_power(&psds, &frontal, TOTAL).max(f64::MIN_POSITIVE);
            let frontal_theta = mean_band_power(&psds, &frontal, THETA) / frontal_total;
            map.insert_scalar(FeatureKey::FrontalTheta, frontal_theta);
        }

        if let (Some(f3), Some(f4)) = (window.channel_index("F3"), window.channel_index("F4")) {
            let alpha_f3 = psds[f3].band_power(ALPHA.0, ALPHA.1);
            let alpha_f4 = psds[f4].band_power(ALPHA.0, ALPHA.1);
            if alpha_f3 > 0.0 && alpha_f4 > 0.0 {
                map.insert_scalar(
                    FeatureKey::FrontalAlphaAsymmetry,
                    alpha_f4.ln() - alpha_f3.ln(),
                );
            }
        }

        let mut asymmetries = Vec::new();
        for (left, right) in ASYMMETRY_PAIRS {
            if let (Some(l), Some(r)) = (window.channel_index(left), window.channel_index(right)) {
                let a_l = psds[l].band_power(ALPHA.0, ALPHA.1);
                let a_r = psds[r].band_power(ALPHA.0, ALPHA.1);
                if a_l > 0.0 && a_r > 0.0 {
                    asymmetries.push(a_r.ln() - a_l.ln());
                }
            }
        }
        if !asymmetries.is_empty() {
            map.insert_scalar(
                FeatureKey::AlphaAsymmetry,
                asymmetries.iter().sum::<f64>() / asymmetries.len() as f64,
            );
        }

        // Shannon entropy of the normalised spectrum, scaled to 0..1.
        let entropies: Vec<f64> = psds
            .iter()
            .filter(|p| p.power.len() > 1)
            .map(|p| p.spectral_entropy() / (p.power.len() as f64).ln())
            .collect();
        if !entropies.is_empty() {
            map.insert_scalar(
                FeatureKey::SpectralEntropy,
                entropies.iter().sum::<f64>() / entropies.len() as f64,
            );
        }

        // High-frequency contamination stands in for EMG artifact load.
        map.insert_scalar(FeatureKey::MuscleArtifacts, (gamma * 3.0).clamp(0.0, 1.0));

        let artifact_fraction = extreme_sample_fraction(window, 5.0);
        map.signal_quality = (1.0 - artifact_fraction * 10.0).clamp(0.0, 1.0);

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sine_window(freq: f64, channels: &[&str], rate: f64, n: usize) -> Window {
        let data: Vec<Vec<f32>> = (0..channels.len())
            .map(|_| {
                (0..n)
                    .map(|i| {
                        (10.0 * (2.0 * std::f64::consts::PI * freq * i as f64 / rate).sin()) as f32
                    })
                    .collect()
            })
            .collect();
        Window {
            channels: channels.iter().map(|s| s.to_string()).collect(),
            sampling_rate_hz: rate,
            data,
            start_timestamp: Utc::now(),
            duration_ms: n as f64 / rate * 1000.0,
        }
    }

    #[test]
    fn alpha_tone_dominates_alpha_band() {
        let mut extractor = MentalStateFeatures::new();
        let window = sine_window(10.0, &["F3", "F4", "C3", "C4"], 256.0, 256);
        let map = extractor.extract(&window).unwrap();

        let alpha = map.mean(FeatureKey::AlphaPower).unwrap();
        let beta = map.mean(FeatureKey::BetaPower).unwrap();
        assert!(alpha > beta, "alpha {} beta {}", alpha, beta);
        assert!(map.mean(FeatureKey::BetaAlphaRatio).unwrap() < 1.0);
    }

    #[test]
    fn named_channels_produce_spatial_features() {
        let mut extractor = MentalStateFeatures::new();
        let window = sine_window(10.0, &["F3", "F4"], 256.0, 256);
        let map = extractor.extract(&window).unwrap();
        assert!(map.mean(FeatureKey::FrontalTheta).is_some());
        assert!(map.mean(FeatureKey::FrontalAlphaAsymmetry).is_some());
    }

    #[test]
    fn anonymous_channels_skip_spatial_features() {
        let mut extractor = MentalStateFeatures::new();
        let window = sine_window(10.0, &["ch_0", "ch_1"], 256.0, 256);
        let map = extractor.extract(&window).unwrap();
        assert!(map.mean(FeatureKey::FrontalTheta).is_none());
        assert!(map.mean(FeatureKey::AlphaAsymmetry).is_none());
    }

    #[test]
    fn non_finite_window_is_flagged_unusable() {
        let mut extractor = MentalStateFeatures::new();
        let mut window = sine_window(10.0, &["F3"], 256.0, 256);
        window.data[0][5] = f32::INFINITY;
        let map = extractor.extract(&window).unwrap();
        assert!(!map.is_usable());
    }
}
