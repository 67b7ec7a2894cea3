//! Sleep-staging features over a standard 30 s epoch.
//!
//! Works on AASM-labelled EEG/EOG/EMG channel groups: band powers with the
//! sigma band added, spindle and K-complex detection, slow-wave and vertex
//! measures, eye-movement and REM density from EOG, EMG tone, cross-modal
//! coherence, and Hjorth mobility/complexity.

use neuro_core::types::{FeatureKey, FeatureMap, Window};
use neuro_core::NeuroResult;
use neuro_dsp::spectral::{band_coherence, welch_psd};
use neuro_dsp::{filter, stats};

use crate::traits::FeatureExtractor;

use super::{channel_psds, mean_band_power, mean_signal, ALPHA, BETA, DELTA, SIGMA, THETA, TOTAL};

const EEG_NAMES: [&str; 13] = [
    "C3", "C4", "Cz", "F3", "F4", "Fz", "O1", "O2", "P3", "P4", "Pz", "T3", "T4",
];
const EOG_NAMES: [&str; 4] = ["LOC", "ROC", "E1", "E2"];

static KEYS: &[FeatureKey] = &[
    FeatureKey::DeltaPower,
    FeatureKey::ThetaPower,
    FeatureKey::AlphaPower,
    FeatureKey::SigmaPower,
    FeatureKey::BetaPower,
    FeatureKey::SpindleDensity,
    FeatureKey::KComplexCount,
    FeatureKey::SlowWaveAmplitude,
    FeatureKey::DeltaPercentage,
    FeatureKey::VertexWaves,
    FeatureKey::EyeMovementRate,
    FeatureKey::RemDensity,
    FeatureKey::EmgPower,
    FeatureKey::EegEmgCoherence,
    FeatureKey::SpectralEdgeFrequency,
    FeatureKey::HjorthMobility,
    FeatureKey::HjorthComplexity,
];

/// Sleep feature extractor over the AASM 30 s epoch.
#[derive(Debug)]
pub struct SleepFeatures {
    window_ms: f64,
}

impl SleepFeatures {
    pub fn new() -> Self {
        Self { window_ms: 30_000.0 }
    }
}

impl Default for SleepFeatures {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel indices split by modality. Channels with no recognised label are
/// treated as EEG so unlabelled montages still stage.
fn modality_groups(window: &Window) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let mut eeg = Vec::new();
    let mut eog = Vec::new();
    let mut emg = Vec::new();

    for (i, name) in window.channels.iter().enumerate() {
        let upper = name.to_ascii_uppercase();
        if upper.contains("EOG") || EOG_NAMES.iter().any(|n| upper == *n) {
            eog.push(i);
        } else if upper.contains("EMG") || upper.contains("CHIN") {
            emg.push(i);
        } else if EEG_NAMES.iter().any(|n| upper == *n) || upper.contains("EEG") {
            eeg.push(i);
        } else {
            eeg.push(i);
        }
    }
    (eeg, eog, emg)
}

/// Count of threshold runs lasting `min_s..=max_s` seconds.
fn count_runs(mask: &[bool], rate: f64, min_s: f64, max_s: f64) -> usize {
    let mut count = 0;
    let mut run_start: Option<usize> = None;
    for (i, &above) in mask.iter().enumerate() {
        match (above, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                let dur = (i - start) as f64 / rate;
                if dur >= min_s && dur <= max_s {
                    count += 1;
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        let dur = (mask.len() - start) as f64 / rate;
        if dur >= min_s && dur <= max_s {
            count += 1;
        }
    }
    count
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() - 1) as f64 * p / 100.0).round() as usize;
    sorted[idx]
}

/// Spindles: 11-15 Hz bursts whose Hilbert envelope stays above the 85th
/// percentile for 0.5-2 s. Returned as events per minute.
fn spindle_density(eeg: &[f32], rate: f64) -> f64 {
    if eeg.len() < 64 {
        return 0.0;
    }
    let filtered = filter::bandpass_zero_phase(eeg, rate, SIGMA.0, SIGMA.1);
    let envelope = neuro_dsp::analytic::hilbert_envelope(&filtered);
    let threshold = percentile(&envelope, 85.0);
    let mask: Vec<bool> = envelope.iter().map(|&e| e > threshold).collect();
    let count = count_runs(&mask, rate, 0.5, 2.0);
    let minutes = eeg.len() as f64 / rate / 60.0;
    if minutes > 0.0 {
        count as f64 / minutes
    } else {
        0.0
    }
}

/// K-complexes: biphasic deflections of at least 2.5 sigma within 0.5 s in
/// the low-passed (< 10 Hz) signal.
fn k_complex_count(eeg: &[f32], rate: f64) -> usize {
    if eeg.len() < 64 {
        return 0;
    }
    let filtered = filter::lowpass_zero_phase(eeg, rate, 10.0);
    let sd = stats::std_dev(&filtered);
    if sd <= 0.0 {
        return 0;
    }
    let threshold = 2.5 * sd;
    let lookahead = (0.5 * rate) as usize;

    let mut count = 0;
    let mut i = 0;
    while i + lookahead < filtered.len() {
        if filtered[i] < -threshold {
            let ahead = &filtered[i..(i + lookahead).min(filtered.len())];
            if ahead.iter().any(|&v| v > threshold) {
                count += 1;
                i += lookahead; // Refractory period.
                continue;
            }
        }
        i += 1;
    }
    count
}

/// Slow waves: 0.5-2 Hz peaks of at least 75 uV, 0.5 s apart. Returns the
/// mean peak amplitude, 0 when none are found.
fn slow_wave_amplitude(eeg: &[f32], rate: f64) -> f64 {
    if eeg.len() < 64 {
        return 0.0;
    }
    let filtered = filter::bandpass_zero_phase(eeg, rate, DELTA.0, 2.0);
    let min_sep = (0.5 * rate) as usize;

    let mut amplitudes = Vec::new();
    let mut last: Option<usize> = None;
    for i in 1..filtered.len() - 1 {
        if filtered[i] >= 75.0 && filtered[i] >= filtered[i - 1] && filtered[i] >= filtered[i + 1] {
            if let Some(prev) = last {
                if i - prev < min_sep {
                    continue;
                }
            }
            amplitudes.push(filtered[i]);
            last = Some(i);
        }
    }
    if amplitudes.is_empty() {
        0.0
    } else {
        amplitudes.iter().sum::<f64>() / amplitudes.len() as f64
    }
}

/// Vertex waves: sharp negative-to-positive transitions in the 2-8 Hz band.
fn vertex_wave_count(eeg: &[f32], rate: f64) -> usize {
    if eeg.len() < 64 {
        return 0;
    }
    let filtered = filter::bandpass_zero_phase(eeg, rate, 2.0, 8.0);
    let diffs: Vec<f64> = filtered.windows(2).map(|w| w[1] - w[0]).collect();
    let sd = stats::std_dev(&diffs);
    if sd <= 0.0 {
        return 0;
    }
    let threshold = 3.0 * sd;
    let min_sep = (0.3 * rate) as usize;

    let mut count = 0;
    let mut last: Option<usize> = None;
    for i in 0..diffs.len().saturating_sub(1) {
        if diffs[i] < -threshold && diffs[i + 1] > threshold {
            if let Some(prev) = last {
                if i - prev < min_sep {
                    continue;
                }
            }
            count += 1;
            last = Some(i);
        }
    }
    count
}

/// Slow eye movements per minute from the EOG trace.
fn eye_movement_rate(eog: &[f32], rate: f64) -> f64 {
    if eog.len() < 64 {
        return 0.0;
    }
    let filtered = filter::bandpass_zero_phase(eog, rate, 0.3, 2.0);
    let sd = stats::std_dev(&filtered);
    if sd <= 0.0 {
        return 0.0;
    }
    let threshold = 2.0 * sd;
    let gap = (0.2 * rate) as usize;

    let mut movements = 0;
    let mut last: Option<usize> = None;
    for (i, v) in filtered.iter().enumerate() {
        if v.abs() > threshold {
            match last {
                Some(prev) if i - prev <= gap => {}
                _ => movements += 1,
            }
            last = Some(i);
        }
    }
    let minutes = eog.len() as f64 / rate / 60.0;
    if minutes > 0.0 {
        movements as f64 / minutes
    } else {
        0.0
    }
}

/// Fraction of epoch samples with rapid EOG derivative.
fn rem_density(eog: &[f32], rate: f64) -> f64 {
    if eog.len() < 64 {
        return 0.0;
    }
    let filtered = filter::bandpass_zero_phase(eog, rate, 0.5, 5.0);
    let derivative: Vec<f64> = filtered.windows(2).map(|w| w[1] - w[0]).collect();
    let sd = stats::std_dev(&derivative);
    if sd <= 0.0 {
        return 0.0;
    }
    let threshold = 3.0 * sd;
    derivative.iter().filter(|d| d.abs() > threshold).count() as f64 / derivative.len() as f64
}

impl FeatureExtractor for SleepFeatures {
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
        let (eeg_idx, eog_idx, emg_idx) = modality_groups(window);

        let psds = channel_psds(window);
        let total = mean_band_power(&psds, &eeg_idx, TOTAL).max(f64::MIN_POSITIVE);
        let delta = mean_band_power(&psds, &eeg_idx, DELTA) / total;
        map.insert_scalar(FeatureKey::DeltaPower, delta);
        map.insert_scalar(FeatureKey::ThetaPower, mean_band_power(&psds, &eeg_idx, THETA) / total);
        map.insert_scalar(FeatureKey::AlphaPower, mean_band_power(&psds, &eeg_idx, ALPHA) / total);
        map.insert_scalar(FeatureKey::SigmaPower, mean_band_power(&psds, &eeg_idx, SIGMA) / total);
        map.insert_scalar(FeatureKey::BetaPower, mean_band_power(&psds, &eeg_idx, BETA) / total);

        let low_total = mean_band_power(&psds, &eeg_idx, (DELTA.0, 30.0)).max(f64::MIN_POSITIVE);
        map.insert_scalar(
            FeatureKey::DeltaPercentage,
            mean_band_power(&psds, &eeg_idx, DELTA) / low_total,
        );

        let eeg = mean_signal(window, &eeg_idx);
        map.insert_scalar(FeatureKey::SpindleDensity, spindle_density(&eeg, rate));
        map.insert_scalar(FeatureKey::KComplexCount, k_complex_count(&eeg, rate) as f64);
        map.insert_scalar(FeatureKey::SlowWaveAmplitude, slow_wave_amplitude(&eeg, rate));
        map.insert_scalar(FeatureKey::VertexWaves, vertex_wave_count(&eeg, rate) as f64);

        let eeg_psd = welch_psd(&eeg, rate, super::WELCH_SEGMENT.min(eeg.len().max(2)));
        map.insert_scalar(
            FeatureKey::SpectralEdgeFrequency,
            eeg_psd.spectral_edge_frequency(0.95),
        );

        let (_, mobility, complexity) = stats::hjorth(&eeg);
        map.insert_scalar(FeatureKey::HjorthMobility, mobility);
        map.insert_scalar(FeatureKey::HjorthComplexity, complexity);

        if !eog_idx.is_empty() {
            let eog = mean_signal(window, &eog_idx);
            map.insert_scalar(FeatureKey::EyeMovementRate, eye_movement_rate(&eog, rate));
            map.insert_scalar(FeatureKey::RemDensity, rem_density(&eog, rate));
        }

        if !emg_idx.is_empty() {
            let emg = mean_signal(window, &emg_idx);
            // Normalised EMG tone: 0 for atonia, approaching 1 when muscle
            // activity dwarfs the EEG.
            let emg_rms = stats::rms(&emg);
            let eeg_rms = stats::rms(&eeg).max(f64::MIN_POSITIVE);
            map.insert_scalar(FeatureKey::EmgPower, emg_rms / (emg_rms + eeg_rms));
            map.insert_scalar(
                FeatureKey::EegEmgCoherence,
                band_coherence(&eeg, &emg, rate, super::WELCH_SEGMENT, 0.5, 10.0),
            );
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_window(channels: Vec<(&str, Vec<f32>)>, rate: f64) -> Window {
        let n = channels.first().map(|(_, d)| d.len()).unwrap_or(0);
        Window {
            channels: channels.iter().map(|(n, _)| n.to_string()).collect(),
            sampling_rate_hz: rate,
            data: channels.into_iter().map(|(_, d)| d).collect(),
            start_timestamp: Utc::now(),
            duration_ms: n as f64 / rate * 1000.0,
        }
    }

    fn sine(freq: f64, rate: f64, n: usize, amp: f64) -> Vec<f32> {
        (0..n)
            .map(|i| (amp * (2.0 * std::f64::consts::PI * freq * i as f64 / rate).sin()) as f32)
            .collect()
    }

    #[test]
    fn deep_sleep_epoch_is_delta_dominant() {
        let rate = 100.0;
        let n = 3000; // 30 s
        let window = make_window(
            vec![
                ("C3", sine(1.0, rate, n, 100.0)),
                ("C4", sine(1.2, rate, n, 100.0)),
                ("EMG1", sine(30.0, rate, n, 0.5)),
            ],
            rate,
        );
        let mut extractor = SleepFeatures::new();
        let map = extractor.extract(&window).unwrap();

        assert!(map.mean(FeatureKey::DeltaPercentage).unwrap() > 0.7);
        assert!(map.mean(FeatureKey::SlowWaveAmplitude).unwrap() >= 75.0);
        assert!(map.mean(FeatureKey::EmgPower).unwrap() < 0.3);
    }

    #[test]
    fn spindle_train_registers_density() {
        let rate = 100.0;
        let n = 3000;
        // 0.8 s spindle bursts at 13 Hz every 7.5 s on a slow background;
        // bursts cover ~11% of the epoch so the envelope's 85th percentile
        // stays below burst level.
        let mut eeg = sine(2.0, rate, n, 20.0);
        for burst in 0..4 {
            let start = burst * 750;
            for i in 0..80 {
                let t = i as f64 / rate;
                eeg[start + i] +=
                    (40.0 * (2.0 * std::f64::consts::PI * 13.0 * t).sin()) as f32;
            }
        }
        let window = make_window(vec![("C3", eeg)], rate);
        let mut extractor = SleepFeatures::new();
        let map = extractor.extract(&window).unwrap();
        assert!(
            map.mean(FeatureKey::SpindleDensity).unwrap() > 2.0,
            "density {}",
            map.mean(FeatureKey::SpindleDensity).unwrap()
        );
    }

    #[test]
    fn eog_features_only_with_eog_channels() {
        let rate = 100.0;
        let window = make_window(vec![("C3", sine(2.0, rate, 3000, 30.0))], rate);
        let mut extractor = SleepFeatures::new();
        let map = extractor.extract(&window).unwrap();
        assert!(map.mean(FeatureKey::RemDensity).is_none());
        assert!(map.mean(FeatureKey::EmgPower).is_none());
    }
}
