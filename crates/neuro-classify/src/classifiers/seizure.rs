//! Per-patient seizure prediction.
//!
//! Eight indicator scores are compared against an exponential-moving-average
//! baseline and combined by fixed weights into a probability, which recent
//! seizure history can raise further. A five-minute exponential window
//! smooths the output, except that a raw IMMINENT reading always overrides
//! the smoothing: sensitivity beats stability at the top of the scale.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use neuro_core::types::{
    ClassificationResult, FeatureKey, FeatureMap, ResultCommon, SeizurePrediction, SeizureRisk,
};
use neuro_core::NeuroResult;

use crate::sigmoid;
use crate::traits::{Classifier, ClassifierMetrics, LatencyTracker};

/// Risk thresholds on the combined probability.
const IMMINENT_THRESHOLD: f64 = 0.85;
const HIGH_THRESHOLD: f64 = 0.60;
const MEDIUM_THRESHOLD: f64 = 0.35;

/// Indicator weights; spike rate carries the most evidence.
const W_SPECTRAL_EDGE: f64 = 0.15;
const W_LINE_LENGTH: f64 = 0.12;
const W_WAVELET: f64 = 0.10;
const W_PHASE_SYNC: f64 = 0.15;
const W_HJORTH: f64 = 0.08;
const W_ENTROPY: f64 = 0.10;
const W_COHERENCE: f64 = 0.12;
const W_SPIKE_RATE: f64 = 0.18;

/// Baseline EMA learning rate; frozen while risk is High or above.
const BASELINE_ALPHA: f64 = 0.1;
/// Smoothing window length in seconds.
const SMOOTHING_WINDOW_SECS: i64 = 5 * 60;
/// A seizure within this many seconds raises the probability.
const RECENT_SEIZURE_HORIZON_SECS: i64 = 24 * 60 * 60;
/// Maximum probability contribution of recent seizure history.
const HISTORY_BOOST: f64 = 0.3;

const RISKS: [SeizureRisk; 4] = [
    SeizureRisk::Low,
    SeizureRisk::Medium,
    SeizureRisk::High,
    SeizureRisk::Imminent,
];

/// Seizure predictor bound to one patient. Baseline, smoothing history, and
/// seizure timestamps are all per-instance state.
pub struct SeizurePredictor {
    patient_id: String,
    baseline: BTreeMap<FeatureKey, f64>,
    probability_history: VecDeque<(DateTime<Utc>, f64)>,
    seizure_timestamps: Vec<DateTime<Utc>>,
    tracker: LatencyTracker,
}

impl SeizurePredictor {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            baseline: BTreeMap::new(),
            probability_history: VecDeque::new(),
            seizure_timestamps: Vec::new(),
            tracker: LatencyTracker::default(),
        }
    }

    /// Record a confirmed seizure; subsequent predictions weigh it for the
    /// next 24 hours.
    pub fn record_seizure(&mut self, at: DateTime<Utc>) {
        self.seizure_timestamps.push(at);
    }

    fn baseline_ratio(&self, key: FeatureKey, current: f64) -> Option<f64> {
        let base = self.baseline.get(&key)?;
        if *base <= 0.0 {
            return None;
        }
        Some(current / base)
    }

    /// Indicator scores in 0..1, each monotone in its seizure direction.
    /// An indicator with no usable evidence contributes a neutral 0.5.
    fn indicator_scores(&self, features: &FeatureMap) -> Vec<(f64, f64)> {
        let mut scores = Vec::with_capacity(8);

        // 1. Spectral edge frequency decreases pre-ictally. A 10 % drop is
        // the scoring midpoint; an unchanged signal scores below neutral.
        let sef_score = features
            .mean(FeatureKey::SpectralEdgeFrequency)
            .and_then(|sef| self.baseline_ratio(FeatureKey::SpectralEdgeFrequency, sef))
            .map(|ratio| sigmoid(((1.0 - ratio) - 0.1) * 10.0))
            .unwrap_or(0.5);
        scores.push((sef_score, W_SPECTRAL_EDGE));

        // 2. Line length grows; midpoint at a 20 % increase.
        let ll_score = features
            .mean(FeatureKey::LineLength)
            .and_then(|ll| self.baseline_ratio(FeatureKey::LineLength, ll))
            .map(|ratio| sigmoid((ratio - 1.2) * 5.0))
            .unwrap_or(0.5);
        scores.push((ll_score, W_LINE_LENGTH));

        // 3. Wavelet energy concentrates in the low-frequency bands.
        let wavelet_score = features
            .vector(FeatureKey::WaveletEnergies)
            .filter(|f| f.len() >= 2)
            .map(|fractions| {
                let low: f64 = fractions[fractions.len() - 2..].iter().sum();
                sigmoid((low - 0.5) * 10.0)
            })
            .unwrap_or(0.5);
        scores.push((wavelet_score, W_WAVELET));

        // 4. Hypersynchrony.
        let sync_score = features
            .mean(FeatureKey::PhaseSynchronization)
            .map(|sync| sigmoid((sync - 0.5) * 8.0))
            .unwrap_or(0.5);
        scores.push((sync_score, W_PHASE_SYNC));

        // 5. Hjorth complexity collapses; midpoint at a 10 % drop.
        let hjorth_score = features
            .mean(FeatureKey::HjorthComplexity)
            .and_then(|c| self.baseline_ratio(FeatureKey::HjorthComplexity, c))
            .map(|ratio| sigmoid(((1.0 - ratio) - 0.1) * 8.0))
            .unwrap_or(0.5);
        scores.push((hjorth_score, W_HJORTH));

        // 6. Entropy drops as the signal becomes more ordered.
        let entropy_score = features
            .mean(FeatureKey::SampleEntropy)
            .and_then(|e| self.baseline_ratio(FeatureKey::SampleEntropy, e))
            .map(|ratio| sigmoid(((1.0 - ratio) - 0.1) * 8.0))
            .unwrap_or(0.5);
        scores.push((entropy_score, W_ENTROPY));

        // 7. Beta-band coherence rises.
        let coherence_score = features
            .mean(FeatureKey::BetaCoherence)
            .map(|c| sigmoid((c - 0.4) * 10.0))
            .unwrap_or(0.5);
        scores.push((coherence_score, W_COHERENCE));

        // 8. Spike rate relative to baseline.
        let spike_score = features
            .mean(FeatureKey::SpikeRate)
            .map(|rate| {
                let base = self
                    .baseline
                    .get(&FeatureKey::SpikeRate)
                    .copied()
                    .filter(|b| *b > 0.0)
                    .unwrap_or(0.1);
                sigmoid((rate / base - 1.5) * 2.0)
            })
            .unwrap_or(0.5);
        scores.push((spike_score, W_SPIKE_RATE));

        scores
    }

    fn recent_seizure_factor(&self, now: DateTime<Utc>) -> f64 {
        let horizon_ms = (RECENT_SEIZURE_HORIZON_SECS * 1000) as f64;
        self.seizure_timestamps
            .iter()
            .filter_map(|t| {
                let age = now.signed_duration_since(*t);
                if age >= Duration::zero() && age.num_seconds() <= RECENT_SEIZURE_HORIZON_SECS {
                    Some(1.0 - age.num_milliseconds() as f64 / horizon_ms)
                } else {
                    None
                }
            })
            .fold(0.0, f64::max)
    }

    fn risk_level(probability: f64) -> SeizureRisk {
        if probability >= IMMINENT_THRESHOLD {
            SeizureRisk::Imminent
        } else if probability >= HIGH_THRESHOLD {
            SeizureRisk::High
        } else if probability >= MEDIUM_THRESHOLD {
            SeizureRisk::Medium
        } else {
            SeizureRisk::Low
        }
    }

    fn risk_band(risk: SeizureRisk) -> (f64, f64) {
        match risk {
            SeizureRisk::Low => (0.0, MEDIUM_THRESHOLD),
            SeizureRisk::Medium => (MEDIUM_THRESHOLD, HIGH_THRESHOLD),
            SeizureRisk::High => (HIGH_THRESHOLD, IMMINENT_THRESHOLD),
            SeizureRisk::Imminent => (IMMINENT_THRESHOLD, 1.0),
        }
    }

    /// Probability mass over the four risk levels. The containing band gets
    /// full membership; neighbours fall off with distance, so the argmax is
    /// always the level that `risk_level` reports.
    fn risk_probabilities(probability: f64) -> BTreeMap<SeizureRisk, f64> {
        let mut memberships = Vec::with_capacity(4);
        for risk in RISKS {
            let (lo, hi) = Self::risk_band(risk);
            let membership = if probability >= lo && probability < hi
                || (risk == SeizureRisk::Imminent && probability >= hi)
            {
                1.0
            } else {
                let distance = if probability < lo {
                    lo - probability
                } else {
                    probability - hi
                };
                (1.0 - (distance + 0.05) / 0.3).max(0.0)
            };
            memberships.push((risk, membership));
        }
        let total: f64 = memberships.iter().map(|(_, m)| m).sum();
        memberships
            .into_iter()
            .map(|(r, m)| (r, m / total))
            .collect()
    }

    fn time_to_seizure(probability: f64, velocity: f64) -> Option<f64> {
        if probability < HIGH_THRESHOLD {
            return None;
        }
        let base_minutes = if probability >= IMMINENT_THRESHOLD {
            10.0
        } else {
            30.0 - (probability - HIGH_THRESHOLD) * 20.0 / (IMMINENT_THRESHOLD - HIGH_THRESHOLD)
        };
        let adjusted = base_minutes * (1.0 - velocity.min(1.0) * 0.5);
        Some(adjusted.max(5.0))
    }

    fn spatial_focus(features: &FeatureMap) -> Option<Vec<usize>> {
        let rates = features.vector(FeatureKey::SpikeRate)?;
        if rates.len() < 2 {
            return None;
        }
        let mean = rates.iter().sum::<f64>() / rates.len() as f64;
        let var = rates.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / rates.len() as f64;
        let sd = var.sqrt();
        if sd <= 0.0 {
            return None;
        }
        let focus: Vec<usize> = rates
            .iter()
            .enumerate()
            .filter(|(_, r)| **r > mean + 2.0 * sd)
            .map(|(i, _)| i)
            .collect();
        if focus.is_empty() {
            None
        } else {
            Some(focus)
        }
    }

    fn smooth(&mut self, now: DateTime<Utc>, probability: f64) -> f64 {
        // Drop history outside the smoothing window.
        while let Some((t, _)) = self.probability_history.front() {
            if now.signed_duration_since(*t).num_seconds() > SMOOTHING_WINDOW_SECS {
                self.probability_history.pop_front();
            } else {
                break;
            }
        }

        let smoothed = if self.probability_history.len() >= 2 {
            let n = self.probability_history.len();
            let mut acc = 0.0;
            let mut weight_sum = 0.0;
            for (i, (_, p)) in self.probability_history.iter().enumerate() {
                let w = (i as f64 / (n - 1) as f64).exp();
                acc += w * p;
                weight_sum += w;
            }
            let history_avg = acc / weight_sum;
            probability * 0.7 + history_avg * 0.3
        } else {
            probability
        };

        self.probability_history.push_back((now, probability));

        // Current IMMINENT overrides smoothing: high sensitivity at the top.
        if probability >= IMMINENT_THRESHOLD {
            probability
        } else {
            smoothed
        }
    }

    fn update_baseline(&mut self, features: &FeatureMap) {
        for key in [
            FeatureKey::SpectralEdgeFrequency,
            FeatureKey::LineLength,
            FeatureKey::HjorthComplexity,
            FeatureKey::SampleEntropy,
        ] {
            if let Some(v) = features.mean(key) {
                self.baseline
                    .entry(key)
                    .and_modify(|b| *b = (1.0 - BASELINE_ALPHA) * *b + BASELINE_ALPHA * v)
                    .or_insert(v);
            }
        }
        if let Some(rate) = features.mean(FeatureKey::SpikeRate) {
            self.baseline
                .entry(FeatureKey::SpikeRate)
                .and_modify(|b| *b = (1.0 - BASELINE_ALPHA) * *b + BASELINE_ALPHA * rate)
                .or_insert(rate);
        }
    }
}

impl Classifier for SeizurePredictor {
    fn classify(&mut self, features: &FeatureMap) -> NeuroResult<ClassificationResult> {
        let start = Instant::now();

        if !features.is_usable() {
            let mut probabilities = BTreeMap::new();
            probabilities.insert(SeizureRisk::Low, 1.0);
            return Ok(ClassificationResult::Seizure(SeizurePrediction {
                common: ResultCommon {
                    timestamp: features.timestamp,
                    confidence: 0.0,
                    latency_ms: 0.0,
                    extract_ms: 0.0,
                    classify_ms: start.elapsed().as_secs_f64() * 1000.0,
                    metadata: BTreeMap::new(),
                },
                risk_level: SeizureRisk::Low,
                probabilities,
                probability: 0.0,
                time_to_seizure_minutes: None,
                spatial_focus: None,
                patient_id: self.patient_id.clone(),
            }));
        }

        let scores = self.indicator_scores(features);
        let weighted: f64 = scores.iter().map(|(s, w)| s * w).sum();
        let total_weight: f64 = scores.iter().map(|(_, w)| w).sum();
        let mut probability = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };

        let history_factor = self.recent_seizure_factor(features.timestamp);
        probability = (probability + HISTORY_BOOST * history_factor).clamp(0.0, 1.0);

        let probability = self.smooth(features.timestamp, probability);
        let risk_level = Self::risk_level(probability);

        // The baseline only learns inter-ictal signal; pre-ictal windows
        // must not be absorbed into it.
        if risk_level < SeizureRisk::High {
            self.update_baseline(features);
        }

        let velocity = features.mean(FeatureKey::FeatureVelocity).unwrap_or(0.0);
        let strong_indicators = scores.iter().filter(|(s, _)| *s > 0.5).count();
        let confidence =
            (0.5 + (strong_indicators as f64 * 0.1).min(0.3) + history_factor * 0.1).min(1.0);

        let classify_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.tracker.record(classify_ms);

        let mut metadata = BTreeMap::new();
        metadata.insert("patient_id".into(), serde_json::json!(self.patient_id));
        metadata.insert(
            "strong_indicators".into(),
            serde_json::json!(strong_indicators),
        );

        Ok(ClassificationResult::Seizure(SeizurePrediction {
            common: ResultCommon {
                timestamp: features.timestamp,
                confidence,
                latency_ms: 0.0,
                extract_ms: 0.0,
                classify_ms,
                metadata,
            },
            risk_level,
            probabilities: Self::risk_probabilities(probability),
            probability,
            time_to_seizure_minutes: Self::time_to_seizure(probability, velocity),
            spatial_focus: Self::spatial_focus(features),
            patient_id: self.patient_id.clone(),
        }))
    }

    fn metrics(&self) -> ClassifierMetrics {
        self.tracker.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_features(at: DateTime<Utc>) -> FeatureMap {
        let mut map = FeatureMap::new(at, 2000.0);
        map.insert_scalar(FeatureKey::SpectralEdgeFrequency, 30.0);
        map.insert_scalar(FeatureKey::LineLength, 50.0);
        map.insert_scalar(FeatureKey::HjorthComplexity, 1.5);
        map.insert_scalar(FeatureKey::SampleEntropy, 1.2);
        map.insert_scalar(FeatureKey::PhaseSynchronization, 0.2);
        map.insert_scalar(FeatureKey::BetaCoherence, 0.15);
        map.insert_vector(FeatureKey::SpikeRate, vec![0.1, 0.1, 0.1, 0.1]);
        map.insert_vector(FeatureKey::WaveletEnergies, vec![0.3, 0.3, 0.2, 0.2]);
        map.insert_scalar(FeatureKey::FeatureVelocity, 0.05);
        map
    }

    /// Pre-ictal pattern: edge and complexity collapse, synchrony and
    /// spiking surge.
    fn ictal_features(at: DateTime<Utc>, severity: f64) -> FeatureMap {
        let mut map = FeatureMap::new(at, 2000.0);
        map.insert_scalar(FeatureKey::SpectralEdgeFrequency, 30.0 * (1.0 - 0.6 * severity));
        map.insert_scalar(FeatureKey::LineLength, 50.0 * (1.0 + 2.0 * severity));
        map.insert_scalar(FeatureKey::HjorthComplexity, 1.5 * (1.0 - 0.7 * severity));
        map.insert_scalar(FeatureKey::SampleEntropy, 1.2 * (1.0 - 0.7 * severity));
        map.insert_scalar(FeatureKey::PhaseSynchronization, 0.2 + 0.7 * severity);
        map.insert_scalar(FeatureKey::BetaCoherence, 0.15 + 0.6 * severity);
        map.insert_vector(
            FeatureKey::SpikeRate,
            vec![0.1, 0.1, 0.1, 0.1 + 6.0 * severity, 0.1, 0.1, 0.1, 0.1],
        );
        map.insert_vector(
            FeatureKey::WaveletEnergies,
            vec![0.1, 0.1, 0.3 + 0.2 * severity, 0.5 + 0.3 * severity],
        );
        map.insert_scalar(FeatureKey::FeatureVelocity, 0.5 * severity);
        map
    }

    fn settle_baseline(predictor: &mut SeizurePredictor, from: DateTime<Utc>) -> DateTime<Utc> {
        let mut t = from;
        for _ in 0..12 {
            predictor.classify(&quiet_features(t)).unwrap();
            t += Duration::seconds(2);
        }
        t
    }

    #[test]
    fn quiet_signal_stays_low_risk() {
        let mut predictor = SeizurePredictor::new("patient-1");
        let t = settle_baseline(&mut predictor, Utc::now());
        let result = predictor.classify(&quiet_features(t)).unwrap();
        if let ClassificationResult::Seizure(r) = &result {
            assert_eq!(r.risk_level, SeizureRisk::Low);
            assert!(r.time_to_seizure_minutes.is_none());
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn probability_is_monotone_in_indicator_severity() {
        let base = Utc::now();
        let mut previous = 0.0;
        for severity in [0.2, 0.5, 0.8, 1.0] {
            let mut predictor = SeizurePredictor::new("patient-1");
            let t = settle_baseline(&mut predictor, base);
            let result = predictor.classify(&ictal_features(t, severity)).unwrap();
            if let ClassificationResult::Seizure(r) = result {
                assert!(
                    r.probability + 1e-9 >= previous,
                    "severity {} prob {} < {}",
                    severity,
                    r.probability,
                    previous
                );
                previous = r.probability;
            }
        }
    }

    #[test]
    fn full_severity_is_imminent_with_focus_and_eta() {
        let mut predictor = SeizurePredictor::new("patient-1");
        let t = settle_baseline(&mut predictor, Utc::now());
        let result = predictor.classify(&ictal_features(t, 1.0)).unwrap();
        if let ClassificationResult::Seizure(r) = &result {
            assert!(r.probability >= IMMINENT_THRESHOLD, "prob {}", r.probability);
            assert_eq!(r.risk_level, SeizureRisk::Imminent);
            let eta = r.time_to_seizure_minutes.unwrap();
            assert!((5.0..=10.0).contains(&eta), "eta {}", eta);
            // Channel 3 spikes far above the rest.
            assert_eq!(r.spatial_focus.as_deref(), Some(&[3usize][..]));
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn recent_seizure_raises_probability() {
        let base = Utc::now();

        let mut without = SeizurePredictor::new("patient-1");
        let t1 = settle_baseline(&mut without, base);
        let p_without = match without.classify(&ictal_features(t1, 0.3)).unwrap() {
            ClassificationResult::Seizure(r) => r.probability,
            _ => panic!(),
        };

        let mut with = SeizurePredictor::new("patient-1");
        let t2 = settle_baseline(&mut with, base);
        with.record_seizure(t2 - Duration::hours(1));
        let p_with = match with.classify(&ictal_features(t2, 0.3)).unwrap() {
            ClassificationResult::Seizure(r) => r.probability,
            _ => panic!(),
        };

        assert!(p_with > p_without + 0.1, "{} vs {}", p_with, p_without);
    }

    #[test]
    fn risk_probability_argmax_matches_level() {
        for p in [0.1, 0.4, 0.7, 0.9] {
            let probs = SeizurePredictor::risk_probabilities(p);
            let sum: f64 = probs.values().sum();
            assert!((sum - 1.0).abs() <= 1e-6);
            let argmax = probs
                .iter()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(r, _)| *r)
                .unwrap();
            assert_eq!(argmax, SeizurePredictor::risk_level(p));
        }
    }
}
