//! Motor-imagery classification for BCI control.
//!
//! Contralateral ERD in the mu and beta bands drives the two hand classes,
//! central ERD drives feet, fronto-central beta change drives tongue, and
//! rest takes whatever activity is left. The winning intent is rendered as
//! a 2-vector control signal, low-pass smoothed against the previous output
//! and clamped to the unit disk.

use std::collections::BTreeMap;
use std::time::Instant;

use neuro_core::types::{
    ClassificationResult, FeatureKey, FeatureMap, MotorImageryResult, MotorIntent, ResultCommon,
};
use neuro_core::NeuroResult;

use crate::sigmoid;
use crate::traits::{Classifier, ClassifierMetrics, LatencyTracker};

use super::normalize_scores;

/// ERD must be at least this strong (30 % power decrease) to count.
const ERD_THRESHOLD: f64 = -0.3;
/// Feet ERD is physiologically weaker; the gate is relaxed accordingly.
const FEET_ERD_FACTOR: f64 = 0.8;
/// Minimum fronto-central beta change for the tongue class.
const TONGUE_BETA_CHANGE: f64 = 0.2;
/// Winning probability below this falls back to rest.
const CONFIDENCE_THRESHOLD: f64 = 0.6;
const REST_THRESHOLD: f64 = 0.3;
/// New-sample weight of the control-signal low-pass.
const CONTROL_ALPHA: f64 = 0.3;
/// CSP / band-power blend weights when CSP features are present.
const CSP_WEIGHT: f64 = 0.6;
const BANDPOWER_WEIGHT: f64 = 0.4;

const MOVEMENT_CLASSES: [MotorIntent; 4] = [
    MotorIntent::LeftHand,
    MotorIntent::RightHand,
    MotorIntent::Feet,
    MotorIntent::Tongue,
];

/// Motor-imagery classifier. Holds the previous control output for
/// smoothing; one instance per stream.
pub struct MotorImageryClassifier {
    last_control: Option<[f64; 2]>,
    tracker: LatencyTracker,
}

impl MotorImageryClassifier {
    pub fn new() -> Self {
        Self {
            last_control: None,
            tracker: LatencyTracker::default(),
        }
    }

    fn class_probabilities(features: &FeatureMap) -> BTreeMap<MotorIntent, f64> {
        let erd_mu_left = features.mean(FeatureKey::ErdMuLeft).unwrap_or(0.0);
        let erd_mu_right = features.mean(FeatureKey::ErdMuRight).unwrap_or(0.0);
        let erd_beta_left = features.mean(FeatureKey::ErdBetaLeft).unwrap_or(0.0);
        let erd_beta_right = features.mean(FeatureKey::ErdBetaRight).unwrap_or(0.0);

        // Left-hand imagery shows as ERD over the right hemisphere.
        let mut left = 0.0;
        if erd_mu_right < ERD_THRESHOLD {
            left = sigmoid(-erd_mu_right * 5.0);
        }
        if erd_beta_right < ERD_THRESHOLD {
            left = left.max(sigmoid(-erd_beta_right * 4.0));
        }

        let mut right = 0.0;
        if erd_mu_left < ERD_THRESHOLD {
            right = sigmoid(-erd_mu_left * 5.0);
        }
        if erd_beta_left < ERD_THRESHOLD {
            right = right.max(sigmoid(-erd_beta_left * 4.0));
        }

        let mut feet = 0.0;
        if let Some(central) = features.mean(FeatureKey::CentralErd) {
            if central < ERD_THRESHOLD * FEET_ERD_FACTOR {
                feet = sigmoid(-central * 3.0);
            }
        }

        let mut tongue = 0.0;
        if let Some(fc_beta) = features.mean(FeatureKey::FrontoCentralBeta) {
            let change = fc_beta.abs();
            if change > TONGUE_BETA_CHANGE {
                tongue = sigmoid(change * 3.0);
            }
        }

        let mut probabilities = BTreeMap::new();
        probabilities.insert(MotorIntent::LeftHand, left);
        probabilities.insert(MotorIntent::RightHand, right);
        probabilities.insert(MotorIntent::Feet, feet);
        probabilities.insert(MotorIntent::Tongue, tongue);

        // Blend in CSP evidence when a projection is installed.
        if let Some(log_vars) = features.vector(FeatureKey::CspFeatures) {
            if log_vars.len() >= MOVEMENT_CLASSES.len() {
                let max = log_vars
                    .iter()
                    .cloned()
                    .fold(f64::NEG_INFINITY, f64::max);
                let exps: Vec<f64> = log_vars.iter().map(|v| (v - max).exp()).collect();
                let sum: f64 = exps.iter().sum();
                for (intent, e) in MOVEMENT_CLASSES.iter().zip(&exps) {
                    let csp_p = e / sum;
                    let entry = probabilities.entry(*intent).or_insert(0.0);
                    *entry = *entry * BANDPOWER_WEIGHT + csp_p * CSP_WEIGHT;
                }
            }
        }

        let max_activity = probabilities.values().cloned().fold(0.0, f64::max);
        probabilities.insert(MotorIntent::Rest, (1.0 - max_activity).max(0.0));

        let mut pairs: Vec<(MotorIntent, f64)> =
            probabilities.iter().map(|(k, v)| (*k, *v)).collect();
        if !normalize_scores(&mut pairs) {
            pairs = vec![
                (MotorIntent::LeftHand, 0.0),
                (MotorIntent::RightHand, 0.0),
                (MotorIntent::Feet, 0.0),
                (MotorIntent::Tongue, 0.0),
                (MotorIntent::Rest, 1.0),
            ];
        }
        pairs.into_iter().collect()
    }

    fn determine_intent(probabilities: &BTreeMap<MotorIntent, f64>) -> (MotorIntent, f64) {
        let mut sorted: Vec<(MotorIntent, f64)> =
            probabilities.iter().map(|(k, v)| (*k, *v)).collect();
        sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (best, best_p) = sorted[0];
        if best == MotorIntent::Rest && best_p > REST_THRESHOLD {
            return (MotorIntent::Rest, best_p);
        }
        if best_p < CONFIDENCE_THRESHOLD {
            let rest_p = probabilities.get(&MotorIntent::Rest).copied().unwrap_or(0.5);
            return (MotorIntent::Rest, rest_p);
        }
        let margin = best_p - sorted[1].1;
        (best, (best_p * (1.0 + margin)).min(1.0))
    }

    /// Mean ERD across the available band/hemisphere measures, squashed to
    /// -1..1.
    fn erd_ers_score(features: &FeatureMap) -> f64 {
        let values: Vec<f64> = [
            FeatureKey::ErdMuLeft,
            FeatureKey::ErdMuRight,
            FeatureKey::ErdBetaLeft,
            FeatureKey::ErdBetaRight,
        ]
        .iter()
        .filter_map(|k| features.mean(*k))
        .collect();
        if values.is_empty() {
            return 0.0;
        }
        (values.iter().sum::<f64>() / values.len() as f64).tanh()
    }

    fn control_signal(
        &mut self,
        intent: MotorIntent,
        confidence: f64,
        erd_ers_score: f64,
    ) -> [f64; 2] {
        let base = match intent {
            MotorIntent::LeftHand => [-1.0, 0.0],
            MotorIntent::RightHand => [1.0, 0.0],
            MotorIntent::Feet => [0.0, 1.0],
            MotorIntent::Tongue => [0.0, -1.0],
            MotorIntent::Rest | MotorIntent::Unknown => [0.0, 0.0],
        };
        let strength = confidence * erd_ers_score.abs();
        let mut signal = [base[0] * strength, base[1] * strength];

        if let Some(last) = self.last_control {
            signal = [
                (1.0 - CONTROL_ALPHA) * last[0] + CONTROL_ALPHA * signal[0],
                (1.0 - CONTROL_ALPHA) * last[1] + CONTROL_ALPHA * signal[1],
            ];
        }

        let magnitude = (signal[0] * signal[0] + signal[1] * signal[1]).sqrt();
        if magnitude > 1.0 {
            signal = [signal[0] / magnitude, signal[1] / magnitude];
        }
        self.last_control = Some(signal);
        signal
    }

    fn spatial_pattern(features: &FeatureMap) -> Vec<f64> {
        features
            .vector(FeatureKey::CspFeatures)
            .map(|v| v.to_vec())
            .unwrap_or_default()
    }
}

impl Default for MotorImageryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for MotorImageryClassifier {
    fn classify(&mut self, features: &FeatureMap) -> NeuroResult<ClassificationResult> {
        let start = Instant::now();

        if !features.is_usable() {
            let mut probabilities = BTreeMap::new();
            probabilities.insert(MotorIntent::Unknown, 1.0);
            return Ok(ClassificationResult::MotorImagery(MotorImageryResult {
                common: ResultCommon {
                    timestamp: features.timestamp,
                    confidence: 0.0,
                    latency_ms: 0.0,
                    extract_ms: 0.0,
                    classify_ms: start.elapsed().as_secs_f64() * 1000.0,
                    metadata: BTreeMap::new(),
                },
                intent: MotorIntent::Unknown,
                probabilities,
                control_signal: [0.0, 0.0],
                erd_ers_score: 0.0,
                spatial_pattern: Vec::new(),
            }));
        }

        let probabilities = Self::class_probabilities(features);
        let (intent, confidence) = Self::determine_intent(&probabilities);
        let erd_ers_score = Self::erd_ers_score(features);
        let control_signal = self.control_signal(intent, confidence, erd_ers_score);

        let classify_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.tracker.record(classify_ms);

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "csp_enabled".into(),
            serde_json::json!(features.vector(FeatureKey::CspFeatures).is_some()),
        );

        Ok(ClassificationResult::MotorImagery(MotorImageryResult {
            common: ResultCommon {
                timestamp: features.timestamp,
                confidence,
                latency_ms: 0.0,
                extract_ms: 0.0,
                classify_ms,
                metadata,
            },
            intent,
            probabilities,
            control_signal,
            erd_ers_score,
            spatial_pattern: Self::spatial_pattern(features),
        }))
    }

    fn metrics(&self) -> ClassifierMetrics {
        self.tracker.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn erd_features(erd_mu_right: f64) -> FeatureMap {
        let mut map = FeatureMap::new(Utc::now(), 1000.0);
        map.insert_scalar(FeatureKey::ErdMuLeft, 0.0);
        map.insert_scalar(FeatureKey::ErdMuRight, erd_mu_right);
        map.insert_scalar(FeatureKey::ErdBetaLeft, 0.0);
        map.insert_scalar(FeatureKey::ErdBetaRight, 0.0);
        map
    }

    #[test]
    fn contralateral_erd_selects_left_hand() {
        let mut classifier = MotorImageryClassifier::new();
        let result = classifier.classify(&erd_features(-0.4)).unwrap();
        match &result {
            ClassificationResult::MotorImagery(r) => {
                assert_eq!(r.intent, MotorIntent::LeftHand);
                assert!(r.common.confidence >= 0.5);
                assert!(r.control_signal[0] < 0.0, "control {:?}", r.control_signal);
                assert!(r.control_signal[1].abs() < 1e-9);
                assert!(r.erd_ers_score < 0.0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn weak_erd_falls_back_to_rest() {
        let mut classifier = MotorImageryClassifier::new();
        let result = classifier.classify(&erd_features(-0.1)).unwrap();
        assert_eq!(result.label(), "rest");
    }

    #[test]
    fn control_signal_stays_in_unit_disk() {
        let mut classifier = MotorImageryClassifier::new();
        for _ in 0..50 {
            let result = classifier.classify(&erd_features(-0.9)).unwrap();
            if let ClassificationResult::MotorImagery(r) = result {
                let mag =
                    (r.control_signal[0].powi(2) + r.control_signal[1].powi(2)).sqrt();
                assert!(mag <= 1.0 + 1e-9);
            }
        }
    }

    #[test]
    fn control_signal_is_smoothed() {
        let mut classifier = MotorImageryClassifier::new();
        let first = match classifier.classify(&erd_features(-0.8)).unwrap() {
            ClassificationResult::MotorImagery(r) => r.control_signal,
            _ => panic!(),
        };
        // Intent flips to rest; the control signal must decay, not jump.
        let second = match classifier.classify(&erd_features(0.0)).unwrap() {
            ClassificationResult::MotorImagery(r) => r.control_signal,
            _ => panic!(),
        };
        assert!(second[0].abs() < first[0].abs());
        assert!(second[0] < 0.0, "decays through intermediate values");
    }

    #[test]
    fn probabilities_are_normalised() {
        let mut classifier = MotorImageryClassifier::new();
        let result = classifier.classify(&erd_features(-0.5)).unwrap();
        assert!((result.probability_sum() - 1.0).abs() <= 1e-6);
    }

    #[test]
    fn csp_features_shift_probabilities() {
        let mut classifier = MotorImageryClassifier::new();
        let mut map = erd_features(0.0);
        // Strong first component maps to the left-hand class.
        map.insert_vector(FeatureKey::CspFeatures, vec![4.0, 0.0, 0.0, 0.0]);
        let result = classifier.classify(&map).unwrap();
        if let ClassificationResult::MotorImagery(r) = &result {
            assert!(
                r.probabilities[&MotorIntent::LeftHand] > r.probabilities[&MotorIntent::Feet]
            );
        }
    }
}
