//! Threshold-based mental-state classification with temporal smoothing.
//!
//! Focus, relaxation, and stress each accumulate sigmoid-scaled evidence
//! from the feature map; neutral takes the residual mass. A recency- and
//! confidence-weighted average over the last ten windows suppresses state
//! flicker, and anything below the confidence floor is reported as unknown.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use neuro_core::types::{
    ClassificationResult, FeatureKey, FeatureMap, MentalState, MentalStateResult, ResultCommon,
};
use neuro_core::NeuroResult;

use crate::sigmoid;
use crate::traits::{Classifier, ClassifierMetrics, LatencyTracker};

use super::winner_with_margin;

/// Below this confidence the classifier refuses to commit to a state.
const MIN_CONFIDENCE: f64 = 0.3;
/// Windows of history kept for smoothing.
const HISTORY_SIZE: usize = 10;

// Indicator thresholds, dimensionless after feature normalisation.
const FOCUS_BETA_ALPHA: f64 = 1.5;
const FOCUS_FRONTAL_THETA: f64 = 0.6;
const FOCUS_ATTENTION: f64 = 0.7;
const RELAX_ALPHA: f64 = 0.7;
const RELAX_BETA_MAX: f64 = 0.3;
const RELAX_ASYMMETRY: f64 = 0.2;
const STRESS_BETA: f64 = 0.6;
const STRESS_MUSCLE: f64 = 0.4;

struct HistoryEntry {
    state: MentalState,
    confidence: f64,
    probabilities: BTreeMap<MentalState, f64>,
}

/// Mental-state classifier instance. One per stream; the smoothing history
/// is never shared.
pub struct MentalStateClassifier {
    history: VecDeque<HistoryEntry>,
    tracker: LatencyTracker,
}

impl MentalStateClassifier {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_SIZE),
            tracker: LatencyTracker::default(),
        }
    }

    fn state_scores(features: &FeatureMap) -> BTreeMap<MentalState, f64> {
        let mut focus = 0.0;
        if let Some(v) = features.mean(FeatureKey::BetaAlphaRatio) {
            focus += sigmoid(v - FOCUS_BETA_ALPHA) * 0.4;
        }
        if let Some(v) = features.mean(FeatureKey::FrontalTheta) {
            focus += sigmoid(v - FOCUS_FRONTAL_THETA) * 0.3;
        }
        if let Some(v) = features.mean(FeatureKey::AttentionIndex) {
            focus += sigmoid(v - FOCUS_ATTENTION) * 0.3;
        }

        let mut relax = 0.0;
        if let Some(v) = features.mean(FeatureKey::AlphaPower) {
            relax += sigmoid(v - RELAX_ALPHA) * 0.5;
        }
        if let Some(v) = features.mean(FeatureKey::BetaPower) {
            relax += sigmoid(RELAX_BETA_MAX - v) * 0.3;
        }
        if let Some(v) = features.mean(FeatureKey::AlphaAsymmetry) {
            relax += (1.0 - (v.abs() / RELAX_ASYMMETRY).min(1.0)) * 0.2;
        }

        let mut stress = 0.0;
        if let Some(v) = features.mean(FeatureKey::BetaPower) {
            stress += sigmoid(v - STRESS_BETA) * 0.4;
        }
        if let Some(v) = features.mean(FeatureKey::MuscleArtifacts) {
            stress += sigmoid(v - STRESS_MUSCLE) * 0.3;
        }
        if let Some(v) = features.mean(FeatureKey::HrvFeatures) {
            // Lower heart-rate variability reads as stress.
            stress += (1.0 - v.clamp(0.0, 1.0)) * 0.3;
        }

        let mut probabilities = BTreeMap::new();
        let total = focus + relax + stress;
        if total > 0.0 {
            // Neutral absorbs whatever evidence mass is left over.
            let scale = if total > 1.0 { 1.0 / total } else { 1.0 };
            probabilities.insert(MentalState::Focus, focus * scale);
            probabilities.insert(MentalState::Relaxation, relax * scale);
            probabilities.insert(MentalState::Stress, stress * scale);
            let assigned: f64 = probabilities.values().sum();
            probabilities.insert(MentalState::Neutral, (1.0 - assigned).max(0.0));
        } else {
            probabilities.insert(MentalState::Neutral, 0.7);
            probabilities.insert(MentalState::Focus, 0.1);
            probabilities.insert(MentalState::Relaxation, 0.1);
            probabilities.insert(MentalState::Stress, 0.1);
        }
        probabilities
    }

    fn arousal(features: &FeatureMap) -> f64 {
        match (
            features.mean(FeatureKey::BetaPower),
            features.mean(FeatureKey::AlphaPower),
        ) {
            (Some(beta), Some(alpha)) => sigmoid((beta - alpha) * 2.0),
            _ => 0.5,
        }
    }

    fn valence(features: &FeatureMap) -> f64 {
        features
            .mean(FeatureKey::FrontalAlphaAsymmetry)
            .map(|a| (a * 2.0).tanh())
            .unwrap_or(0.0)
    }

    fn attention(features: &FeatureMap) -> f64 {
        if let Some(a) = features.mean(FeatureKey::AttentionIndex) {
            return a.clamp(0.0, 1.0);
        }
        match (
            features.mean(FeatureKey::ThetaPower),
            features.mean(FeatureKey::BetaPower),
        ) {
            (Some(theta), Some(beta)) => sigmoid(theta + beta - 0.5),
            _ => 0.5,
        }
    }

    /// Weighted average over recent windows; recency and confidence both
    /// raise a window's weight.
    fn smooth(
        &mut self,
        state: MentalState,
        confidence: f64,
        probabilities: &BTreeMap<MentalState, f64>,
    ) -> (MentalState, f64, BTreeMap<MentalState, f64>) {
        if self.history.len() == HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry {
            state,
            confidence,
            probabilities: probabilities.clone(),
        });

        if self.history.len() < 3 {
            return (state, confidence, probabilities.clone());
        }

        let mut scores: BTreeMap<MentalState, f64> = BTreeMap::new();
        let mut total_weight = 0.0;
        let len = self.history.len() as f64;
        for (i, entry) in self.history.iter().enumerate() {
            let weight = ((i + 1) as f64 / len) * entry.confidence;
            for (s, p) in &entry.probabilities {
                *scores.entry(*s).or_insert(0.0) += p * weight;
            }
            total_weight += weight;
        }
        if total_weight > 0.0 {
            for v in scores.values_mut() {
                *v /= total_weight;
            }
        }

        let (smoothed_state, smoothed_p) = scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(s, p)| (*s, *p))
            .unwrap_or((state, confidence));

        let stability = self.stability();
        let smoothed_confidence = (smoothed_p * (0.7 + 0.3 * stability)).min(1.0);
        (smoothed_state, smoothed_confidence, scores)
    }

    /// 1 minus the fraction of state changes across the history.
    fn stability(&self) -> f64 {
        if self.history.len() < 2 {
            return 1.0;
        }
        let changes = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .filter(|(a, b)| a.state != b.state)
            .count();
        1.0 - changes as f64 / (self.history.len() - 1) as f64
    }
}

impl Default for MentalStateClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for MentalStateClassifier {
    fn classify(&mut self, features: &FeatureMap) -> NeuroResult<ClassificationResult> {
        let start = Instant::now();

        if !features.is_usable() {
            let mut probabilities = BTreeMap::new();
            probabilities.insert(MentalState::Unknown, 1.0);
            return Ok(ClassificationResult::MentalState(MentalStateResult {
                common: ResultCommon {
                    timestamp: features.timestamp,
                    confidence: 0.0,
                    latency_ms: 0.0,
                    extract_ms: 0.0,
                    classify_ms: start.elapsed().as_secs_f64() * 1000.0,
                    metadata: BTreeMap::new(),
                },
                state: MentalState::Unknown,
                probabilities,
                arousal: 0.5,
                valence: 0.0,
                attention: 0.5,
            }));
        }

        let raw_probabilities = Self::state_scores(features);
        let pairs: Vec<(MentalState, f64)> =
            raw_probabilities.iter().map(|(s, p)| (*s, *p)).collect();
        let (state, confidence) =
            winner_with_margin(&pairs).unwrap_or((MentalState::Unknown, 0.0));

        let arousal = Self::arousal(features);
        let valence = Self::valence(features);
        let attention = Self::attention(features);

        let (state, confidence, probabilities) =
            self.smooth(state, confidence, &raw_probabilities);

        let (state, probabilities) = if confidence < MIN_CONFIDENCE {
            let mut unknown = BTreeMap::new();
            unknown.insert(MentalState::Unknown, 1.0);
            (MentalState::Unknown, unknown)
        } else {
            // Defensive renormalisation keeps the vector within tolerance.
            let sum: f64 = probabilities.values().sum();
            let normalized = if sum > 0.0 {
                probabilities
                    .into_iter()
                    .map(|(s, p)| (s, p / sum))
                    .collect()
            } else {
                probabilities
            };
            (state, normalized)
        };

        let classify_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.tracker.record(classify_ms);

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "signal_quality".into(),
            serde_json::json!(features.signal_quality),
        );
        metadata.insert("stability".into(), serde_json::json!(self.stability()));

        Ok(ClassificationResult::MentalState(MentalStateResult {
            common: ResultCommon {
                timestamp: features.timestamp,
                confidence,
                latency_ms: 0.0,
                extract_ms: 0.0,
                classify_ms,
                metadata,
            },
            state,
            probabilities,
            arousal,
            valence,
            attention,
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

    fn relaxed_features() -> FeatureMap {
        let mut map = FeatureMap::new(Utc::now(), 1000.0);
        map.insert_scalar(FeatureKey::AlphaPower, 0.8);
        map.insert_scalar(FeatureKey::BetaPower, 0.1);
        map.insert_scalar(FeatureKey::BetaAlphaRatio, 0.125);
        map.insert_scalar(FeatureKey::AlphaAsymmetry, 0.05);
        map.insert_scalar(FeatureKey::AttentionIndex, 0.3);
        map.insert_scalar(FeatureKey::MuscleArtifacts, 0.05);
        map
    }

    fn focused_features() -> FeatureMap {
        let mut map = FeatureMap::new(Utc::now(), 1000.0);
        map.insert_scalar(FeatureKey::AlphaPower, 0.2);
        map.insert_scalar(FeatureKey::BetaPower, 0.45);
        map.insert_scalar(FeatureKey::BetaAlphaRatio, 2.3);
        map.insert_scalar(FeatureKey::FrontalTheta, 0.8);
        map.insert_scalar(FeatureKey::AttentionIndex, 1.2);
        map.insert_scalar(FeatureKey::MuscleArtifacts, 0.1);
        map
    }

    #[test]
    fn converges_to_relaxation_on_constant_input() {
        let mut classifier = MentalStateClassifier::new();
        let mut last = None;
        for _ in 0..10 {
            last = Some(classifier.classify(&relaxed_features()).unwrap());
        }
        let result = last.unwrap();
        match &result {
            ClassificationResult::MentalState(r) => {
                assert_eq!(r.state, MentalState::Relaxation);
                assert!(r.common.confidence >= 0.5, "confidence {}", r.common.confidence);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn probabilities_normalised_and_argmax_matches_label() {
        let mut classifier = MentalStateClassifier::new();
        for _ in 0..10 {
            let result = classifier.classify(&focused_features()).unwrap();
            assert!((result.probability_sum() - 1.0).abs() <= 1e-6);
            if let ClassificationResult::MentalState(r) = &result {
                let argmax = r
                    .probabilities
                    .iter()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                    .map(|(s, _)| *s)
                    .unwrap();
                assert_eq!(argmax, r.state);
            }
        }
    }

    #[test]
    fn unusable_features_yield_unknown() {
        let mut classifier = MentalStateClassifier::new();
        let map = FeatureMap::unusable(Utc::now(), 1000.0);
        let result = classifier.classify(&map).unwrap();
        assert_eq!(result.label(), "unknown");
        assert!((result.probability_sum() - 1.0).abs() <= 1e-6);
    }

    #[test]
    fn empty_feature_map_falls_back_to_neutral_prior() {
        let mut classifier = MentalStateClassifier::new();
        let map = FeatureMap::new(Utc::now(), 1000.0);
        let result = classifier.classify(&map).unwrap();
        if let ClassificationResult::MentalState(r) = &result {
            assert_eq!(r.state, MentalState::Neutral);
        } else {
            panic!("wrong variant");
        }
    }
}
