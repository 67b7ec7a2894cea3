//! AASM sleep staging with a Markov transition prior.
//!
//! Feature-derived stage scores are normalised into probabilities and then
//! blended with the transition row of the previous stage (0.7 features /
//! 0.3 prior). The classifier keeps a monotonic epoch counter and derives a
//! per-stage sleep depth and a transition probability.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use neuro_core::types::{
    ClassificationResult, FeatureKey, FeatureMap, ResultCommon, SleepStage, SleepStageResult,
};
use neuro_core::NeuroResult;

use crate::sigmoid;
use crate::traits::{Classifier, ClassifierMetrics, LatencyTracker};

use super::winner_with_margin;

const STAGES: [SleepStage; 5] = [
    SleepStage::Wake,
    SleepStage::N1,
    SleepStage::N2,
    SleepStage::N3,
    SleepStage::Rem,
];

/// Stage transition matrix, rows indexed by the previous stage in the order
/// WAKE, N1, N2, N3, REM.
const TRANSITIONS: [[f64; 5]; 5] = [
    [0.85, 0.14, 0.01, 0.00, 0.00], // from WAKE
    [0.25, 0.45, 0.29, 0.01, 0.00], // from N1
    [0.05, 0.15, 0.65, 0.13, 0.02], // from N2
    [0.01, 0.02, 0.17, 0.79, 0.01], // from N3
    [0.12, 0.08, 0.15, 0.00, 0.65], // from REM
];

/// Prior used before the first epoch has been staged.
const FIRST_EPOCH_PRIOR: [f64; 5] = [0.8, 0.1, 0.05, 0.03, 0.02];

/// Feature / transition blend weights.
const FEATURE_WEIGHT: f64 = 0.7;
const TRANSITION_WEIGHT: f64 = 0.3;

const HISTORY_SIZE: usize = 10;

fn stage_index(stage: SleepStage) -> Option<usize> {
    STAGES.iter().position(|s| *s == stage)
}

/// Sleep-stage classifier. One instance per stream; the epoch counter and
/// stage history belong to that stream alone.
pub struct SleepStageClassifier {
    epoch_number: u64,
    previous_stage: Option<SleepStage>,
    stage_history: VecDeque<SleepStage>,
    tracker: LatencyTracker,
}

impl SleepStageClassifier {
    pub fn new() -> Self {
        Self {
            epoch_number: 0,
            previous_stage: None,
            stage_history: VecDeque::with_capacity(HISTORY_SIZE),
            tracker: LatencyTracker::default(),
        }
    }

    pub fn epoch_number(&self) -> u64 {
        self.epoch_number
    }

    fn stage_scores(features: &FeatureMap) -> [f64; 5] {
        let alpha = features.mean(FeatureKey::AlphaPower).unwrap_or(0.0);
        let theta = features.mean(FeatureKey::ThetaPower).unwrap_or(0.0);
        let beta = features.mean(FeatureKey::BetaPower).unwrap_or(0.0);
        let delta = features.mean(FeatureKey::DeltaPower).unwrap_or(0.0);
        let delta_pct = features.mean(FeatureKey::DeltaPercentage).unwrap_or(0.0);
        let emg = features.mean(FeatureKey::EmgPower).unwrap_or(0.0);

        // Event features normalised to roughly 0..1 for thresholding.
        let spindles = (features.mean(FeatureKey::SpindleDensity).unwrap_or(0.0) / 5.0).min(1.0);
        let k_complexes =
            (features.mean(FeatureKey::KComplexCount).unwrap_or(0.0) / 2.0).min(1.0);
        let slow_waves =
            (features.mean(FeatureKey::SlowWaveAmplitude).unwrap_or(0.0) / 100.0).min(1.0);
        let vertex = (features.mean(FeatureKey::VertexWaves).unwrap_or(0.0) / 10.0).min(1.0);
        let eye_movements =
            (features.mean(FeatureKey::EyeMovementRate).unwrap_or(0.0) / 10.0).min(1.0);
        let rem_density = (features.mean(FeatureKey::RemDensity).unwrap_or(0.0) * 5.0).min(1.0);

        let alpha_decrease = 1.0 - alpha.min(1.0);
        let theta_dominance = theta / (theta + alpha + beta + 1e-9);

        let wake = sigmoid((alpha - 0.5) * 2.0) * 0.4
            + sigmoid((emg - 0.6) * 2.0) * 0.4
            + sigmoid((eye_movements - 0.3) * 2.0) * 0.2;

        let n1 = sigmoid((theta - 0.5) * 2.0) * 0.5
            + sigmoid((alpha_decrease - 0.5) * 2.0) * 0.3
            + sigmoid((vertex - 0.2) * 2.0) * 0.2;

        let n2 = sigmoid((spindles - 0.3) * 2.0) * 0.4
            + sigmoid((k_complexes - 0.2) * 2.0) * 0.3
            + sigmoid((theta_dominance - 0.6) * 2.0) * 0.3;

        let n3 = sigmoid((delta - 0.5) * 3.0) * 0.5
            + sigmoid((slow_waves - 0.3) * 2.0) * 0.3
            + sigmoid((delta_pct - 0.2) * 2.0) * 0.2;

        let rem = sigmoid((theta - 0.6) * 2.0) * 0.3
            + sigmoid((0.8 - emg) * 3.0) * 0.4
            + sigmoid((rem_density - 0.3) * 2.0) * 0.3;

        [wake, n1, n2, n3, rem]
    }

    fn sleep_depth(stage: SleepStage, features: &FeatureMap) -> f64 {
        match stage {
            SleepStage::Wake => 0.0,
            SleepStage::N1 => 0.2,
            SleepStage::N2 => 0.5,
            SleepStage::N3 => {
                let delta = features.mean(FeatureKey::DeltaPower).unwrap_or(0.0);
                0.7 + 0.3 * delta.clamp(0.0, 1.0)
            }
            SleepStage::Rem => 0.3,
            SleepStage::Unknown => 0.0,
        }
    }

    /// Fraction of stage changes across the recent history.
    fn instability(&self) -> f64 {
        if self.stage_history.len() < 2 {
            return 0.0;
        }
        let changes = self
            .stage_history
            .iter()
            .zip(self.stage_history.iter().skip(1))
            .filter(|(a, b)| a != b)
            .count();
        changes as f64 / (self.stage_history.len() - 1) as f64
    }
}

impl Default for SleepStageClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for SleepStageClassifier {
    fn classify(&mut self, features: &FeatureMap) -> NeuroResult<ClassificationResult> {
        let start = Instant::now();

        if !features.is_usable() {
            let mut probabilities = BTreeMap::new();
            probabilities.insert(SleepStage::Unknown, 1.0);
            return Ok(ClassificationResult::SleepStage(SleepStageResult {
                common: ResultCommon {
                    timestamp: features.timestamp,
                    confidence: 0.0,
                    latency_ms: 0.0,
                    extract_ms: 0.0,
                    classify_ms: start.elapsed().as_secs_f64() * 1000.0,
                    metadata: BTreeMap::new(),
                },
                stage: SleepStage::Unknown,
                probabilities,
                epoch_number: self.epoch_number,
                sleep_depth: 0.0,
                transition_probability: 0.0,
            }));
        }

        // Cubic sharpening before normalisation: every stage score carries
        // the same sigmoid floor, and without sharpening that shared floor
        // flattens the distribution enough that the wake-heavy transition
        // prior could never be overturned by the evidence.
        let scores = Self::stage_scores(features).map(|s| s.powi(3));
        let total: f64 = scores.iter().sum();
        let feature_probs: [f64; 5] = if total > 0.0 {
            [
                scores[0] / total,
                scores[1] / total,
                scores[2] / total,
                scores[3] / total,
                scores[4] / total,
            ]
        } else {
            FIRST_EPOCH_PRIOR
        };

        // Blend with the transition row of the previous stage.
        let prior = match self.previous_stage.and_then(stage_index) {
            Some(i) => TRANSITIONS[i],
            None => FIRST_EPOCH_PRIOR,
        };
        let mut blended = [0.0f64; 5];
        for i in 0..5 {
            blended[i] = FEATURE_WEIGHT * feature_probs[i] + TRANSITION_WEIGHT * prior[i];
        }
        let blended_total: f64 = blended.iter().sum();
        for b in blended.iter_mut() {
            *b /= blended_total;
        }

        let pairs: Vec<(SleepStage, f64)> = STAGES.iter().copied().zip(blended).collect();
        let (stage, confidence) = winner_with_margin(&pairs).unwrap_or((SleepStage::Unknown, 0.0));

        self.epoch_number += 1;
        if self.stage_history.len() == HISTORY_SIZE {
            self.stage_history.pop_front();
        }
        self.stage_history.push_back(stage);

        let stay = stage_index(stage)
            .map(|i| TRANSITIONS[i][i])
            .unwrap_or(0.0);
        let transition_probability = ((1.0 - stay) * (1.0 + self.instability())).clamp(0.0, 1.0);

        self.previous_stage = Some(stage);

        let classify_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.tracker.record(classify_ms);

        let mut metadata = BTreeMap::new();
        metadata.insert("instability".into(), serde_json::json!(self.instability()));

        Ok(ClassificationResult::SleepStage(SleepStageResult {
            common: ResultCommon {
                timestamp: features.timestamp,
                confidence,
                latency_ms: 0.0,
                extract_ms: 0.0,
                classify_ms,
                metadata,
            },
            stage,
            probabilities: pairs.into_iter().collect(),
            epoch_number: self.epoch_number,
            sleep_depth: Self::sleep_depth(stage, features),
            transition_probability,
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

    fn n3_features() -> FeatureMap {
        let mut map = FeatureMap::new(Utc::now(), 30_000.0);
        map.insert_scalar(FeatureKey::DeltaPower, 0.85);
        map.insert_scalar(FeatureKey::DeltaPercentage, 0.9);
        map.insert_scalar(FeatureKey::ThetaPower, 0.08);
        map.insert_scalar(FeatureKey::AlphaPower, 0.03);
        map.insert_scalar(FeatureKey::BetaPower, 0.02);
        map.insert_scalar(FeatureKey::SlowWaveAmplitude, 95.0);
        map.insert_scalar(FeatureKey::SpindleDensity, 0.2);
        map.insert_scalar(FeatureKey::KComplexCount, 0.0);
        map.insert_scalar(FeatureKey::EmgPower, 0.05);
        map.insert_scalar(FeatureKey::RemDensity, 0.01);
        map.insert_scalar(FeatureKey::EyeMovementRate, 0.2);
        map
    }

    fn wake_features() -> FeatureMap {
        let mut map = FeatureMap::new(Utc::now(), 30_000.0);
        map.insert_scalar(FeatureKey::DeltaPower, 0.1);
        map.insert_scalar(FeatureKey::DeltaPercentage, 0.15);
        map.insert_scalar(FeatureKey::ThetaPower, 0.1);
        map.insert_scalar(FeatureKey::AlphaPower, 0.6);
        map.insert_scalar(FeatureKey::BetaPower, 0.2);
        map.insert_scalar(FeatureKey::EmgPower, 0.8);
        map.insert_scalar(FeatureKey::EyeMovementRate, 6.0);
        map.insert_scalar(FeatureKey::RemDensity, 0.02);
        map
    }

    #[test]
    fn deep_sleep_features_stage_as_n3() {
        let mut classifier = SleepStageClassifier::new();
        let mut stage = SleepStage::Unknown;
        let mut depth = 0.0;
        for _ in 0..5 {
            if let ClassificationResult::SleepStage(r) =
                classifier.classify(&n3_features()).unwrap()
            {
                stage = r.stage;
                depth = r.sleep_depth;
            }
        }
        assert_eq!(stage, SleepStage::N3);
        assert!(depth >= 0.7, "depth {}", depth);
    }

    #[test]
    fn epoch_counter_increments_per_call() {
        let mut classifier = SleepStageClassifier::new();
        for expected in 1..=4u64 {
            if let ClassificationResult::SleepStage(r) =
                classifier.classify(&wake_features()).unwrap()
            {
                assert_eq!(r.epoch_number, expected);
            }
        }
    }

    #[test]
    fn probabilities_are_normalised() {
        let mut classifier = SleepStageClassifier::new();
        let result = classifier.classify(&wake_features()).unwrap();
        assert!((result.probability_sum() - 1.0).abs() <= 1e-6);
    }

    #[test]
    fn transition_prior_resists_single_outlier_epoch() {
        let mut classifier = SleepStageClassifier::new();
        for _ in 0..6 {
            classifier.classify(&n3_features()).unwrap();
        }
        // One ambiguous epoch: no strong evidence for anything.
        let ambiguous = FeatureMap::new(Utc::now(), 30_000.0);
        if let ClassificationResult::SleepStage(r) = classifier.classify(&ambiguous).unwrap() {
            // The N3 row of the transition matrix keeps deep sleep dominant
            // among the prior mass.
            assert!(r.probabilities[&SleepStage::N3] > r.probabilities[&SleepStage::Wake]);
        }
    }

    #[test]
    fn converges_within_ten_epochs() {
        let mut classifier = SleepStageClassifier::new();
        let mut stages = Vec::new();
        for _ in 0..10 {
            if let ClassificationResult::SleepStage(r) =
                classifier.classify(&n3_features()).unwrap()
            {
                stages.push(r.stage);
            }
        }
        assert!(stages[5..].iter().all(|s| *s == stages[5]));
    }
}
