//! Classifiers, one per classification family.
//!
//! All four share the same shape: threshold-scored indicators squashed
//! through a sigmoid, normalised into a probability vector, a winner picked
//! by margin, and some form of temporal conditioning (history smoothing, a
//! Markov prior, or an exponential window).

mod mental_state;
mod motor_imagery;
mod seizure;
mod sleep;

pub use mental_state::MentalStateClassifier;
pub use motor_imagery::MotorImageryClassifier;
pub use seizure::SeizurePredictor;
pub use sleep::SleepStageClassifier;

/// Winner and margin-boosted confidence from a probability map.
///
/// Confidence is the winning probability amplified by its margin over the
/// runner-up, clamped to 1.
pub(crate) fn winner_with_margin<K: Copy>(probabilities: &[(K, f64)]) -> Option<(K, f64)> {
    if probabilities.is_empty() {
        return None;
    }
    let mut sorted: Vec<(K, f64)> = probabilities.to_vec();
    sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let (best, best_p) = sorted[0];
    let confidence = if sorted.len() > 1 {
        let margin = best_p - sorted[1].1;
        (best_p * (1.0 + margin)).min(1.0)
    } else {
        best_p
    };
    Some((best, confidence))
}

/// Normalise a score vector into probabilities in place. Returns false when
/// every score is zero and the caller should fall back to a prior.
pub(crate) fn normalize_scores(scores: &mut [(impl Copy, f64)]) -> bool {
    let total: f64 = scores.iter().map(|(_, s)| s).sum();
    if total <= 0.0 {
        return false;
    }
    for (_, s) in scores.iter_mut() {
        *s /= total;
    }
    true
}
