//! End-to-end extractor + classifier scenarios on synthetic signals.

use chrono::Utc;
use neuro_classify::classifiers::{
    MentalStateClassifier, MotorImageryClassifier, SleepStageClassifier,
};
use neuro_classify::features::{MentalStateFeatures, MotorImageryFeatures, SleepFeatures};
use neuro_classify::traits::{Classifier, FeatureExtractor};
use neuro_core::types::{ClassificationResult, MentalState, MotorIntent, SleepStage, Window};

fn sine(freq: f64, rate: f64, n: usize, amp: f64) -> Vec<f32> {
    (0..n)
        .map(|i| (amp * (2.0 * std::f64::consts::PI * freq * i as f64 / rate).sin()) as f32)
        .collect()
}

fn window(channels: Vec<(&str, Vec<f32>)>, rate: f64) -> Window {
    let n = channels.first().map(|(_, d)| d.len()).unwrap_or(0);
    Window {
        channels: channels.iter().map(|(name, _)| name.to_string()).collect(),
        sampling_rate_hz: rate,
        data: channels.into_iter().map(|(_, d)| d).collect(),
        start_timestamp: Utc::now(),
        duration_ms: n as f64 / rate * 1000.0,
    }
}

/// Clean 10 Hz alpha over one second at 256 Hz settles on relaxation.
#[test]
fn alpha_sine_classifies_as_relaxation() {
    let rate = 256.0;
    let mut extractor = MentalStateFeatures::new();
    let mut classifier = MentalStateClassifier::new();

    let mut last = None;
    for _ in 0..10 {
        let w = window(
            vec![
                ("F3", sine(10.0, rate, 256, 20.0)),
                ("F4", sine(10.0, rate, 256, 20.0)),
                ("C3", sine(10.0, rate, 256, 20.0)),
                ("C4", sine(10.0, rate, 256, 20.0)),
            ],
            rate,
        );
        let features = extractor.extract(&w).unwrap();
        assert!(features.is_usable());
        last = Some(classifier.classify(&features).unwrap());
    }

    match last.unwrap() {
        ClassificationResult::MentalState(r) => {
            assert_eq!(r.state, MentalState::Relaxation);
            assert!(r.common.confidence >= 0.5, "confidence {}", r.common.confidence);
            assert!(r.probabilities[&MentalState::Relaxation] > r.probabilities[&MentalState::Focus]);
        }
        other => panic!("unexpected variant {:?}", other.kind()),
    }
}

/// Thirty seconds of 0.5-2 Hz high-amplitude EEG with flat EMG and quiet
/// EOG stages as N3 with deep sleep depth; the epoch counter advances once
/// per call.
#[test]
fn n3_synthetic_epoch_stages_as_deep_sleep() {
    let rate = 100.0;
    let n = 3000;
    let mut extractor = SleepFeatures::new();
    let mut classifier = SleepStageClassifier::new();

    let mut last_epoch = 0;
    let mut result = None;
    for call in 1..=3u64 {
        let w = window(
            vec![
                ("C3", sine(1.0, rate, n, 100.0)),
                ("C4", sine(1.5, rate, n, 100.0)),
                ("EOG1", sine(0.4, rate, n, 2.0)),
                ("EMG1", sine(40.0, rate, n, 0.5)),
            ],
            rate,
        );
        let features = extractor.extract(&w).unwrap();
        match classifier.classify(&features).unwrap() {
            ClassificationResult::SleepStage(r) => {
                assert_eq!(r.epoch_number, call, "epoch increments per call");
                last_epoch = r.epoch_number;
                result = Some(r);
            }
            other => panic!("unexpected variant {:?}", other.kind()),
        }
    }

    let r = result.unwrap();
    assert_eq!(last_epoch, 3);
    assert_eq!(r.stage, SleepStage::N3);
    assert!(r.sleep_depth >= 0.7, "depth {}", r.sleep_depth);
    assert!((r.probabilities.values().sum::<f64>() - 1.0).abs() <= 1e-6);
}

/// Ten baseline windows, then a 40 % mu-power drop at C4: the classifier
/// must report left-hand imagery with a leftward control vector.
#[test]
fn contralateral_erd_at_c4_yields_left_hand() {
    let rate = 256.0;
    let n = 512;
    let mut extractor = MotorImageryFeatures::new();
    let mut classifier = MotorImageryClassifier::new();

    for _ in 0..10 {
        let w = window(
            vec![
                ("C3", sine(10.0, rate, n, 10.0)),
                ("C4", sine(10.0, rate, n, 10.0)),
            ],
            rate,
        );
        let features = extractor.extract(&w).unwrap();
        classifier.classify(&features).unwrap();
    }
    assert!(extractor.baseline_stable());

    // Amplitude 0.6x gives mu power 0.36x, well past the ERD threshold.
    let w = window(
        vec![
            ("C3", sine(10.0, rate, n, 10.0)),
            ("C4", sine(10.0, rate, n, 6.0)),
        ],
        rate,
    );
    let features = extractor.extract(&w).unwrap();
    match classifier.classify(&features).unwrap() {
        ClassificationResult::MotorImagery(r) => {
            assert_eq!(r.intent, MotorIntent::LeftHand);
            assert!(r.common.confidence >= 0.5, "confidence {}", r.common.confidence);
            let [x, y] = r.control_signal;
            assert!(x < 0.0 && x >= -1.0, "control x {}", x);
            assert!(y.abs() < 0.05, "control y {}", y);
            assert!(r.erd_ers_score < 0.0);
        }
        other => panic!("unexpected variant {:?}", other.kind()),
    }
}

/// Feeding any constant feature vector converges to a fixed label within
/// ten windows.
#[test]
fn constant_input_converges_within_ten_windows() {
    let rate = 256.0;
    let mut extractor = MentalStateFeatures::new();
    let mut classifier = MentalStateClassifier::new();

    let mut labels = Vec::new();
    for _ in 0..12 {
        let w = window(
            vec![
                ("F3", sine(10.0, rate, 256, 15.0)),
                ("F4", sine(10.0, rate, 256, 15.0)),
            ],
            rate,
        );
        let features = extractor.extract(&w).unwrap();
        labels.push(classifier.classify(&features).unwrap().label().to_string());
    }
    let fixed = labels.last().unwrap();
    assert!(labels[9..].iter().all(|l| l == fixed), "labels {:?}", labels);
}
