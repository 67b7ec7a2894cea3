//! Data model for the streaming classification pipeline.
//!
//! A [`SamplePacket`] is the unit of ingestion: one multi-channel chunk of
//! samples from a device. The ring buffer re-assembles packets into
//! [`Window`]s, extractors turn windows into [`FeatureMap`]s with a closed
//! keyspace, and classifiers produce one of the [`ClassificationResult`]
//! variants. Packets and results are immutable once emitted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{NeuroError, NeuroResult};

/// Physiological signal modality carried by a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Eeg,
    Emg,
    Eog,
    Ecg,
    Acc,
    Other,
}

/// One timestamped chunk of multi-channel samples emitted by a device.
///
/// `data` is channel-major: `data[c][s]` is sample `s` of channel `c`.
/// `timestamp` marks the wall-clock instant of the first sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplePacket {
    channels: Vec<String>,
    sampling_rate_hz: f64,
    data: Vec<Vec<f32>>,
    timestamp: DateTime<Utc>,
    device_id: String,
    session_id: String,
    signal_type: SignalType,
    source: String,
}

impl SamplePacket {
    /// Build a packet, validating its shape.
    ///
    /// Every row of `data` must have the same length and there must be
    /// exactly one row per channel name. The sampling rate must be finite
    /// and positive.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channels: Vec<String>,
        sampling_rate_hz: f64,
        data: Vec<Vec<f32>>,
        timestamp: DateTime<Utc>,
        device_id: impl Into<String>,
        session_id: impl Into<String>,
        signal_type: SignalType,
        source: impl Into<String>,
    ) -> NeuroResult<Self> {
        if data.len() != channels.len() {
            return Err(NeuroError::InvalidPacket(format!(
                "data has {} rows but {} channels declared",
                data.len(),
                channels.len()
            )));
        }
        let n_samples = data.first().map(Vec::len).unwrap_or(0);
        if n_samples == 0 {
            return Err(NeuroError::InvalidPacket("packet has no samples".into()));
        }
        if data.iter().any(|row| row.len() != n_samples) {
            return Err(NeuroError::InvalidPacket(
                "channel rows have unequal sample counts".into(),
            ));
        }
        if !sampling_rate_hz.is_finite() || sampling_rate_hz <= 0.0 {
            return Err(NeuroError::InvalidPacket(format!(
                "sampling rate {} Hz is not usable",
                sampling_rate_hz
            )));
        }
        Ok(Self {
            channels,
            sampling_rate_hz,
            data,
            timestamp,
            device_id: device_id.into(),
            session_id: session_id.into(),
            signal_type,
            source: source.into(),
        })
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn sampling_rate_hz(&self) -> f64 {
        self.sampling_rate_hz
    }

    pub fn data(&self) -> &[Vec<f32>] {
        &self.data
    }

    pub fn n_samples(&self) -> usize {
        self.data.first().map(Vec::len).unwrap_or(0)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn signal_type(&self) -> SignalType {
        self.signal_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// A contiguous `(channels x samples)` slice re-assembled from the ring
/// buffer, with the wall-clock instant of its first sample attached.
#[derive(Debug, Clone)]
pub struct Window {
    pub channels: Vec<String>,
    pub sampling_rate_hz: f64,
    pub data: Vec<Vec<f32>>,
    pub start_timestamp: DateTime<Utc>,
    pub duration_ms: f64,
}

impl Window {
    pub fn n_channels(&self) -> usize {
        self.data.len()
    }

    pub fn n_samples(&self) -> usize {
        self.data.first().map(Vec::len).unwrap_or(0)
    }

    /// Samples of channel `i`, if present.
    pub fn channel(&self, i: usize) -> Option<&[f32]> {
        self.data.get(i).map(Vec::as_slice)
    }

    /// Index of a channel by name, case-insensitive.
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// True when any sample is NaN or infinite.
    pub fn has_non_finite(&self) -> bool {
        self.data
            .iter()
            .any(|row| row.iter().any(|v| !v.is_finite()))
    }
}

/// Closed keyspace of every feature an extractor can emit.
///
/// Extractors declare their subset statically via
/// `FeatureExtractor::feature_keys`, which keeps the feature bag typed
/// instead of stringly keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    // Band powers (relative, per channel-group mean)
    DeltaPower,
    ThetaPower,
    AlphaPower,
    SigmaPower,
    BetaPower,
    GammaPower,
    // Ratios and indices
    BetaAlphaRatio,
    ThetaBetaRatio,
    AlphaThetaRatio,
    AttentionIndex,
    RelaxationIndex,
    // Spatial features
    FrontalTheta,
    FrontalAlphaAsymmetry,
    AlphaAsymmetry,
    SpectralEntropy,
    MuscleArtifacts,
    HrvFeatures,
    // Sleep features
    SpindleDensity,
    KComplexCount,
    SlowWaveAmplitude,
    DeltaPercentage,
    VertexWaves,
    EyeMovementRate,
    RemDensity,
    EmgPower,
    EegEmgCoherence,
    HjorthMobility,
    HjorthComplexity,
    // Motor imagery features
    MuPowerLeft,
    MuPowerRight,
    BetaPowerLeft,
    BetaPowerRight,
    SmrPower,
    ErdMuLeft,
    ErdMuRight,
    ErdBetaLeft,
    ErdBetaRight,
    CentralErd,
    FrontoCentralBeta,
    CspFeatures,
    SpatialComplexity,
    // Seizure features
    SpectralEdgeFrequency,
    LineLength,
    HjorthActivity,
    NonlinearEnergy,
    WaveletEnergies,
    WaveletEntropy,
    PhaseSynchronization,
    BetaCoherence,
    SampleEntropy,
    ApproximateEntropy,
    SpikeRate,
    SpikeAmplitude,
    FeatureVelocity,
}

impl FeatureKey {
    /// Stable snake_case name, used in metrics labels and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKey::DeltaPower => "delta_power",
            FeatureKey::ThetaPower => "theta_power",
            FeatureKey::AlphaPower => "alpha_power",
            FeatureKey::SigmaPower => "sigma_power",
            FeatureKey::BetaPower => "beta_power",
            FeatureKey::GammaPower => "gamma_power",
            FeatureKey::BetaAlphaRatio => "beta_alpha_ratio",
            FeatureKey::ThetaBetaRatio => "theta_beta_ratio",
            FeatureKey::AlphaThetaRatio => "alpha_theta_ratio",
            FeatureKey::AttentionIndex => "attention_index",
            FeatureKey::RelaxationIndex => "relaxation_index",
            FeatureKey::FrontalTheta => "frontal_theta",
            FeatureKey::FrontalAlphaAsymmetry => "frontal_alpha_asymmetry",
            FeatureKey::AlphaAsymmetry => "alpha_asymmetry",
            FeatureKey::SpectralEntropy => "spectral_entropy",
            FeatureKey::MuscleArtifacts => "muscle_artifacts",
            FeatureKey::HrvFeatures => "hrv_features",
            FeatureKey::SpindleDensity => "spindle_density",
            FeatureKey::KComplexCount => "k_complex_count",
            FeatureKey::SlowWaveAmplitude => "slow_wave_amplitude",
            FeatureKey::DeltaPercentage => "delta_percentage",
            FeatureKey::VertexWaves => "vertex_waves",
            FeatureKey::EyeMovementRate => "eye_movement_rate",
            FeatureKey::RemDensity => "rem_density",
            FeatureKey::EmgPower => "emg_power",
            FeatureKey::EegEmgCoherence => "eeg_emg_coherence",
            FeatureKey::HjorthMobility => "hjorth_mobility",
            FeatureKey::HjorthComplexity => "hjorth_complexity",
            FeatureKey::MuPowerLeft => "mu_power_left",
            FeatureKey::MuPowerRight => "mu_power_right",
            FeatureKey::BetaPowerLeft => "beta_power_left",
            FeatureKey::BetaPowerRight => "beta_power_right",
            FeatureKey::SmrPower => "smr_power",
            FeatureKey::ErdMuLeft => "erd_mu_left",
            FeatureKey::ErdMuRight => "erd_mu_right",
            FeatureKey::ErdBetaLeft => "erd_beta_left",
            FeatureKey::ErdBetaRight => "erd_beta_right",
            FeatureKey::CentralErd => "central_erd",
            FeatureKey::FrontoCentralBeta => "fronto_central_beta",
            FeatureKey::CspFeatures => "csp_features",
            FeatureKey::SpatialComplexity => "spatial_complexity",
            FeatureKey::SpectralEdgeFrequency => "spectral_edge_frequency",
            FeatureKey::LineLength => "line_length",
            FeatureKey::HjorthActivity => "hjorth_activity",
            FeatureKey::NonlinearEnergy => "nonlinear_energy",
            FeatureKey::WaveletEnergies => "wavelet_energies",
            FeatureKey::WaveletEntropy => "wavelet_entropy",
            FeatureKey::PhaseSynchronization => "phase_synchronization",
            FeatureKey::BetaCoherence => "beta_coherence",
            FeatureKey::SampleEntropy => "sample_entropy",
            FeatureKey::ApproximateEntropy => "approximate_entropy",
            FeatureKey::SpikeRate => "spike_rate",
            FeatureKey::SpikeAmplitude => "spike_amplitude",
            FeatureKey::FeatureVelocity => "feature_velocity",
        }
    }
}

/// Named feature vectors produced by one extractor for one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureMap {
    pub features: BTreeMap<FeatureKey, Vec<f64>>,
    pub timestamp: DateTime<Utc>,
    pub window_ms: f64,
    /// 0..=1 quality scalar; 0 flags a window with non-finite input, which
    /// classifiers must map to their Unknown label.
    pub signal_quality: f64,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl FeatureMap {
    pub fn new(timestamp: DateTime<Utc>, window_ms: f64) -> Self {
        Self {
            features: BTreeMap::new(),
            timestamp,
            window_ms,
            signal_quality: 1.0,
            metadata: BTreeMap::new(),
        }
    }

    /// Map flagged unusable; produced when the input window is corrupt.
    pub fn unusable(timestamp: DateTime<Utc>, window_ms: f64) -> Self {
        let mut map = Self::new(timestamp, window_ms);
        map.signal_quality = 0.0;
        map
    }

    pub fn insert_scalar(&mut self, key: FeatureKey, value: f64) {
        self.features.insert(key, vec![value]);
    }

    pub fn insert_vector(&mut self, key: FeatureKey, values: Vec<f64>) {
        self.features.insert(key, values);
    }

    /// Mean of a feature vector, or None when absent or empty.
    pub fn mean(&self, key: FeatureKey) -> Option<f64> {
        let v = self.features.get(&key)?;
        if v.is_empty() {
            return None;
        }
        Some(v.iter().sum::<f64>() / v.len() as f64)
    }

    pub fn vector(&self, key: FeatureKey) -> Option<&[f64]> {
        self.features.get(&key).map(Vec::as_slice)
    }

    pub fn is_usable(&self) -> bool {
        self.signal_quality > 0.0
    }
}

// ===========================================================================
// Classification labels
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentalState {
    Focus,
    Relaxation,
    Stress,
    Neutral,
    Unknown,
}

impl MentalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MentalState::Focus => "focus",
            MentalState::Relaxation => "relaxation",
            MentalState::Stress => "stress",
            MentalState::Neutral => "neutral",
            MentalState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStage {
    Wake,
    N1,
    N2,
    N3,
    Rem,
    Unknown,
}

impl SleepStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SleepStage::Wake => "wake",
            SleepStage::N1 => "n1",
            SleepStage::N2 => "n2",
            SleepStage::N3 => "n3",
            SleepStage::Rem => "rem",
            SleepStage::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorIntent {
    LeftHand,
    RightHand,
    Feet,
    Tongue,
    Rest,
    Unknown,
}

impl MotorIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotorIntent::LeftHand => "left_hand",
            MotorIntent::RightHand => "right_hand",
            MotorIntent::Feet => "feet",
            MotorIntent::Tongue => "tongue",
            MotorIntent::Rest => "rest",
            MotorIntent::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeizureRisk {
    Low,
    Medium,
    High,
    Imminent,
}

impl SeizureRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeizureRisk::Low => "low",
            SeizureRisk::Medium => "medium",
            SeizureRisk::High => "high",
            SeizureRisk::Imminent => "imminent",
        }
    }
}

// ===========================================================================
// Classification results
// ===========================================================================

/// Fields every classification result carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCommon {
    pub timestamp: DateTime<Utc>,
    /// 0..=1 confidence after temporal smoothing.
    pub confidence: f64,
    /// End-to-end latency from window extraction to result, milliseconds.
    pub latency_ms: f64,
    pub extract_ms: f64,
    pub classify_ms: f64,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentalStateResult {
    pub common: ResultCommon,
    pub state: MentalState,
    pub probabilities: BTreeMap<MentalState, f64>,
    pub arousal: f64,
    pub valence: f64,
    pub attention: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepStageResult {
    pub common: ResultCommon,
    pub stage: SleepStage,
    pub probabilities: BTreeMap<SleepStage, f64>,
    pub epoch_number: u64,
    pub sleep_depth: f64,
    pub transition_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorImageryResult {
    pub common: ResultCommon,
    pub intent: MotorIntent,
    pub probabilities: BTreeMap<MotorIntent, f64>,
    /// 2-vector bounded within the unit disk, smoothed against the previous
    /// control output.
    pub control_signal: [f64; 2],
    pub erd_ers_score: f64,
    pub spatial_pattern: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeizurePrediction {
    pub common: ResultCommon,
    pub risk_level: SeizureRisk,
    pub probabilities: BTreeMap<SeizureRisk, f64>,
    pub probability: f64,
    /// Present only when risk is High or Imminent.
    pub time_to_seizure_minutes: Option<f64>,
    pub spatial_focus: Option<Vec<usize>>,
    pub patient_id: String,
}

/// Sum type over all classifier outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationResult {
    MentalState(MentalStateResult),
    SleepStage(SleepStageResult),
    MotorImagery(MotorImageryResult),
    Seizure(SeizurePrediction),
}

impl ClassificationResult {
    pub fn kind(&self) -> &'static str {
        match self {
            ClassificationResult::MentalState(_) => "mental_state",
            ClassificationResult::SleepStage(_) => "sleep_stage",
            ClassificationResult::MotorImagery(_) => "motor_imagery",
            ClassificationResult::Seizure(_) => "seizure_prediction",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ClassificationResult::MentalState(r) => r.state.as_str(),
            ClassificationResult::SleepStage(r) => r.stage.as_str(),
            ClassificationResult::MotorImagery(r) => r.intent.as_str(),
            ClassificationResult::Seizure(r) => r.risk_level.as_str(),
        }
    }

    pub fn common(&self) -> &ResultCommon {
        match self {
            ClassificationResult::MentalState(r) => &r.common,
            ClassificationResult::SleepStage(r) => &r.common,
            ClassificationResult::MotorImagery(r) => &r.common,
            ClassificationResult::Seizure(r) => &r.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut ResultCommon {
        match self {
            ClassificationResult::MentalState(r) => &mut r.common,
            ClassificationResult::SleepStage(r) => &mut r.common,
            ClassificationResult::MotorImagery(r) => &mut r.common,
            ClassificationResult::Seizure(r) => &mut r.common,
        }
    }

    /// Sum of the probability vector, for normalisation checks.
    pub fn probability_sum(&self) -> f64 {
        match self {
            ClassificationResult::MentalState(r) => r.probabilities.values().sum(),
            ClassificationResult::SleepStage(r) => r.probabilities.values().sum(),
            ClassificationResult::MotorImagery(r) => r.probabilities.values().sum(),
            ClassificationResult::Seizure(r) => r.probabilities.values().sum(),
        }
    }
}

// ===========================================================================
// Device state machine
// ===========================================================================

/// Lifecycle state of a device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Error,
}

impl DeviceState {
    /// Legal edges of the lifecycle state machine.
    ///
    /// `Error` is absorbing from every state; only `disconnect` leaves it.
    pub fn can_transition_to(&self, next: DeviceState) -> bool {
        use DeviceState::*;
        if next == Error {
            return true;
        }
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Streaming)
                | (Connected, Disconnected)
                | (Streaming, Connected)
                | (Error, Disconnected)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Disconnected => "disconnected",
            DeviceState::Connecting => "connecting",
            DeviceState::Connected => "connected",
            DeviceState::Streaming => "streaming",
            DeviceState::Error => "error",
        }
    }
}
