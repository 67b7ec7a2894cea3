//! Signal-quality types shared between the quality monitor and devices.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Discrete quality grade, ordered from best to worst.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
    Bad,
}

impl QualityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::Excellent => "excellent",
            QualityLevel::Good => "good",
            QualityLevel::Fair => "fair",
            QualityLevel::Poor => "poor",
            QualityLevel::Bad => "bad",
        }
    }

    /// The worse of two levels. `Ord` sorts Excellent < Bad, so worst is max.
    pub fn worst(self, other: QualityLevel) -> QualityLevel {
        self.max(other)
    }
}

/// Per-channel quality metrics computed over one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelQuality {
    pub snr_db: f64,
    pub rms_amplitude: f64,
    /// Line-noise power as a fraction of total band power, 0..=1.
    pub line_noise_ratio: f64,
    pub artifact_count: usize,
    pub level: QualityLevel,
}

/// Electrode impedance measurement for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpedanceResult {
    pub impedance_ohms: f64,
    pub level: QualityLevel,
}

/// Window-level roll-up across channels.
///
/// `overall` is the worst per-channel level; a single bad electrode makes
/// the whole window suspect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySummary {
    pub per_channel: Vec<ChannelQuality>,
    pub overall: QualityLevel,
    pub mean_snr_db: f64,
    pub min_snr_db: f64,
    pub level_counts: BTreeMap<QualityLevel, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_picks_lower_grade() {
        assert_eq!(
            QualityLevel::Good.worst(QualityLevel::Poor),
            QualityLevel::Poor
        );
        assert_eq!(
            QualityLevel::Excellent.worst(QualityLevel::Excellent),
            QualityLevel::Excellent
        );
    }
}
