//! Online signal-quality monitor.
//!
//! Stateless per-window scoring: SNR against the EEG band with the mains
//! component excluded, line-noise share, artifact counting after a 1 Hz
//! detrend, and an impedance step function. Deterministic for a given
//! `(signal, sampling rate, line frequency)`.

use neuro_core::quality::{ChannelQuality, ImpedanceResult, QualityLevel, QualitySummary};
use neuro_core::types::Window;
use neuro_core::{NeuroError, NeuroResult};

use crate::spectral::welch_psd;
use crate::{filter, stats};

/// Signal band considered physiological, Hz.
const SIGNAL_BAND: (f64, f64) = (0.5, 45.0);
/// Half-width of the mains exclusion notch, Hz.
const LINE_HALF_WIDTH: f64 = 2.0;
/// Amplitude threshold for artifact counting, in standard deviations.
const ARTIFACT_SIGMA: f64 = 5.0;
/// Floor applied to the noise estimate before the log ratio.
const NOISE_FLOOR: f64 = 1e-12;

/// Configuration for quality analysis.
#[derive(Debug, Clone, Copy)]
pub struct SignalQualityConfig {
    pub sampling_rate_hz: f64,
    /// Mains frequency, 50 or 60 Hz.
    pub line_freq_hz: f64,
}

impl SignalQualityConfig {
    pub fn new(sampling_rate_hz: f64, line_freq_hz: f64) -> NeuroResult<Self> {
        if line_freq_hz != 50.0 && line_freq_hz != 60.0 {
            return Err(NeuroError::Config(format!(
                "line frequency must be 50 or 60 Hz, got {}",
                line_freq_hz
            )));
        }
        if !sampling_rate_hz.is_finite() || sampling_rate_hz <= 0.0 {
            return Err(NeuroError::Config(format!(
                "sampling rate {} Hz is not usable",
                sampling_rate_hz
            )));
        }
        Ok(Self {
            sampling_rate_hz,
            line_freq_hz,
        })
    }
}

/// Score one channel.
pub fn analyze_channel(signal: &[f32], cfg: &SignalQualityConfig) -> ChannelQuality {
    let psd = welch_psd(signal, cfg.sampling_rate_hz, 256.min(signal.len().max(2)));

    let line_lo = cfg.line_freq_hz - LINE_HALF_WIDTH;
    let line_hi = cfg.line_freq_hz + LINE_HALF_WIDTH;

    let total_band = psd.band_power(SIGNAL_BAND.0, SIGNAL_BAND.1);
    // Mains power is measured at the line frequency wherever it falls; the
    // part overlapping the signal band is removed from the signal estimate.
    let line_power = psd.band_power(line_lo, line_hi);
    let line_in_band = psd.band_power(line_lo.max(SIGNAL_BAND.0), line_hi.min(SIGNAL_BAND.1));
    let signal_power = (total_band - line_in_band).max(0.0);

    // Noise estimate: mains component plus everything above the band,
    // without counting the line band twice.
    let nyquist = cfg.sampling_rate_hz / 2.0;
    let high_noise = if nyquist > SIGNAL_BAND.1 {
        let raw = psd.band_power(SIGNAL_BAND.1, nyquist);
        let line_in_high = psd.band_power(line_lo.max(SIGNAL_BAND.1), line_hi.min(nyquist));
        (raw - line_in_high).max(0.0)
    } else {
        0.0
    };
    let noise_power = (line_power + high_noise).max(NOISE_FLOOR);

    let snr_db = 10.0 * (signal_power.max(NOISE_FLOOR) / noise_power).log10();
    let measured_total = total_band + line_power - line_in_band;
    let line_noise_ratio = if measured_total > 0.0 {
        (line_power / measured_total).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let artifact_count = count_artifacts(signal, cfg.sampling_rate_hz);
    let duration_s = signal.len() as f64 / cfg.sampling_rate_hz;
    let level = grade_channel(snr_db, line_noise_ratio, artifact_count, duration_s);

    ChannelQuality {
        snr_db,
        rms_amplitude: stats::rms(signal),
        line_noise_ratio,
        artifact_count,
        level,
    }
}

/// Samples exceeding `ARTIFACT_SIGMA` standard deviations after a 1 Hz
/// zero-phase detrend. Clipping and spike excursions both land here.
fn count_artifacts(signal: &[f32], sampling_rate_hz: f64) -> usize {
    if signal.len() < 8 {
        return 0;
    }
    let detrended = filter::highpass_zero_phase(signal, sampling_rate_hz, 1.0);
    let sd = stats::std_dev(&detrended);
    if sd <= 0.0 {
        return 0;
    }
    let threshold = ARTIFACT_SIGMA * sd;
    detrended.iter().filter(|v| v.abs() > threshold).count()
}

fn grade_channel(
    snr_db: f64,
    line_noise_ratio: f64,
    artifact_count: usize,
    duration_s: f64,
) -> QualityLevel {
    let artifact_rate = if duration_s > 0.0 {
        artifact_count as f64 / duration_s
    } else {
        artifact_count as f64
    };

    if snr_db < 5.0 || artifact_rate > 5.0 {
        QualityLevel::Bad
    } else if snr_db < 10.0 || artifact_rate > 2.0 || line_noise_ratio > 0.30 {
        QualityLevel::Poor
    } else if snr_db < 15.0 || artifact_rate > 1.0 || line_noise_ratio > 0.15 {
        QualityLevel::Fair
    } else if snr_db < 20.0 || artifact_count > 0 || line_noise_ratio >= 0.05 {
        QualityLevel::Good
    } else {
        QualityLevel::Excellent
    }
}

/// Score every channel of a window and roll up.
pub fn analyze_window(window: &Window, cfg: &SignalQualityConfig) -> QualitySummary {
    let per_channel: Vec<ChannelQuality> = window
        .data
        .iter()
        .map(|ch| analyze_channel(ch, cfg))
        .collect();

    let overall = per_channel
        .iter()
        .map(|c| c.level)
        .fold(QualityLevel::Excellent, QualityLevel::worst);

    let snrs: Vec<f64> = per_channel.iter().map(|c| c.snr_db).collect();
    let mean_snr_db = if snrs.is_empty() {
        0.0
    } else {
        snrs.iter().sum::<f64>() / snrs.len() as f64
    };
    let min_snr_db = snrs.iter().cloned().fold(f64::INFINITY, f64::min);

    let mut level_counts = std::collections::BTreeMap::new();
    for c in &per_channel {
        *level_counts.entry(c.level).or_insert(0) += 1;
    }

    QualitySummary {
        per_channel,
        overall,
        mean_snr_db,
        min_snr_db: if min_snr_db.is_finite() { min_snr_db } else { 0.0 },
        level_counts,
    }
}

/// Impedance grading, boundaries in kilo-ohms: 5 / 10 / 25 / 50.
pub fn impedance_level(impedance_ohms: f64) -> ImpedanceResult {
    let level = if impedance_ohms < 5_000.0 {
        QualityLevel::Excellent
    } else if impedance_ohms < 10_000.0 {
        QualityLevel::Good
    } else if impedance_ohms < 25_000.0 {
        QualityLevel::Fair
    } else if impedance_ohms < 50_000.0 {
        QualityLevel::Poor
    } else {
        QualityLevel::Bad
    };
    ImpedanceResult {
        impedance_ohms,
        level,
    }
}
