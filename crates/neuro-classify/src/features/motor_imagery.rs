//! Motor-imagery features: hemispheric mu/beta powers, ERD against a
//! running baseline, optional CSP log-variance projections, and a spatial
//! complexity measure from the channel covariance.

use std::collections::BTreeMap;

use neuro_core::types::{FeatureKey, FeatureMap, Window};
use neuro_core::NeuroResult;

use crate::traits::FeatureExtractor;

use super::{channel_psds, mean_band_power, named_indices, BETA, MU, SMR};

const LEFT_CHANNELS: [&str; 6] = ["C3", "CP3", "FC3", "C1", "CP1", "FC1"];
const RIGHT_CHANNELS: [&str; 6] = ["C4", "CP4", "FC4", "C2", "CP2", "FC2"];
const CENTRAL_CHANNELS: [&str; 3] = ["Cz", "FCz", "CPz"];
const FRONTOCENTRAL_CHANNELS: [&str; 3] = ["FC1", "FC2", "Cz"];

/// EMA learning rate for the power baseline.
const BASELINE_ALPHA: f64 = 0.1;
/// Baseline is considered stable after this many windows.
const BASELINE_STABLE_WINDOWS: u32 = 10;

static KEYS: &[FeatureKey] = &[
    FeatureKey::MuPowerLeft,
    FeatureKey::MuPowerRight,
    FeatureKey::BetaPowerLeft,
    FeatureKey::BetaPowerRight,
    FeatureKey::SmrPower,
    FeatureKey::ErdMuLeft,
    FeatureKey::ErdMuRight,
    FeatureKey::ErdBetaLeft,
    FeatureKey::ErdBetaRight,
    FeatureKey::CentralErd,
    FeatureKey::FrontoCentralBeta,
    FeatureKey::CspFeatures,
    FeatureKey::SpatialComplexity,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum BaselineKey {
    MuLeft,
    MuRight,
    BetaLeft,
    BetaRight,
    MuCentral,
    BetaFrontoCentral,
}

/// Motor-imagery feature extractor with a per-stream EMA baseline.
#[derive(Debug)]
pub struct MotorImageryFeatures {
    window_ms: f64,
    baseline: BTreeMap<BaselineKey, f64>,
    baseline_windows: u32,
    /// Fixed spatial filters trained offline, rows are projections.
    csp_filters: Option<Vec<Vec<f64>>>,
}

impl MotorImageryFeatures {
    pub fn new() -> Self {
        Self {
            window_ms: 1000.0,
            baseline: BTreeMap::new(),
            baseline_windows: 0,
            csp_filters: None,
        }
    }

    /// Install a fixed CSP projection. Each row must have one weight per
    /// channel of the incoming windows.
    pub fn set_csp_filters(&mut self, filters: Vec<Vec<f64>>) {
        self.csp_filters = Some(filters);
    }

    pub fn baseline_stable(&self) -> bool {
        self.baseline_windows >= BASELINE_STABLE_WINDOWS
    }

    /// Drop the baseline, e.g. after an electrode re-fit.
    pub fn reset_baseline(&mut self) {
        self.baseline.clear();
        self.baseline_windows = 0;
    }

    fn erd_against_baseline(&self, key: BaselineKey, current: f64) -> f64 {
        if !self.baseline_stable() {
            return 0.0;
        }
        match self.baseline.get(&key) {
            Some(&base) if base > 0.0 => (current - base) / base,
            _ => 0.0,
        }
    }

    fn update_baseline(&mut self, key: BaselineKey, current: f64) {
        self.baseline
            .entry(key)
            .and_modify(|b| *b = (1.0 - BASELINE_ALPHA) * *b + BASELINE_ALPHA * current)
            .or_insert(current);
    }
}

impl Default for MotorImageryFeatures {
    fn default() -> Self {
        Self::new()
    }
}

/// Spread of the channel covariance spectrum: 0 when one spatial component
/// dominates, approaching 1 for spatially rich activity.
fn spatial_complexity(window: &Window) -> f64 {
    let c = window.n_channels();
    let n = window.n_samples();
    if c < 2 || n < 2 {
        return 0.0;
    }

    // Channel covariance matrix.
    let means: Vec<f64> = window
        .data
        .iter()
        .map(|ch| ch.iter().map(|&v| v as f64).sum::<f64>() / n as f64)
        .collect();
    let mut cov = vec![vec![0.0f64; c]; c];
    for i in 0..c {
        for j in i..c {
            let mut acc = 0.0;
            for s in 0..n {
                acc += (window.data[i][s] as f64 - means[i]) * (window.data[j][s] as f64 - means[j]);
            }
            let v = acc / (n - 1) as f64;
            cov[i][j] = v;
            cov[j][i] = v;
        }
    }

    let trace: f64 = (0..c).map(|i| cov[i][i]).sum();
    if trace <= 0.0 {
        return 0.0;
    }

    // Largest eigenvalue by power iteration with a fixed start vector.
    let mut v = vec![1.0f64; c];
    for _ in 0..32 {
        let mut next = vec![0.0f64; c];
        for i in 0..c {
            for j in 0..c {
                next[i] += cov[i][j] * v[j];
            }
        }
        let norm = next.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm <= 0.0 {
            return 0.0;
        }
        next.iter_mut().for_each(|x| *x /= norm);
        v = next;
    }
    let mut lambda = 0.0;
    for i in 0..c {
        let mut row = 0.0;
        for j in 0..c {
            row += cov[i][j] * v[j];
        }
        lambda += v[i] * row;
    }

    (1.0 - (lambda / trace)).clamp(0.0, 1.0)
}

impl FeatureExtractor for MotorImageryFeatures {
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
        let psds = channel_psds(window);

        let left = named_indices(window, &LEFT_CHANNELS);
        let right = named_indices(window, &RIGHT_CHANNELS);
        let central = named_indices(window, &CENTRAL_CHANNELS);
        let frontocentral = named_indices(window, &FRONTOCENTRAL_CHANNELS);

        // Unlabelled montages fall back to a half split so the pipeline
        // still produces lateralised powers.
        let (left, right) = if left.is_empty() && right.is_empty() {
            let c = window.n_channels();
            ((0..c / 2).collect(), (c / 2..c).collect())
        } else {
            (left, right)
        };

        let mu_left = mean_band_power(&psds, &left, MU);
        let mu_right = mean_band_power(&psds, &right, MU);
        let beta_left = mean_band_power(&psds, &left, BETA);
        let beta_right = mean_band_power(&psds, &right, BETA);

        map.insert_scalar(FeatureKey::MuPowerLeft, mu_left);
        map.insert_scalar(FeatureKey::MuPowerRight, mu_right);
        map.insert_scalar(FeatureKey::BetaPowerLeft, beta_left);
        map.insert_scalar(FeatureKey::BetaPowerRight, beta_right);

        map.insert_scalar(
            FeatureKey::ErdMuLeft,
            self.erd_against_baseline(BaselineKey::MuLeft, mu_left),
        );
        map.insert_scalar(
            FeatureKey::ErdMuRight,
            self.erd_against_baseline(BaselineKey::MuRight, mu_right),
        );
        map.insert_scalar(
            FeatureKey::ErdBetaLeft,
            self.erd_against_baseline(BaselineKey::BetaLeft, beta_left),
        );
        map.insert_scalar(
            FeatureKey::ErdBetaRight,
            self.erd_against_baseline(BaselineKey::BetaRight, beta_right),
        );

        if !central.is_empty() {
            let mu_central = mean_band_power(&psds, &central, MU);
            map.insert_scalar(
                FeatureKey::CentralErd,
                self.erd_against_baseline(BaselineKey::MuCentral, mu_central),
            );
            self.update_baseline(BaselineKey::MuCentral, mu_central);
        }
        if !frontocentral.is_empty() {
            let beta_fc = mean_band_power(&psds, &frontocentral, BETA);
            // Signed relative change; the classifier reacts to its magnitude.
            map.insert_scalar(
                FeatureKey::FrontoCentralBeta,
                self.erd_against_baseline(BaselineKey::BetaFrontoCentral, beta_fc),
            );
            self.update_baseline(BaselineKey::BetaFrontoCentral, beta_fc);
        }

        let all: Vec<usize> = (0..window.n_channels()).collect();
        map.insert_scalar(FeatureKey::SmrPower, mean_band_power(&psds, &all, SMR));
        map.insert_scalar(FeatureKey::SpatialComplexity, spatial_complexity(window));

        if let Some(filters) = &self.csp_filters {
            let n = window.n_samples();
            let mut log_vars = Vec::with_capacity(filters.len());
            for row in filters {
                if row.len() != window.n_channels() || n < 2 {
                    continue;
                }
                let projected: Vec<f64> = (0..n)
                    .map(|s| {
                        row.iter()
                            .zip(&window.data)
                            .map(|(w, ch)| w * ch[s] as f64)
                            .sum()
                    })
                    .collect();
                let mean = projected.iter().sum::<f64>() / n as f64;
                let var = projected.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
                    / (n - 1) as f64;
                log_vars.push((var + f64::MIN_POSITIVE).ln());
            }
            if !log_vars.is_empty() {
                map.insert_vector(FeatureKey::CspFeatures, log_vars);
            }
        }

        // Update the EMA after scoring so the current window never sees its
        // own contribution.
        self.update_baseline(BaselineKey::MuLeft, mu_left);
        self.update_baseline(BaselineKey::MuRight, mu_right);
        self.update_baseline(BaselineKey::BetaLeft, beta_left);
        self.update_baseline(BaselineKey::BetaRight, beta_right);
        self.baseline_windows += 1;

        map.metadata.insert(
            "baseline_stable".into(),
            serde_json::Value::Bool(self.baseline_stable()),
        );

        Ok(map)
    }
}
