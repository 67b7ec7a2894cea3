//! Power spectral density estimation via Welch's method, plus the band
//! measures derived from it.

use num_complex::Complex;
use rustfft::FftPlanner;

/// One-sided power spectral density.
#[derive(Debug, Clone)]
pub struct Psd {
    /// Bin centre frequencies in Hz, ascending.
    pub freqs: Vec<f64>,
    /// Power density per bin.
    pub power: Vec<f64>,
}

impl Psd {
    /// Total power integrated over `[lo, hi]` Hz (trapezoidal).
    pub fn band_power(&self, lo: f64, hi: f64) -> f64 {
        let mut acc = 0.0;
        for i in 1..self.freqs.len() {
            let (f0, f1) = (self.freqs[i - 1], self.freqs[i]);
            if f1 < lo || f0 > hi {
                continue;
            }
            let df = f1 - f0;
            acc += 0.5 * (self.power[i - 1] + self.power[i]) * df;
        }
        acc
    }

    /// Frequency below which `fraction` of the cumulative power lies.
    pub fn spectral_edge_frequency(&self, fraction: f64) -> f64 {
        let total: f64 = self.power.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        let target = total * fraction.clamp(0.0, 1.0);
        let mut acc = 0.0;
        for (f, p) in self.freqs.iter().zip(&self.power) {
            acc += p;
            if acc >= target {
                return *f;
            }
        }
        *self.freqs.last().unwrap_or(&0.0)
    }

    /// Shannon entropy of the normalised spectrum, in nats.
    pub fn spectral_entropy(&self) -> f64 {
        let total: f64 = self.power.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        -self
            .power
            .iter()
            .filter(|&&p| p > 0.0)
            .map(|&p| {
                let q = p / total;
                q * q.ln()
            })
            .sum::<f64>()
    }
}

fn hann(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos()))
        .collect()
}

/// Welch PSD: Hann-windowed segments with 50 % overlap, averaged
/// periodograms, one-sided scaling.
///
/// `nperseg` is clamped to the signal length. Returns an empty spectrum for
/// signals shorter than two samples.
pub fn welch_psd(signal: &[f32], sampling_rate_hz: f64, nperseg: usize) -> Psd {
    let x = crate::to_f64(signal);
    welch_psd_f64(&x, sampling_rate_hz, nperseg)
}

pub fn welch_psd_f64(x: &[f64], sampling_rate_hz: f64, nperseg: usize) -> Psd {
    let n = x.len();
    if n < 2 {
        return Psd {
            freqs: Vec::new(),
            power: Vec::new(),
        };
    }
    let seg = nperseg.clamp(2, n);
    let step = (seg / 2).max(1);
    let window = hann(seg);
    let win_norm: f64 = window.iter().map(|w| w * w).sum();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(seg);

    let n_bins = seg / 2 + 1;
    let mut acc = vec![0.0f64; n_bins];
    let mut segments = 0usize;

    let mut start = 0;
    while start + seg <= n {
        let mut buf: Vec<Complex<f64>> = x[start..start + seg]
            .iter()
            .zip(&window)
            .map(|(v, w)| Complex::new(v * w, 0.0))
            .collect();
        fft.process(&mut buf);

        for (k, acc_k) in acc.iter_mut().enumerate() {
            let mut p = buf[k].norm_sqr() / (sampling_rate_hz * win_norm);
            // One-sided spectrum: double everything except DC and Nyquist.
            if k != 0 && !(seg % 2 == 0 && k == seg / 2) {
                p *= 2.0;
            }
            *acc_k += p;
        }
        segments += 1;
        start += step;
    }

    if segments == 0 {
        // Signal shorter than one segment; fall back to a single padded pass.
        return welch_psd_f64(x, sampling_rate_hz, n);
    }

    let freqs = (0..n_bins)
        .map(|k| k as f64 * sampling_rate_hz / seg as f64)
        .collect();
    let power = acc.iter().map(|p| p / segments as f64).collect();
    Psd { freqs, power }
}

/// Magnitude-squared coherence between two signals, averaged over
/// `[lo, hi]` Hz. Returns a value in `[0, 1]`.
pub fn band_coherence(
    x: &[f32],
    y: &[f32],
    sampling_rate_hz: f64,
    nperseg: usize,
    lo: f64,
    hi: f64,
) -> f64 {
    let n = x.len().min(y.len());
    if n < 4 {
        return 0.0;
    }
    let seg = nperseg.clamp(2, n);
    let step = (seg / 2).max(1);
    let window = hann(seg);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(seg);

    let n_bins = seg / 2 + 1;
    let mut pxx = vec![0.0f64; n_bins];
    let mut pyy = vec![0.0f64; n_bins];
    let mut pxy = vec![Complex::new(0.0f64, 0.0); n_bins];
    let mut segments = 0usize;

    let mut start = 0;
    while start + seg <= n {
        let mut bx: Vec<Complex<f64>> = x[start..start + seg]
            .iter()
            .zip(&window)
            .map(|(v, w)| Complex::new(*v as f64 * w, 0.0))
            .collect();
        let mut by: Vec<Complex<f64>> = y[start..start + seg]
            .iter()
            .zip(&window)
            .map(|(v, w)| Complex::new(*v as f64 * w, 0.0))
            .collect();
        fft.process(&mut bx);
        fft.process(&mut by);

        for k in 0..n_bins {
            pxx[k] += bx[k].norm_sqr();
            pyy[k] += by[k].norm_sqr();
            pxy[k] += bx[k] * by[k].conj();
        }
        segments += 1;
        start += step;
    }

    if segments < 2 {
        // Coherence of a single segment is identically 1; not informative.
        return 0.0;
    }

    let df = sampling_rate_hz / seg as f64;
    let mut acc = 0.0;
    let mut count = 0usize;
    for k in 0..n_bins {
        let f = k as f64 * df;
        if f < lo || f > hi {
            continue;
        }
        let denom = pxx[k] * pyy[k];
        if denom > 0.0 {
            acc += pxy[k].norm_sqr() / denom;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        (acc / count as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, rate: f64, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / rate).sin() as f32)
            .collect()
    }

    #[test]
    fn sine_peak_lands_in_its_band() {
        let rate = 256.0;
        let x = sine(10.0, rate, 1024);
        let psd = welch_psd(&x, rate, 256);

        let alpha = psd.band_power(8.0, 13.0);
        let beta = psd.band_power(13.0, 30.0);
        let delta = psd.band_power(0.5, 4.0);
        assert!(alpha > 10.0 * beta, "alpha {} beta {}", alpha, beta);
        assert!(alpha > 10.0 * delta);
    }

    #[test]
    fn edge_frequency_tracks_content() {
        let rate = 256.0;
        let low = sine(5.0, rate, 1024);
        let high = sine(40.0, rate, 1024);
        let psd_low = welch_psd(&low, rate, 256);
        let psd_high = welch_psd(&high, rate, 256);
        assert!(psd_low.spectral_edge_frequency(0.95) < psd_high.spectral_edge_frequency(0.95));
    }

    #[test]
    fn entropy_higher_for_noise_like_spectra() {
        let psd_tone = Psd {
            freqs: (0..64).map(|i| i as f64).collect(),
            power: {
                let mut p = vec![0.0; 64];
                p[10] = 1.0;
                p
            },
        };
        let psd_flat = Psd {
            freqs: (0..64).map(|i| i as f64).collect(),
            power: vec![1.0; 64],
        };
        assert!(psd_flat.spectral_entropy() > psd_tone.spectral_entropy());
    }

    #[test]
    fn coherence_of_identical_signals_is_high() {
        let rate = 128.0;
        let x = sine(6.0, rate, 512);
        let c = band_coherence(&x, &x, rate, 128, 2.0, 10.0);
        assert!(c > 0.9, "coherence {}", c);
    }

    #[test]
    fn empty_signal_yields_empty_psd() {
        let psd = welch_psd(&[], 256.0, 256);
        assert!(psd.freqs.is_empty());
        assert_eq!(psd.band_power(0.5, 45.0), 0.0);
    }
}
