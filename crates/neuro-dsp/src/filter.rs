//! Second-order Butterworth IIR sections built on the `biquad` crate.
//!
//! Coefficient design and per-sample application come from `biquad`
//! (`DirectForm1<f64>` with the Butterworth Q). Band-pass filtering is a
//! high-pass / low-pass cascade. Detection code (spindles, K-complexes,
//! artifact counting) uses the forward-backward variants for zero phase
//! shift.

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Q_BUTTERWORTH_F64};

/// Design one Butterworth section, keeping the cutoff strictly inside
/// `(0, Nyquist)` so band edges cannot fail the design.
fn design(kind: biquad::Type<f64>, sampling_rate_hz: f64, fc: f64) -> Option<Coefficients<f64>> {
    let nyquist = sampling_rate_hz / 2.0;
    let fc = fc.clamp(sampling_rate_hz * 1e-6, nyquist * 0.99);
    Coefficients::<f64>::from_params(kind, sampling_rate_hz.hz(), fc.hz(), Q_BUTTERWORTH_F64).ok()
}

fn run_section(coeffs: Coefficients<f64>, x: &[f64]) -> Vec<f64> {
    let mut section = DirectForm1::<f64>::new(coeffs);
    x.iter().map(|&v| section.run(v)).collect()
}

fn apply(kind: biquad::Type<f64>, x: Vec<f64>, sampling_rate_hz: f64, fc: f64) -> Vec<f64> {
    match design(kind, sampling_rate_hz, fc) {
        Some(coeffs) => run_section(coeffs, &x),
        None => x,
    }
}

/// Low-pass filter below `fc` Hz.
pub fn lowpass(signal: &[f32], sampling_rate_hz: f64, fc: f64) -> Vec<f64> {
    apply(biquad::Type::LowPass, crate::to_f64(signal), sampling_rate_hz, fc)
}

/// High-pass filter above `fc` Hz.
pub fn highpass(signal: &[f32], sampling_rate_hz: f64, fc: f64) -> Vec<f64> {
    apply(biquad::Type::HighPass, crate::to_f64(signal), sampling_rate_hz, fc)
}

/// Band-pass over `[lo, hi]` Hz as a high-pass / low-pass cascade.
pub fn bandpass(signal: &[f32], sampling_rate_hz: f64, lo: f64, hi: f64) -> Vec<f64> {
    let hp = apply(biquad::Type::HighPass, crate::to_f64(signal), sampling_rate_hz, lo);
    apply(biquad::Type::LowPass, hp, sampling_rate_hz, hi)
}

/// Forward-backward application of one section; a fresh filter state is
/// used for each direction.
fn filtfilt_one(coeffs: Coefficients<f64>, x: Vec<f64>) -> Vec<f64> {
    let forward = run_section(coeffs, &x);
    let mut reversed: Vec<f64> = forward.into_iter().rev().collect();
    reversed = run_section(coeffs, &reversed);
    reversed.reverse();
    reversed
}

fn apply_zero_phase(
    kind: biquad::Type<f64>,
    x: Vec<f64>,
    sampling_rate_hz: f64,
    fc: f64,
) -> Vec<f64> {
    match design(kind, sampling_rate_hz, fc) {
        Some(coeffs) => filtfilt_one(coeffs, x),
        None => x,
    }
}

/// Zero-phase band-pass (forward-backward application).
pub fn bandpass_zero_phase(signal: &[f32], sampling_rate_hz: f64, lo: f64, hi: f64) -> Vec<f64> {
    let hp = apply_zero_phase(
        biquad::Type::HighPass,
        crate::to_f64(signal),
        sampling_rate_hz,
        lo,
    );
    apply_zero_phase(biquad::Type::LowPass, hp, sampling_rate_hz, hi)
}

/// Zero-phase high-pass, used for detrending before artifact counting.
pub fn highpass_zero_phase(signal: &[f32], sampling_rate_hz: f64, fc: f64) -> Vec<f64> {
    apply_zero_phase(
        biquad::Type::HighPass,
        crate::to_f64(signal),
        sampling_rate_hz,
        fc,
    )
}

/// Zero-phase low-pass.
pub fn lowpass_zero_phase(signal: &[f32], sampling_rate_hz: f64, fc: f64) -> Vec<f64> {
    apply_zero_phase(
        biquad::Type::LowPass,
        crate::to_f64(signal),
        sampling_rate_hz,
        fc,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, rate: f64, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / rate).sin() as f32)
            .collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    #[test]
    fn bandpass_keeps_in_band_tone() {
        let rate = 256.0;
        let x = sine(12.0, rate, 2048);
        let y = bandpass(&x, rate, 8.0, 15.0);
        // Skip the transient at the start.
        assert!(rms(&y[256..]) > 0.5);
    }

    #[test]
    fn bandpass_attenuates_out_of_band_tone() {
        let rate = 256.0;
        let x = sine(60.0, rate, 2048);
        let y = bandpass(&x, rate, 8.0, 15.0);
        assert!(rms(&y[256..]) < 0.1);
    }

    #[test]
    fn highpass_removes_dc() {
        let rate = 256.0;
        let x: Vec<f32> = (0..1024).map(|_| 3.0f32).collect();
        let y = highpass_zero_phase(&x, rate, 1.0);
        assert!(rms(&y[128..896]) < 0.05);
    }

    #[test]
    fn zero_phase_preserves_peak_position() {
        let rate = 256.0;
        // Smooth bump centred mid-window.
        let mut x = vec![0.0f32; 1024];
        for (i, v) in x.iter_mut().enumerate() {
            let d = (i as f64 - 512.0) / 20.0;
            *v = (-0.5 * d * d).exp() as f32;
        }
        let peak_in = x
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();

        let y = lowpass_zero_phase(&x, rate, 20.0);
        let peak_out = y
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();

        assert!((peak_in as i64 - peak_out as i64).abs() < 16);
    }

    #[test]
    fn out_of_range_cutoff_is_clamped_not_failed() {
        let rate = 256.0;
        let x = sine(10.0, rate, 512);
        // Cutoff beyond Nyquist: the design clamps and still filters.
        let y = lowpass(&x, rate, 500.0);
        assert_eq!(y.len(), x.len());
        assert!(rms(&y[64..]) > 0.5, "in-band tone passes");
    }
}
