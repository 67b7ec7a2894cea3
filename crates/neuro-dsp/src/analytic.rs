//! Analytic signal via the Hilbert transform.
//!
//! Used for spindle envelope detection and for phase-locking measures
//! between channel pairs.

use num_complex::Complex;
use rustfft::FftPlanner;

fn analytic_signal(x: &[f64]) -> Vec<Complex<f64>> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut buf: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fft.process(&mut buf);

    // Analytic-signal spectrum: keep DC (and Nyquist for even n), double
    // positive frequencies, zero negative ones.
    for (k, v) in buf.iter_mut().enumerate() {
        if k == 0 || (n % 2 == 0 && k == n / 2) {
            continue;
        } else if k < n.div_ceil(2) {
            *v *= 2.0;
        } else {
            *v = Complex::new(0.0, 0.0);
        }
    }

    ifft.process(&mut buf);
    let scale = 1.0 / n as f64;
    buf.iter_mut().for_each(|v| *v *= scale);
    buf
}

/// Instantaneous amplitude envelope.
pub fn hilbert_envelope(x: &[f64]) -> Vec<f64> {
    analytic_signal(x).iter().map(|z| z.norm()).collect()
}

/// Instantaneous phase in radians.
pub fn hilbert_phase(x: &[f64]) -> Vec<f64> {
    analytic_signal(x).iter().map(|z| z.arg()).collect()
}

/// Phase-locking value between two signals, in `[0, 1]`.
///
/// Computed as the magnitude of the mean unit phasor of the instantaneous
/// phase difference.
pub fn phase_locking_value(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 {
        return 0.0;
    }
    let px = hilbert_phase(&x[..n]);
    let py = hilbert_phase(&y[..n]);
    let mut acc = Complex::new(0.0f64, 0.0);
    for (a, b) in px.iter().zip(&py) {
        acc += Complex::from_polar(1.0, a - b);
    }
    (acc / n as f64).norm().clamp(0.0, 1.0)
}
