//! Time-domain statistics used by the feature extractors.

/// Root-mean-square amplitude.
pub fn rms(x: &[f32]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    (x.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / x.len() as f64).sqrt()
}

pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

pub fn variance(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return 0.0;
    }
    let m = mean(x);
    x.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / x.len() as f64
}

pub fn std_dev(x: &[f64]) -> f64 {
    variance(x).sqrt()
}

fn diff(x: &[f64]) -> Vec<f64> {
    x.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Hjorth parameters: activity (variance), mobility, complexity.
pub fn hjorth(signal: &[f32]) -> (f64, f64, f64) {
    let x = crate::to_f64(signal);
    let activity = variance(&x);
    if activity <= 0.0 || x.len() < 3 {
        return (activity, 0.0, 0.0);
    }
    let dx = diff(&x);
    let var_dx = variance(&dx);
    let mobility = (var_dx / activity).sqrt();
    if var_dx <= 0.0 {
        return (activity, mobility, 0.0);
    }
    let ddx = diff(&dx);
    let mobility_dx = (variance(&ddx) / var_dx).sqrt();
    let complexity = if mobility > 0.0 {
        mobility_dx / mobility
    } else {
        0.0
    };
    (activity, mobility, complexity)
}

/// Accumulated absolute first difference, a classic seizure indicator.
pub fn line_length(signal: &[f32]) -> f64 {
    signal
        .windows(2)
        .map(|w| (w[1] as f64 - w[0] as f64).abs())
        .sum()
}

/// Mean Teager nonlinear energy `E[x_t^2 - x_{t-1} * x_{t+1}]`.
pub fn nonlinear_energy(signal: &[f32]) -> f64 {
    if signal.len() < 3 {
        return 0.0;
    }
    let n = signal.len() - 2;
    let mut acc = 0.0;
    for i in 1..signal.len() - 1 {
        let x = signal[i] as f64;
        let prev = signal[i - 1] as f64;
        let next = signal[i + 1] as f64;
        acc += x * x - prev * next;
    }
    acc / n as f64
}

fn count_matches(x: &[f64], m: usize, r: f64) -> (f64, f64) {
    // Counts template matches of length m and m+1 with Chebyshev distance.
    let n = x.len();
    if n <= m + 1 {
        return (0.0, 0.0);
    }
    let mut count_m = 0u64;
    let mut count_m1 = 0u64;
    for i in 0..n - m {
        for j in (i + 1)..n - m {
            let mut within = true;
            for k in 0..m {
                if (x[i + k] - x[j + k]).abs() > r {
                    within = false;
                    break;
                }
            }
            if !within {
                continue;
            }
            count_m += 1;
            if i + m < n && j + m < n && (x[i + m] - x[j + m]).abs() <= r {
                count_m1 += 1;
            }
        }
    }
    (count_m as f64, count_m1 as f64)
}

/// Sample entropy with m = 2 and tolerance `r_factor * sigma`.
///
/// Returns 0 for degenerate signals (constant, too short).
pub fn sample_entropy(signal: &[f32], m: usize, r_factor: f64) -> f64 {
    let x = crate::to_f64(signal);
    let sd = std_dev(&x);
    if sd <= 0.0 || x.len() < m + 2 {
        return 0.0;
    }
    let r = r_factor * sd;
    let (a, b) = count_matches(&x, m, r);
    if a <= 0.0 || b <= 0.0 {
        return 0.0;
    }
    -(b / a).ln()
}

/// Approximate entropy with m = 2 and tolerance `r_factor * sigma`.
pub fn approximate_entropy(signal: &[f32], m: usize, r_factor: f64) -> f64 {
    let x = crate::to_f64(signal);
    let sd = std_dev(&x);
    let n = x.len();
    if sd <= 0.0 || n < m + 2 {
        return 0.0;
    }
    let r = r_factor * sd;

    let phi = |m: usize| -> f64 {
        let count = n - m + 1;
        let mut acc = 0.0;
        for i in 0..count {
            let mut matches = 0u64;
            for j in 0..count {
                let mut within = true;
                for k in 0..m {
                    if (x[i + k] - x[j + k]).abs() > r {
                        within = false;
                        break;
                    }
                }
                if within {
                    matches += 1;
                }
            }
            acc += (matches as f64 / count as f64).ln();
        }
        acc / count as f64
    };

    phi(m) - phi(m + 1)
}

/// Indices of peaks exceeding `mean + k * sigma`, separated by at least
/// `min_separation` samples.
pub fn detect_spikes(signal: &[f32], k: f64, min_separation: usize) -> Vec<usize> {
    let x = crate::to_f64(signal);
    if x.len() < 3 {
        return Vec::new();
    }
    let m = mean(&x);
    let sd = std_dev(&x);
    if sd <= 0.0 {
        return Vec::new();
    }
    let threshold = m + k * sd;

    let mut spikes = Vec::new();
    let mut last: Option<usize> = None;
    for i in 1..x.len() - 1 {
        if x[i] > threshold && x[i] >= x[i - 1] && x[i] >= x[i + 1] {
            if let Some(prev) = last {
                if i - prev < min_separation {
                    continue;
                }
            }
            spikes.push(i);
            last = Some(i);
        }
    }
    spikes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hjorth_of_sine_vs_noise() {
        let rate = 256.0;
        let sine: Vec<f32> = (0..1024)
            .map(|i| (2.0 * std::f64::consts::PI * 10.0 * i as f64 / rate).sin() as f32)
            .collect();
        // Deterministic pseudo-noise from a simple LCG keeps the test stable.
        let mut seed = 0x2545F491u64;
        let noise: Vec<f32> = (0..1024)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((seed >> 33) as f64 / (1u64 << 31) as f64 - 1.0) as f32
            })
            .collect();

        let (_, mob_sine, _) = hjorth(&sine);
        let (_, mob_noise, _) = hjorth(&noise);
        assert!(mob_noise > mob_sine);
    }

    #[test]
    fn line_length_grows_with_amplitude() {
        let small: Vec<f32> = (0..100).map(|i| ((i % 2) as f32) * 0.1).collect();
        let large: Vec<f32> = (0..100).map(|i| ((i % 2) as f32) * 1.0).collect();
        assert!(line_length(&large) > line_length(&small));
    }

    #[test]
    fn sample_entropy_orders_regular_vs_irregular() {
        let regular: Vec<f32> = (0..300)
            .map(|i| (2.0 * std::f64::consts::PI * 5.0 * i as f64 / 100.0).sin() as f32)
            .collect();
        let mut seed = 0xDEADBEEFu64;
        let irregular: Vec<f32> = (0..300)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((seed >> 33) as f64 / (1u64 << 31) as f64 - 1.0) as f32
            })
            .collect();

        let se_reg = sample_entropy(&regular, 2, 0.2);
        let se_irr = sample_entropy(&irregular, 2, 0.2);
        assert!(se_irr > se_reg, "regular {} irregular {}", se_reg, se_irr);
    }

    #[test]
    fn spike_detection_respects_separation() {
        let mut x = vec![0.0f32; 500];
        x[100] = 10.0;
        x[103] = 10.0; // Too close to the first spike.
        x[200] = 10.0;
        let spikes = detect_spikes(&x, 3.5, 6);
        assert_eq!(spikes, vec![100, 200]);
    }

    #[test]
    fn constant_signal_is_degenerate() {
        let x = vec![2.0f32; 128];
        assert_eq!(sample_entropy(&x, 2, 0.2), 0.0);
        let (activity, mobility, complexity) = hjorth(&x);
        assert_eq!(activity, 0.0);
        assert_eq!(mobility, 0.0);
        assert_eq!(complexity, 0.0);
    }
}
