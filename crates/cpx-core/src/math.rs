// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Small numeric helpers shared by the preprocessing, segmentation and sampling crates.

const LOG_2PI: f64 = 1.837_877_066_409_345_5;
const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFICIENTS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_7e-7,
];

/// Normal-consistency factor that turns a MAD into a standard-deviation estimate.
pub const MAD_NORMAL_CONSISTENCY: f64 = 1.4826;

/// Relative variance tolerance under which a signal is treated as constant.
pub const CONSTANT_SIGNAL_TOL: f64 = 1e-12;

/// Natural log of the gamma function via the Lanczos approximation (g = 7, 9 terms).
pub fn ln_gamma(z: f64) -> f64 {
    debug_assert!(
        z.is_finite() && z > 0.0,
        "ln_gamma requires z > 0 and finite"
    );

    if z < 1e-8 {
        return -z.ln();
    }

    if z < 0.5 {
        let sin_term = (std::f64::consts::PI * z).sin().abs();
        return std::f64::consts::PI.ln() - sin_term.ln() - ln_gamma(1.0 - z);
    }

    let shifted = z - 1.0;
    let mut x = LANCZOS_COEFFICIENTS[0];
    for (idx, coefficient) in LANCZOS_COEFFICIENTS.iter().copied().enumerate().skip(1) {
        x += coefficient / (shifted + idx as f64);
    }

    let t = shifted + LANCZOS_G + 0.5;
    0.5 * LOG_2PI + (shifted + 0.5) * t.ln() - t + x.ln()
}

/// Arithmetic mean; zero for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator); zero when fewer than two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mu = mean(values);
    let ss = values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>();
    (ss / (values.len() - 1) as f64).max(0.0).sqrt()
}

/// Population variance (n denominator); zero for an empty slice.
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mu = mean(values);
    values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / values.len() as f64
}

/// Linear-interpolated quantile of already sorted values, `q` in `[0, 1]`.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Median of an unsorted slice; zero for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile_sorted(&sorted, 0.5)
}

/// Robust estimate of the observation noise scale.
///
/// Uses the MAD of first differences divided by sqrt(2), which is insensitive
/// to level shifts. Falls back to the sample standard deviation when the MAD
/// collapses to zero.
pub fn robust_noise_scale(values: &[f64]) -> f64 {
    if values.len() < 3 {
        return sample_std(values);
    }
    let diffs: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let center = median(&diffs);
    let deviations: Vec<f64> = diffs.iter().map(|d| (d - center).abs()).collect();
    let mad = median(&deviations);
    let sigma = MAD_NORMAL_CONSISTENCY * mad / std::f64::consts::SQRT_2;
    if sigma > 0.0 && sigma.is_finite() {
        sigma
    } else {
        sample_std(values)
    }
}

/// True when the signal has (relatively) no variance to segment.
pub fn is_constant_signal(values: &[f64]) -> bool {
    if values.len() < 2 {
        return true;
    }
    let variance = population_variance(values);
    let scale = values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64;
    variance <= CONSTANT_SIGNAL_TOL * scale.max(1.0)
}

/// Prefix sums with a leading zero: `out[i] = sum(values[..i])`.
pub fn prefix_sums(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len() + 1);
    let mut acc = 0.0;
    out.push(acc);
    for v in values {
        acc += v;
        out.push(acc);
    }
    out
}

/// Prefix sums of squares with a leading zero.
pub fn prefix_sum_squares(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len() + 1);
    let mut acc = 0.0;
    out.push(acc);
    for v in values {
        acc += v * v;
        out.push(acc);
    }
    out
}
