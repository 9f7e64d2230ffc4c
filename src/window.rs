//! Analysis windows shared by the frame-based analyses.
//!
//! Symmetric windows are sampled over an odd number of points so that the
//! centre sample sits exactly on the frame time.

use std::f64::consts::PI;

/// Symmetric Hanning window (pitch autocorrelation, Hanning spectrograms).
pub(crate) fn hanning(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0];
    }

    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// Periodic Hann window: sums to exactly 1 at 50 % overlap-add.
pub(crate) fn hann_periodic(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0];
    }

    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}

/// Gaussian window `exp(-α·x²)` with x running from -1 to 1.
pub(crate) fn gaussian(n: usize, alpha: f64) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0];
    }

    let mid = (n - 1) as f64 / 2.0;
    (0..n)
        .map(|i| {
            let x = (i as f64 - mid) / mid;
            (-alpha * x * x).exp()
        })
        .collect()
}

/// Gaussian window scaled to unit energy (sum of squares = 1).
pub(crate) fn gaussian_unit_energy(n: usize, alpha: f64) -> Vec<f64> {
    let window = gaussian(n, alpha);
    let norm = window.iter().map(|&w| w * w).sum::<f64>().sqrt();
    window.iter().map(|&w| w / norm).collect()
}

/// Gaussian window shifted and rescaled so that it reaches zero at both edges.
///
/// Used by the intensity contour.
pub(crate) fn gaussian_edge_zero(n: usize, alpha: f64) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0];
    }

    let exp_edge = (-alpha).exp();
    let norm = 1.0 - exp_edge;
    gaussian(n, alpha)
        .into_iter()
        .map(|w| (w - exp_edge) / norm)
        .collect()
}
