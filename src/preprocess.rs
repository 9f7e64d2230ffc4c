//! Signal preprocessing: DC removal and zero-phase high-pass filtering.
//!
//! Applied before feature extraction:
//!
//! 1. **Demean** - Removes each channel's DC offset
//! 2. **High-pass** - Butterworth filter run forwards and backwards, which
//!    removes rumble and hum without shifting any frequency in time
//!
//! # Filter Design
//!
//! The Butterworth filter is designed the standard way: analog prototype
//! poles on the unit circle, low-pass to high-pass transform, bilinear
//! transform with the cutoff pre-warped, then grouped into second-order
//! sections. Each section is scaled to unit gain at Nyquist, which makes the
//! cascade's passband gain exactly 1. Sections run as `biquad`
//! transposed direct form II filters.
//!
//! Forward-backward filtering pads both ends with an odd reflection of the
//! signal and starts every section in its steady state, so a constant input
//! produces no start-up transient.

use std::f64::consts::PI;

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use ndarray::{Array2, Axis};
use num_complex::Complex64;
use tracing::debug;

use crate::config::PreprocessConfig;
use crate::error::{Error, Result};
use crate::waveform::Waveform;

/// Gain at DC, H(1).
fn dc_gain(c: &Coefficients<f64>) -> f64 {
    (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2)
}

/// Delay-line state `[s1, s2]` after a long run of unit input.
fn step_state(c: &Coefficients<f64>) -> [f64; 2] {
    let g = dc_gain(c);
    let s2 = c.b2 - c.a2 * g;
    let s1 = c.b1 - c.a1 * g + s2;
    [s1, s2]
}

fn is_first_order(c: &Coefficients<f64>) -> bool {
    c.b2 == 0.0 && c.a2 == 0.0
}

/// Q of the k-th conjugate pole pair of an order-`order` Butterworth prototype.
fn section_q(k: usize, order: usize) -> f64 {
    let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
    -1.0 / (2.0 * theta.cos())
}

/// Cascade of biquad sections implementing a Butterworth filter.
#[derive(Debug, Clone)]
pub struct Butterworth {
    sections: Vec<Coefficients<f64>>,
}

impl Butterworth {
    /// Design a high-pass Butterworth filter.
    ///
    /// Each conjugate pole pair becomes a biquad high-pass at the cutoff
    /// with that pair's Q; an odd order adds one first-order section.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidParameter` if `order` is 0, or `cutoff_hz` is not in
    ///   (0, sample_rate / 2)
    pub fn highpass(order: usize, cutoff_hz: f64, sample_rate: f64) -> Result<Self> {
        if order == 0 {
            return Err(Error::InvalidParameter(
                "filter order must be at least 1".to_string(),
            ));
        }
        let nyquist = 0.5 * sample_rate;
        if !(cutoff_hz.is_finite() && cutoff_hz > 0.0 && cutoff_hz < nyquist) {
            return Err(Error::InvalidParameter(format!(
                "high-pass cutoff must lie in (0, {}) Hz, got {}",
                nyquist, cutoff_hz
            )));
        }

        let mut sections = Vec::with_capacity(order.div_ceil(2));
        for k in 0..order / 2 {
            let coefficients = Coefficients::<f64>::from_params(
                Type::HighPass,
                sample_rate.hz(),
                cutoff_hz.hz(),
                section_q(k, order),
            )
            .map_err(|e| {
                Error::InvalidParameter(format!("high-pass section design failed: {:?}", e))
            })?;
            sections.push(coefficients);
        }

        if order % 2 == 1 {
            // Real prototype pole through the pre-warped bilinear transform
            let warped = (PI * cutoff_hz / sample_rate).tan();
            let pole = (1.0 - warped) / (1.0 + warped);
            let gain = (1.0 + pole) / 2.0;
            sections.push(Coefficients {
                a1: -pole,
                a2: 0.0,
                b0: gain,
                b1: -gain,
                b2: 0.0,
            });
        }

        Ok(Self { sections })
    }

    #[inline]
    pub fn sections(&self) -> &[Coefficients<f64>] {
        &self.sections
    }

    /// Magnitude response at `frequency_hz`.
    pub fn gain_at(&self, frequency_hz: f64, sample_rate: f64) -> f64 {
        let z_inv = Complex64::from_polar(1.0, -2.0 * PI * frequency_hz / sample_rate);
        let z_inv2 = z_inv * z_inv;
        self.sections
            .iter()
            .map(|c| {
                let num = c.b0 + c.b1 * z_inv + c.b2 * z_inv2;
                let den = 1.0 + c.a1 * z_inv + c.a2 * z_inv2;
                (num / den).norm()
            })
            .product()
    }

    /// Causal filtering with each section starting in the steady state of
    /// a constant input equal to `samples[0]`.
    pub fn filter(&self, samples: &[f64]) -> Vec<f64> {
        let mut output = samples.to_vec();
        let Some(&first) = samples.first() else {
            return output;
        };
        let mut scale = first;
        for coefficients in &self.sections {
            let [s1, s2] = step_state(coefficients);
            let mut section = DirectForm2Transposed::<f64>::new(*coefficients);
            section.s1 = s1 * scale;
            section.s2 = s2 * scale;
            for x in output.iter_mut() {
                *x = section.run(*x);
            }
            scale *= dc_gain(coefficients);
        }
        output
    }

    /// Zero-phase filtering: forwards, then backwards over the reversed output.
    pub fn filtfilt(&self, samples: &[f64]) -> Vec<f64> {
        let n = samples.len();
        if n < 2 {
            return samples.to_vec();
        }

        let first_order = self.sections.iter().filter(|c| is_first_order(c)).count();
        let taps = 2 * self.sections.len() + 1 - first_order;
        let pad = (3 * taps).min(n - 1);

        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * samples[0] - samples[i]));
        extended.extend_from_slice(samples);
        extended.extend((1..=pad).map(|i| 2.0 * samples[n - 1] - samples[n - 1 - i]));

        let mut forward = self.filter(&extended);
        forward.reverse();
        let mut backward = self.filter(&forward);
        backward.reverse();

        backward[pad..pad + n].to_vec()
    }
}

/// Subtract each channel's mean.
///
/// Integer-format waveforms are clipped to the format's range afterwards.
/// When subtracting the plain mean would clip, the offset is instead the one
/// whose clipped result has zero mean, so a second pass leaves the signal
/// unchanged.
pub fn demean(waveform: &Waveform) -> Waveform {
    let range = waveform.format().integer_range();
    let mut samples = waveform.samples().to_owned();
    for mut channel in samples.axis_iter_mut(Axis(0)) {
        let mean = channel.mean().unwrap_or(0.0);
        match range {
            Some((lo, hi)) => {
                let values = channel.to_vec();
                let offset = if values.iter().all(|&s| (lo..=hi).contains(&(s - mean))) {
                    mean
                } else {
                    clipped_zero_mean_offset(&values, lo, hi)
                };
                channel.mapv_inplace(|s| (s - offset).clamp(lo, hi));
            }
            None => channel.mapv_inplace(|s| s - mean),
        }
    }
    waveform.with_samples(samples)
}

/// Offset `c` with `mean(clamp(s - c, lo, hi)) == 0`.
///
/// The clipped mean falls monotonically in `c`; bisection fixes which samples
/// clip, then the offset is solved exactly over the unclipped ones.
fn clipped_zero_mean_offset(values: &[f64], lo: f64, hi: f64) -> f64 {
    let clipped_mean = |c: f64| {
        values.iter().map(|&s| (s - c).clamp(lo, hi)).sum::<f64>() / values.len() as f64
    };

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (mut below, mut above) = (min - hi, max - lo);
    for _ in 0..200 {
        let mid = 0.5 * (below + above);
        if mid <= below || mid >= above {
            break;
        }
        if clipped_mean(mid) > 0.0 {
            below = mid;
        } else {
            above = mid;
        }
    }
    let c = 0.5 * (below + above);

    let mut free_sum = 0.0;
    let mut free_count = 0usize;
    let mut clipped_sum = 0.0;
    for &s in values {
        let v = s - c;
        if v >= hi {
            clipped_sum += hi;
        } else if v <= lo {
            clipped_sum += lo;
        } else {
            free_sum += s;
            free_count += 1;
        }
    }
    if free_count == 0 {
        c
    } else {
        (free_sum + clipped_sum) / free_count as f64
    }
}

/// Zero-phase Butterworth high-pass of every channel.
///
/// Integer input is normalised to [-1, 1] before filtering, clipped to
/// [-1, 1] afterwards, and rescaled into the format's range.
///
/// # Errors
///
/// - `Error::InvalidParameter` if `order` is 0 or `cutoff_hz` is not in
///   (0, Nyquist)
pub fn highpass(waveform: &Waveform, cutoff_hz: f64, order: usize) -> Result<Waveform> {
    waveform.validate()?;
    let filter = Butterworth::highpass(order, cutoff_hz, waveform.sample_rate())?;
    debug!(
        cutoff_hz,
        order,
        channels = waveform.n_channels(),
        "applying zero-phase high-pass"
    );

    let format = waveform.format();
    let scale = format.full_scale();
    let range = format.integer_range();

    let mut samples = Array2::<f64>::zeros(waveform.samples().raw_dim());
    for (src, mut dst) in waveform
        .samples()
        .axis_iter(Axis(0))
        .zip(samples.axis_iter_mut(Axis(0)))
    {
        let normalised: Vec<f64> = src.iter().map(|&s| s / scale).collect();
        let filtered = filter.filtfilt(&normalised);
        for (d, f) in dst.iter_mut().zip(filtered) {
            *d = match range {
                Some((lo, hi)) => (f.clamp(-1.0, 1.0) * scale).clamp(lo, hi),
                None => f,
            };
        }
    }
    Ok(waveform.with_samples(samples))
}

/// Demean and high-pass as configured.
pub fn preprocess(waveform: &Waveform, config: &PreprocessConfig) -> Result<Waveform> {
    config.validate()?;
    waveform.validate()?;
    let demeaned = if config.demean {
        demean(waveform)
    } else {
        waveform.clone()
    };
    match config.highpass_cutoff_hz {
        Some(cutoff) => highpass(&demeaned, cutoff, config.highpass_order),
        None => Ok(demeaned),
    }
}
