//! PointProcess - glottal pulse times derived from a pitch contour.
//!
//! Documentation sources:
//! - Praat manual: Sound & Pitch: To PointProcess (cc)
//!
//! Within each voiced interval one pulse is anchored at the strongest sample
//! near the middle of the interval. From there the search walks forward and
//! backward, one period at a time: the next pulse is the lag (between 0.75
//! and 1.25 local periods) whose window best cross-correlates with the
//! window around the current pulse. The walk stops at the interval edge or
//! when the best normalised correlation drops below [`MIN_CORRELATION`].

use ndarray::Array1;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pitch::PitchContour;
use crate::waveform::Waveform;

/// Lowest normalised cross-correlation accepted for the next pulse.
pub const MIN_CORRELATION: f64 = 0.3;

/// Lag search range, in local periods.
const MIN_LAG_FACTOR: f64 = 0.75;
const MAX_LAG_FACTOR: f64 = 1.25;

/// Strictly increasing sequence of pulse times in seconds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointProcess {
    times: Vec<f64>,
}

impl PointProcess {
    /// Build from arbitrary times: non-finite values and duplicates are
    /// dropped and the rest sorted.
    pub fn from_times(mut times: Vec<f64>) -> Self {
        times.retain(|t| t.is_finite());
        times.sort_by(|a, b| a.total_cmp(b));
        times.dedup();
        Self { times }
    }

    #[inline]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn to_array(&self) -> Array1<f64> {
        Array1::from_vec(self.times.clone())
    }

    /// Pulses with `from <= t < to`.
    pub fn times_in(&self, from: f64, to: f64) -> &[f64] {
        let start = self.times.partition_point(|&t| t < from);
        let end = self.times.partition_point(|&t| t < to);
        &self.times[start..end.max(start)]
    }
}

/// Parabolic vertex offset through three equally spaced values.
fn parabolic_offset(ym1: f64, y0: f64, yp1: f64) -> f64 {
    let denom = ym1 - 2.0 * y0 + yp1;
    if denom.abs() < 1e-30 {
        return 0.0;
    }
    let delta = 0.5 * (ym1 - yp1) / denom;
    if delta.abs() <= 1.0 {
        delta
    } else {
        0.0
    }
}

/// Normalised cross-correlation of two equal-length windows (0 if either is silent).
fn normalized_correlation(a: &[f64], b: &[f64]) -> f64 {
    let (mut ab, mut aa, mut bb) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        ab += x * y;
        aa += x * x;
        bb += y * y;
    }
    let energy = (aa * bb).sqrt();
    if energy > 0.0 {
        ab / energy
    } else {
        0.0
    }
}

/// Slice of `2·half + 1` samples centred on `centre`, if fully inside the signal.
fn window_at(samples: &[f64], centre: isize, half: isize) -> Option<&[f64]> {
    let start = centre - half;
    let end = centre + half + 1;
    if start < 0 || end > samples.len() as isize {
        return None;
    }
    Some(&samples[start as usize..end as usize])
}

struct PulseSearch<'a> {
    samples: &'a [f64],
    sample_rate: f64,
    contour: &'a PitchContour,
}

impl PulseSearch<'_> {
    /// Strongest sample within half a period of the interval middle, and the
    /// F0 used to find it.
    fn anchor(&self, from: f64, to: f64) -> Option<(f64, f64)> {
        let middle = 0.5 * (from + to);
        let f0 = self
            .contour
            .value_at(middle)
            .or_else(|| self.contour.nearest_value(middle))?;
        let half_period = 0.5 / f0;

        let lo = (((middle - half_period).max(from)) * self.sample_rate).ceil() as isize;
        let hi = (((middle + half_period).min(to)) * self.sample_rate).floor() as isize;
        let lo = lo.max(0);
        let hi = hi.min(self.samples.len() as isize - 1);
        if hi < lo {
            return None;
        }

        let mut best = lo as usize;
        for i in lo as usize..=hi as usize {
            if self.samples[i].abs() > self.samples[best].abs() {
                best = i;
            }
        }

        let delta = if best > 0 && best + 1 < self.samples.len() {
            let sign = self.samples[best].signum();
            parabolic_offset(
                sign * self.samples[best - 1],
                sign * self.samples[best],
                sign * self.samples[best + 1],
            )
        } else {
            0.0
        };
        Some(((best as f64 + delta) / self.sample_rate, f0))
    }

    /// Next pulse one period away from `t` in `direction` (+1 or -1).
    fn step(&self, t: f64, period: f64, direction: f64) -> Option<f64> {
        let centre = (t * self.sample_rate).round() as isize;
        let half = (0.5 * period * self.sample_rate).round().max(1.0) as isize;
        let reference = window_at(self.samples, centre, half)?;

        let min_lag = (MIN_LAG_FACTOR * period * self.sample_rate).floor().max(1.0) as isize;
        let max_lag = (MAX_LAG_FACTOR * period * self.sample_rate).ceil() as isize;

        let correlations: Vec<(isize, f64)> = (min_lag..=max_lag)
            .filter_map(|lag| {
                let candidate = window_at(self.samples, centre + direction as isize * lag, half)?;
                Some((lag, normalized_correlation(reference, candidate)))
            })
            .collect();

        let best = correlations
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)?;
        let (lag, corr) = correlations[best];
        if corr < MIN_CORRELATION {
            return None;
        }

        let delta = if best > 0 && best + 1 < correlations.len() {
            parabolic_offset(
                correlations[best - 1].1,
                corr,
                correlations[best + 1].1,
            )
        } else {
            0.0
        };

        Some(t + direction * (lag as f64 + delta) / self.sample_rate)
    }

    /// Walk from `anchor` towards `limit`, collecting pulses strictly inside.
    fn walk(&self, anchor: f64, f0: f64, limit: f64, direction: f64, pulses: &mut Vec<f64>) {
        let mut t = anchor;
        let mut period = 1.0 / f0;
        loop {
            if let Some(f) = self.contour.value_at(t) {
                period = 1.0 / f;
            }
            let Some(next) = self.step(t, period, direction) else {
                break;
            };
            if (direction > 0.0 && next >= limit) || (direction < 0.0 && next <= limit) {
                break;
            }
            if (next - t) * direction <= 0.0 {
                break;
            }
            pulses.push(next);
            t = next;
        }
    }
}

/// Derive glottal pulses from a mono waveform and its pitch contour.
///
/// Unvoiced stretches produce no pulses. The contour must come from a
/// signal with the same sample rate and duration as `waveform`.
///
/// # Errors
///
/// - `Error::NotMono` for multi-channel input
/// - `Error::InvalidParameter` if the contour has a non-positive time step
pub fn derive_points(waveform: &Waveform, contour: &PitchContour) -> Result<PointProcess> {
    waveform.validate()?;
    let samples = waveform.mono()?;
    if contour.time_step().is_nan() || contour.time_step() <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "pitch contour time step must be positive, got {}",
            contour.time_step()
        )));
    }

    let search = PulseSearch {
        samples: &samples,
        sample_rate: waveform.sample_rate(),
        contour,
    };
    let duration = waveform.duration();

    let mut pulses = Vec::new();
    for (from, to) in contour.voiced_intervals() {
        let from = from.max(0.0);
        let to = to.min(duration);
        if to <= from {
            continue;
        }
        let Some((anchor, f0)) = search.anchor(from, to) else {
            continue;
        };

        pulses.push(anchor);
        search.walk(anchor, f0, to, 1.0, &mut pulses);
        search.walk(anchor, f0, from, -1.0, &mut pulses);
    }

    debug!(pulses = pulses.len(), "derived point process");
    Ok(PointProcess::from_times(pulses))
}
