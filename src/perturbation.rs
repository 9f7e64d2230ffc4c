//! Perturbation - cycle-to-cycle period (jitter) and amplitude (shimmer) variation.
//!
//! Documentation sources:
//! - Praat manual: PointProcess: Get jitter (local)... and siblings
//! - Praat manual: Voice 2. Jitter, Voice 3. Shimmer
//!
//! Periods are the intervals between consecutive pulses of a
//! [`PointProcess`]. A period survives when its duration lies in
//! `[period_floor, period_ceiling]` and it differs from the previous period
//! of its run by at most `max_period_factor`. Any failing period ends the
//! current run and is itself dropped. Neighbour-based measures only combine
//! periods of the same run, while the normalising mean covers every surviving
//! period.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PerturbationConfig;
use crate::error::{Error, Result};
use crate::point_process::PointProcess;
use crate::waveform::Waveform;

/// Supported shimmer window sizes.
pub const SHIMMER_WINDOWS: [usize; 3] = [3, 5, 11];

/// Jitter measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterKind {
    /// Mean absolute difference of consecutive periods ÷ mean period.
    Local,
    /// Mean absolute difference of consecutive periods, in seconds.
    LocalAbsolute,
    /// Relative average perturbation (3-period average).
    Rap,
    /// Five-point period perturbation quotient.
    Ppq5,
    /// Difference of differences of periods; 2 × rap.
    Ddp,
}

impl JitterKind {
    pub const ALL: [JitterKind; 5] = [
        JitterKind::Local,
        JitterKind::LocalAbsolute,
        JitterKind::Rap,
        JitterKind::Ppq5,
        JitterKind::Ddp,
    ];

    /// Name as accepted by [`FromStr`].
    pub fn name(&self) -> &'static str {
        match self {
            JitterKind::Local => "local",
            JitterKind::LocalAbsolute => "local, absolute",
            JitterKind::Rap => "rap",
            JitterKind::Ppq5 => "ppq5",
            JitterKind::Ddp => "ddp",
        }
    }

    /// Fewest surviving periods the measure needs.
    pub fn min_periods(&self) -> usize {
        match self {
            JitterKind::Local | JitterKind::LocalAbsolute => 2,
            JitterKind::Rap | JitterKind::Ddp => 3,
            JitterKind::Ppq5 => 5,
        }
    }
}

impl fmt::Display for JitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JitterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "local" => Ok(JitterKind::Local),
            "local, absolute" | "local_absolute" => Ok(JitterKind::LocalAbsolute),
            "rap" => Ok(JitterKind::Rap),
            "ppq5" => Ok(JitterKind::Ppq5),
            "ddp" => Ok(JitterKind::Ddp),
            other => Err(Error::InvalidParameter(format!(
                "unsupported jitter kind: {:?}",
                other
            ))),
        }
    }
}

/// One glottal period between two consecutive pulses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Period {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl Period {
    fn between(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            duration: end - start,
        }
    }
}

fn ratio(a: f64, b: f64) -> f64 {
    a.max(b) / a.min(b)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Runs of consecutive surviving periods inside the configured time span.
///
/// # Errors
///
/// `Error::InvalidParameter` if the configuration is out of range.
pub fn valid_period_runs(
    points: &PointProcess,
    config: &PerturbationConfig,
) -> Result<Vec<Vec<Period>>> {
    config.validate()?;
    let (from, to) = config.span();
    let times = points.times_in(from, to);

    let mut runs = Vec::new();
    let mut run: Vec<Period> = Vec::new();

    for pair in times.windows(2) {
        let period = Period::between(pair[0], pair[1]);
        let in_range =
            period.duration >= config.period_floor && period.duration <= config.period_ceiling;
        let jumps = run
            .last()
            .is_some_and(|prev| ratio(prev.duration, period.duration) > config.max_period_factor);

        if !in_range || jumps {
            if !run.is_empty() {
                runs.push(std::mem::take(&mut run));
            }
            continue;
        }
        run.push(period);
    }
    if !run.is_empty() {
        runs.push(run);
    }

    Ok(runs)
}

/// Mean absolute deviation of each value from the centred `2k + 1` average,
/// over positions with `k` neighbours on both sides within the same run.
fn centred_deviation(runs: &[Vec<f64>], k: usize) -> Option<f64> {
    let width = 2 * k + 1;
    mean(runs.iter().flat_map(|run| {
        run.windows(width).map(move |w| {
            let avg = w.iter().sum::<f64>() / width as f64;
            (w[k] - avg).abs()
        })
    }))
}

/// Mean absolute difference between consecutive values of the same run.
fn consecutive_difference(runs: &[Vec<f64>]) -> Option<f64> {
    mean(
        runs.iter()
            .flat_map(|run| run.windows(2).map(|w| (w[1] - w[0]).abs())),
    )
}

/// Jitter of the pulse train.
///
/// Returns `NaN` when fewer than [`JitterKind::min_periods`] periods survive
/// or no period has the neighbours the measure needs.
///
/// # Errors
///
/// `Error::InvalidParameter` if the configuration is out of range.
pub fn jitter(points: &PointProcess, kind: JitterKind, config: &PerturbationConfig) -> Result<f64> {
    let runs: Vec<Vec<f64>> = valid_period_runs(points, config)?
        .into_iter()
        .map(|run| run.into_iter().map(|p| p.duration).collect())
        .collect();

    let count: usize = runs.iter().map(Vec::len).sum();
    if count < kind.min_periods() {
        debug!(kind = %kind, periods = count, "too few periods for jitter");
        return Ok(f64::NAN);
    }
    let Some(mean_period) = mean(runs.iter().flatten().copied()) else {
        return Ok(f64::NAN);
    };

    let value = match kind {
        JitterKind::Local => consecutive_difference(&runs).map(|d| d / mean_period),
        JitterKind::LocalAbsolute => consecutive_difference(&runs),
        JitterKind::Rap => centred_deviation(&runs, 1).map(|d| d / mean_period),
        JitterKind::Ppq5 => centred_deviation(&runs, 2).map(|d| d / mean_period),
        JitterKind::Ddp => centred_deviation(&runs, 1).map(|d| 2.0 * d / mean_period),
    };

    Ok(value.unwrap_or(f64::NAN))
}

/// Vertex value of the parabola through three equally spaced samples.
fn parabolic_extremum(ym1: f64, y0: f64, yp1: f64) -> f64 {
    let denom = ym1 - 2.0 * y0 + yp1;
    if denom.abs() < 1e-30 {
        return y0;
    }
    y0 - (ym1 - yp1) * (ym1 - yp1) / (8.0 * denom)
}

/// Peak-to-peak amplitude of the samples between two pulses (both included).
fn peak_to_peak(samples: &[f64], period: &Period, sample_rate: f64) -> f64 {
    let last = samples.len().saturating_sub(1);
    let lo = ((period.start * sample_rate).round().max(0.0) as usize).min(last);
    let hi = ((period.end * sample_rate).round().max(0.0) as usize).min(last);
    if samples.is_empty() || hi <= lo {
        return 0.0;
    }

    let mut i_max = lo;
    let mut i_min = lo;
    for i in lo..=hi {
        if samples[i] > samples[i_max] {
            i_max = i;
        }
        if samples[i] < samples[i_min] {
            i_min = i;
        }
    }

    let refine = |i: usize, is_max: bool| {
        if i == 0 || i >= last {
            return samples[i];
        }
        let (ym1, y0, yp1) = (samples[i - 1], samples[i], samples[i + 1]);
        let extremum = if is_max {
            y0 >= ym1 && y0 >= yp1
        } else {
            y0 <= ym1 && y0 <= yp1
        };
        if extremum {
            parabolic_extremum(ym1, y0, yp1)
        } else {
            y0
        }
    };

    refine(i_max, true) - refine(i_min, false)
}

/// Amplitude of one surviving period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodAmplitude {
    pub period: Period,
    /// Peak-to-peak amplitude, at the waveform's normalised scale.
    pub amplitude: f64,
}

/// Per-period peak-to-peak amplitudes, grouped in runs.
///
/// Period runs are split further where an amplitude is zero (dropped) or
/// differs from the previous one by more than `max_amplitude_factor`
/// (dropped, and the next period starts a new run).
///
/// # Errors
///
/// - `Error::InvalidParameter` if the configuration is out of range
/// - `Error::NotMono` for multi-channel input
pub fn amplitude_runs(
    points: &PointProcess,
    waveform: &Waveform,
    config: &PerturbationConfig,
) -> Result<Vec<Vec<PeriodAmplitude>>> {
    waveform.validate()?;
    let samples = waveform.mono()?;
    let sample_rate = waveform.sample_rate();

    let mut runs = Vec::new();
    for period_run in valid_period_runs(points, config)? {
        let mut run: Vec<PeriodAmplitude> = Vec::new();
        for period in period_run {
            let amplitude = peak_to_peak(&samples, &period, sample_rate);
            let jumps = run.last().is_some_and(|prev| {
                ratio(prev.amplitude, amplitude) > config.max_amplitude_factor
            });
            if !amplitude.is_finite() || amplitude <= 0.0 || jumps {
                if !run.is_empty() {
                    runs.push(std::mem::take(&mut run));
                }
                continue;
            }
            run.push(PeriodAmplitude { period, amplitude });
        }
        if !run.is_empty() {
            runs.push(run);
        }
    }

    Ok(runs)
}

/// N-point amplitude perturbation quotient (shimmer apqN), `n` ∈ {3, 5, 11}.
///
/// Mean absolute deviation of each amplitude from the centred n-period
/// average, divided by the mean amplitude. `NaN` when fewer than `n`
/// amplitudes survive or no run is long enough.
///
/// # Errors
///
/// - `Error::InvalidParameter` for an unsupported `n` or bad configuration
/// - `Error::NotMono` for multi-channel input
pub fn shimmer_apq(
    points: &PointProcess,
    waveform: &Waveform,
    n: usize,
    config: &PerturbationConfig,
) -> Result<f64> {
    if !SHIMMER_WINDOWS.contains(&n) {
        return Err(Error::InvalidParameter(format!(
            "unsupported shimmer window apq{}, expected one of {:?}",
            n, SHIMMER_WINDOWS
        )));
    }

    let runs: Vec<Vec<f64>> = amplitude_runs(points, waveform, config)?
        .into_iter()
        .map(|run| run.into_iter().map(|p| p.amplitude).collect())
        .collect();
    let count: usize = runs.iter().map(Vec::len).sum();
    if count < n {
        debug!(n, amplitudes = count, "too few periods for shimmer");
        return Ok(f64::NAN);
    }
    let Some(mean_amplitude) = mean(runs.iter().flatten().copied()) else {
        return Ok(f64::NAN);
    };

    Ok(centred_deviation(&runs, n / 2)
        .map(|d| d / mean_amplitude)
        .unwrap_or(f64::NAN))
}
