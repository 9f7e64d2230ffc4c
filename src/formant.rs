//! Formant - LPC-based formant frequency tracks.
//!
//! Documentation sources:
//! - Praat manual: Sound: To Formant (burg)...
//! - Childers (1978): "Modern Spectrum Analysis", pp. 252-255 (Burg's algorithm)
//! - Aberth (1973), Ehrlich (1967): simultaneous polynomial root iteration
//! - Markel & Gray (1976): root-to-formant conversion
//!
//! Key documented facts:
//! - Window length parameter: "actual length is twice this value"
//! - Resample to 2 × max_formant_hz before analysis
//! - Pre-emphasis: x'[i] = x[i] - α × x[i-1], α = exp(-2π × F × Δt)
//! - LPC order: 2 × max_formants
//! - Formant filtering: remove < 50 Hz and > (max_formant - 50) Hz

use std::f64::consts::PI;

use ndarray::Array1;
use num_complex::Complex64;
use rubato::{FftFixedIn, Resampler};
use tracing::{debug, warn};

use crate::config::FormantConfig;
use crate::error::Result;
use crate::timegrid::{extract_frame, odd_window_samples, TimeGrid};
use crate::waveform::Waveform;
use crate::window;

/// Gaussian shape parameter of the formant window.
const WINDOW_ALPHA: f64 = 12.0;

/// Formants closer than this to 0 Hz or to the analysis ceiling are dropped.
const EDGE_MARGIN_HZ: f64 = 50.0;

const ABERTH_MAX_ITERATIONS: usize = 200;
const ABERTH_TOLERANCE: f64 = 1e-12;

const RESAMPLE_CHUNK: usize = 1024;

/// A single formant at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct FormantPoint {
    /// Frequency in Hz.
    pub frequency: f64,
    /// Bandwidth in Hz.
    pub bandwidth: f64,
}

impl FormantPoint {
    pub fn new(frequency: f64, bandwidth: f64) -> Self {
        Self {
            frequency,
            bandwidth,
        }
    }
}

/// Formant analysis results for a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FormantFrame {
    /// Time in seconds.
    pub time: f64,
    /// Formants in ascending frequency (F1, F2, ...).
    pub formants: Vec<FormantPoint>,
}

impl FormantFrame {
    pub fn new(time: f64, formants: Vec<FormantPoint>) -> Self {
        Self { time, formants }
    }

    #[inline]
    pub fn n_formants(&self) -> usize {
        self.formants.len()
    }

    /// Formant `n`, 1-based.
    pub fn formant(&self, n: usize) -> Option<&FormantPoint> {
        n.checked_sub(1).and_then(|i| self.formants.get(i))
    }
}

/// Formant tracks over time.
#[derive(Debug, Clone)]
pub struct FormantTrack {
    frames: Vec<FormantFrame>,
    grid: TimeGrid,
    max_formant_hz: f64,
    max_formants: usize,
}

impl FormantTrack {
    /// Build a track from frames spaced `time_step` apart.
    pub fn new(
        frames: Vec<FormantFrame>,
        time_step: f64,
        max_formant_hz: f64,
        max_formants: usize,
    ) -> Self {
        let t1 = frames.first().map_or(0.0, |f| f.time);
        let grid = TimeGrid::new(t1, time_step, frames.len());
        Self {
            frames,
            grid,
            max_formant_hz,
            max_formants,
        }
    }

    #[inline]
    pub fn frames(&self) -> &[FormantFrame] {
        &self.frames
    }

    #[inline]
    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    #[inline]
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn time_step(&self) -> f64 {
        self.grid.time_step()
    }

    #[inline]
    pub fn max_formant_hz(&self) -> f64 {
        self.max_formant_hz
    }

    #[inline]
    pub fn max_formants(&self) -> usize {
        self.max_formants
    }

    pub fn times(&self) -> Array1<f64> {
        Array1::from_iter(self.frames.iter().map(|f| f.time))
    }

    /// Frequencies of formant `n` per frame (NaN where absent).
    pub fn formant_values(&self, n: usize) -> Array1<f64> {
        Array1::from_iter(
            self.frames
                .iter()
                .map(|frame| frame.formant(n).map_or(f64::NAN, |fp| fp.frequency)),
        )
    }

    /// Bandwidths of formant `n` per frame (NaN where absent).
    pub fn bandwidth_values(&self, n: usize) -> Array1<f64> {
        Array1::from_iter(
            self.frames
                .iter()
                .map(|frame| frame.formant(n).map_or(f64::NAN, |fp| fp.bandwidth)),
        )
    }

    /// Frequency of formant `n` (1-based) at time `t`, linearly interpolated.
    ///
    /// `None` when `t` is out of range or either bracketing frame lacks the
    /// formant.
    pub fn value_at(&self, n: usize, t: f64) -> Option<f64> {
        self.interpolate(n, t, |fp| fp.frequency)
    }

    /// Bandwidth of formant `n` at time `t`, under the same rules as [`Self::value_at`].
    pub fn bandwidth_at(&self, n: usize, t: f64) -> Option<f64> {
        self.interpolate(n, t, |fp| fp.bandwidth)
    }

    fn interpolate(&self, n: usize, t: f64, field: impl Fn(&FormantPoint) -> f64) -> Option<f64> {
        let bracket = self.grid.bracket(t)?;
        let lo = field(self.frames[bracket.lo].formant(n)?);
        let hi = field(self.frames[bracket.hi].formant(n)?);
        let value = bracket.interpolate(lo, hi);
        value.is_finite().then_some(value)
    }
}

/// Compute LPC coefficients using Burg's algorithm.
///
/// Reference: Childers (1978), "Modern Spectrum Analysis", pp. 252-255
///
/// Returns a[0..=order] with a[0] = 1.0.
fn burg_lpc(samples: &[f64], order: usize) -> Vec<f64> {
    let n = samples.len();
    let mut a = vec![0.0; order + 1];
    a[0] = 1.0;
    if n <= order {
        return a;
    }

    // Forward and backward prediction errors
    let mut ef: Vec<f64> = samples.to_vec();
    let mut eb: Vec<f64> = samples.to_vec();

    for k in 1..=order {
        let mut num = 0.0;
        let mut den = 0.0;
        for i in k..n {
            num += ef[i] * eb[i - 1];
            den += ef[i] * ef[i] + eb[i - 1] * eb[i - 1];
        }

        if den < 1e-30 {
            break;
        }

        let reflection = -2.0 * num / den;

        let mut ef_new = vec![0.0; n];
        let mut eb_new = vec![0.0; n];
        for i in k..n {
            ef_new[i] = ef[i] + reflection * eb[i - 1];
            eb_new[i] = eb[i - 1] + reflection * ef[i];
        }
        ef = ef_new;
        eb = eb_new;

        // Levinson update
        let previous = a.clone();
        for i in 1..k {
            a[i] = previous[i] + reflection * previous[k - i];
        }
        a[k] = reflection;
    }

    a
}

/// Evaluate P(z) = z^p + a[1]·z^{p-1} + ... + a[p] and P'(z) by Horner's method.
fn eval_polynomial(a: &[f64], z: Complex64) -> (Complex64, Complex64) {
    let mut p_val = Complex64::new(1.0, 0.0);
    let mut dp_val = Complex64::new(0.0, 0.0);

    for &coeff in a.iter().skip(1) {
        dp_val = p_val + z * dp_val;
        p_val = p_val * z + coeff;
    }

    (p_val, dp_val)
}

/// All roots of the monic polynomial with coefficients `a` (a[0] = 1).
///
/// Aberth–Ehrlich iteration from points spread on a circle of radius 0.9,
/// updating each estimate in place. Stops once no estimate moves by more
/// than [`ABERTH_TOLERANCE`] or after [`ABERTH_MAX_ITERATIONS`] sweeps.
fn aberth_roots(a: &[f64]) -> Vec<Complex64> {
    let order = a.len().saturating_sub(1);
    if order == 0 {
        return Vec::new();
    }

    let mut roots: Vec<Complex64> = (0..order)
        .map(|k| Complex64::from_polar(0.9, 2.0 * PI * k as f64 / order as f64 + 0.25))
        .collect();

    for _ in 0..ABERTH_MAX_ITERATIONS {
        let mut max_step = 0.0f64;

        for k in 0..order {
            let z = roots[k];
            let (p_val, dp_val) = eval_polynomial(a, z);
            if p_val.norm() == 0.0 {
                continue;
            }

            let ratio = p_val / dp_val;
            let repulsion: Complex64 = roots
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != k)
                .map(|(_, &zj)| (z - zj).inv())
                .sum();
            let w = ratio / (1.0 - ratio * repulsion);
            if !w.is_finite() {
                continue;
            }

            roots[k] = z - w;
            max_step = max_step.max(w.norm());
        }

        if max_step < ABERTH_TOLERANCE {
            break;
        }
    }

    roots
}

/// Polish a root using Newton-Raphson iteration.
fn polish_root(a: &[f64], mut z: Complex64, max_iter: usize, tol: f64) -> Complex64 {
    for _ in 0..max_iter {
        let (p_val, dp_val) = eval_polynomial(a, z);

        if dp_val.norm() < 1e-30 {
            break;
        }

        let delta = p_val / dp_val;
        z -= delta;

        if delta.norm() < tol * z.norm() {
            break;
        }
    }

    z
}

/// Reflect unstable roots (|z| > 1) to 1/conj(z), inside the unit circle.
fn reflect_unstable_roots(roots: &mut [Complex64]) {
    for root in roots.iter_mut() {
        let r = root.norm();
        if r > 1.0 {
            *root = root.conj() / (r * r);
        }
    }
}

/// Stable, polished roots of the LPC polynomial.
fn lpc_roots(a: &[f64]) -> Vec<Complex64> {
    let mut roots = aberth_roots(a);
    reflect_unstable_roots(&mut roots);
    for root in roots.iter_mut() {
        *root = polish_root(a, *root, 10, 1e-10);
    }
    roots
}

/// Convert complex roots to formants in `[min_freq, max_freq]`, ascending.
///
/// For a root z = r·exp(iθ):
/// - Frequency = θ · sample_rate / 2π
/// - Bandwidth = -ln(r) · sample_rate / π
fn roots_to_formants(
    roots: &[Complex64],
    sample_rate: f64,
    min_freq: f64,
    max_freq: f64,
) -> Vec<FormantPoint> {
    let mut formants: Vec<FormantPoint> = roots
        .iter()
        .filter(|root| root.im > 0.0)
        .filter_map(|root| {
            let r = root.norm();
            let freq = root.arg() * sample_rate / (2.0 * PI);
            let bandwidth = -r.ln() * sample_rate / PI;
            (freq >= min_freq && freq <= max_freq && bandwidth.is_finite() && bandwidth > 0.0)
                .then(|| FormantPoint::new(freq, bandwidth))
        })
        .collect();

    formants.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));
    formants
}

/// Resample with rubato's FFT resampler, compensating its output delay.
///
/// Falls back to linear interpolation when the rates are not integral or the
/// resampler cannot be built.
pub(crate) fn resample(samples: &[f64], old_rate: f64, new_rate: f64) -> Vec<f64> {
    if (old_rate - new_rate).abs() < 1e-6 || samples.is_empty() {
        return samples.to_vec();
    }

    let new_length = (samples.len() as f64 * new_rate / old_rate).round() as usize;
    if new_length == 0 {
        return Vec::new();
    }

    if old_rate.fract() != 0.0 || new_rate.fract() != 0.0 {
        warn!(old_rate, new_rate, "non-integral sample rates, resampling linearly");
        return linear_resample(samples, new_length);
    }

    let mut resampler = match FftFixedIn::<f64>::new(
        old_rate as usize,
        new_rate as usize,
        RESAMPLE_CHUNK.min(samples.len()),
        2,
        1,
    ) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "resampler construction failed, resampling linearly");
            return linear_resample(samples, new_length);
        }
    };

    let chunk_size = resampler.input_frames_next();
    let delay = resampler.output_delay();
    let wanted = delay + new_length;
    let max_chunks = samples.len() / chunk_size + delay / chunk_size.max(1) + 4;
    let mut output = Vec::with_capacity(wanted + chunk_size);
    let mut pos = 0;

    for _ in 0..max_chunks {
        if output.len() >= wanted {
            break;
        }
        let mut chunk = vec![0.0; chunk_size];
        if pos < samples.len() {
            let end = (pos + chunk_size).min(samples.len());
            chunk[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos += chunk_size;

        match resampler.process(&[chunk], None) {
            Ok(result) => {
                if let Some(channel) = result.first() {
                    output.extend_from_slice(channel);
                }
            }
            Err(e) => {
                warn!(error = %e, "resampling failed, resampling linearly");
                return linear_resample(samples, new_length);
            }
        }
    }

    let mut output = output.split_off(delay.min(output.len()));
    output.resize(new_length, 0.0);
    output
}

/// Linear interpolation onto `new_length` evenly spaced points.
fn linear_resample(samples: &[f64], new_length: usize) -> Vec<f64> {
    if samples.is_empty() || new_length == 0 {
        return Vec::new();
    }

    let last = samples.len() - 1;
    let ratio = last as f64 / (new_length - 1).max(1) as f64;

    (0..new_length)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            if idx >= last {
                samples[last]
            } else {
                let frac = pos - idx as f64;
                samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
            }
        })
        .collect()
}

/// Track formants using Burg's LPC method.
///
/// Algorithm steps:
/// 1. Resample to 2 × max_formant_hz (only when that lowers the rate)
/// 2. Pre-emphasize
/// 3. For each frame:
///    a. Extract samples and apply a Gaussian window of twice `window_length`
///    b. Compute LPC coefficients using Burg's algorithm
///    c. Find the polynomial roots (Aberth–Ehrlich, then Newton polish)
///    d. Convert roots to frequencies and bandwidths
///    e. Keep at most `max_formants` in [50, max_formant_hz - 50] Hz
///
/// Frames with zero energy have no formants.
///
/// # Errors
///
/// - `Error::InvalidParameter` if the configuration is out of range
/// - `Error::NotMono` for multi-channel input
pub fn track_formants(waveform: &Waveform, config: &FormantConfig) -> Result<FormantTrack> {
    config.validate()?;
    waveform.validate()?;
    let original = waveform.mono()?;
    let original_rate = waveform.sample_rate();
    let duration = waveform.duration();

    let target_rate = 2.0 * config.max_formant_hz;
    let (samples, sample_rate) = if target_rate < original_rate {
        (resample(&original, original_rate, target_rate), target_rate)
    } else {
        (original, original_rate)
    };

    let alpha = (-2.0 * PI * config.pre_emphasis_from / sample_rate).exp();
    let mut pre_emphasized = samples.clone();
    for i in 1..samples.len() {
        pre_emphasized[i] = samples[i] - alpha * samples[i - 1];
    }

    let physical_window_duration = 2.0 * config.window_length;
    let window_samples = odd_window_samples(physical_window_duration, sample_rate);
    let window = window::gaussian(window_samples, WINDOW_ALPHA);

    let time_step = if config.time_step <= 0.0 {
        config.window_length / 4.0
    } else {
        config.time_step
    };
    let lpc_order = 2 * config.max_formants;
    let grid = TimeGrid::centered(duration, physical_window_duration, time_step);

    debug!(
        frames = grid.n_frames(),
        sample_rate, window_samples, lpc_order, "tracking formants"
    );

    let frames = (0..grid.n_frames())
        .map(|i| {
            let t = grid.time(i);
            let mut frame = extract_frame(&pre_emphasized, t, sample_rate, window_samples);
            for (s, &w) in frame.iter_mut().zip(window.iter()) {
                *s *= w;
            }

            if frame.iter().all(|&s| s == 0.0) {
                return FormantFrame::new(t, Vec::new());
            }

            let coefficients = burg_lpc(&frame, lpc_order);
            let roots = lpc_roots(&coefficients);
            let mut formants = roots_to_formants(
                &roots,
                sample_rate,
                EDGE_MARGIN_HZ,
                config.max_formant_hz - EDGE_MARGIN_HZ,
            );
            formants.truncate(config.max_formants);
            FormantFrame::new(t, formants)
        })
        .collect();

    Ok(FormantTrack {
        frames,
        grid,
        max_formant_hz: config.max_formant_hz,
        max_formants: config.max_formants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use approx::assert_relative_eq;

    /// Impulse train at `f0` through cascaded two-pole resonators.
    fn synthetic_vowel(f0: f64, resonances: &[(f64, f64)], duration: f64, sr: f64) -> Waveform {
        let n = (duration * sr).round() as usize;
        let period = (sr / f0).round() as usize;
        let mut signal: Vec<f64> = (0..n)
            .map(|i| if i % period == 0 { 1.0 } else { 0.0 })
            .collect();

        for &(freq, bw) in resonances {
            let r = (-PI * bw / sr).exp();
            let c1 = 2.0 * r * (2.0 * PI * freq / sr).cos();
            let c2 = -r * r;
            let mut y1 = 0.0;
            let mut y2 = 0.0;
            for s in signal.iter_mut() {
                let y = *s + c1 * y1 + c2 * y2;
                y2 = y1;
                y1 = y;
                *s = y;
            }
        }

        let peak = signal.iter().fold(0.0f64, |m, &s| m.max(s.abs()));
        let scaled: Vec<f64> = signal.iter().map(|&s| 0.5 * s / peak).collect();
        Waveform::from_slice(&scaled, sr)
    }

    fn median(mut values: Vec<f64>) -> f64 {
        values.retain(|v| v.is_finite());
        values.sort_by(|a, b| a.total_cmp(b));
        values[values.len() / 2]
    }

    #[test]
    fn test_aberth_roots_known_polynomial() {
        // (z - 0.5)(z² - 0.6z + 0.25): roots 0.5 and 0.3 ± 0.4i
        let a = [1.0, -1.1, 0.55, -0.125];
        let mut roots = aberth_roots(&a);
        roots.sort_by(|x, y| x.im.total_cmp(&y.im));

        assert_relative_eq!(roots[0].re, 0.3, epsilon = 1e-9);
        assert_relative_eq!(roots[0].im, -0.4, epsilon = 1e-9);
        assert_relative_eq!(roots[1].re, 0.5, epsilon = 1e-9);
        assert_relative_eq!(roots[1].im, 0.0, epsilon = 1e-9);
        assert_relative_eq!(roots[2].re, 0.3, epsilon = 1e-9);
        assert_relative_eq!(roots[2].im, 0.4, epsilon = 1e-9);
    }

    #[test]
    fn test_reflect_unstable_roots() {
        let mut roots = vec![Complex64::new(2.0, 0.0), Complex64::new(0.0, 0.5)];
        reflect_unstable_roots(&mut roots);
        assert_relative_eq!(roots[0].re, 0.5);
        assert_relative_eq!(roots[1].im, 0.5);
    }

    #[test]
    fn test_roots_to_formants() {
        let sr = 10000.0;
        let r = (-PI * 100.0 / sr).exp();
        let theta = 2.0 * PI * 1000.0 / sr;
        let roots = vec![
            Complex64::from_polar(r, theta),
            Complex64::from_polar(r, -theta),
            Complex64::from_polar(r, 2.0 * PI * 20.0 / sr),
        ];
        let formants = roots_to_formants(&roots, sr, 50.0, 4950.0);
        assert_eq!(formants.len(), 1);
        assert_relative_eq!(formants[0].frequency, 1000.0, epsilon = 1e-9);
        assert_relative_eq!(formants[0].bandwidth, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_synthetic_vowel_formants() {
        let waveform = synthetic_vowel(
            100.0,
            &[(500.0, 80.0), (1500.0, 100.0), (2500.0, 120.0)],
            0.5,
            11000.0,
        );
        let track = track_formants(&waveform, &FormantConfig::default()).unwrap();

        assert!(track.n_frames() > 30);
        assert_relative_eq!(median(track.formant_values(1).to_vec()), 500.0, epsilon = 60.0);
        assert_relative_eq!(median(track.formant_values(2).to_vec()), 1500.0, epsilon = 100.0);
        for frame in track.frames() {
            assert!(frame.n_formants() <= 5);
            for pair in frame.formants.windows(2) {
                assert!(pair[0].frequency <= pair[1].frequency);
            }
        }
    }

    #[test]
    fn test_silence_has_no_formants() {
        let waveform = Waveform::silence(0.3, 11000.0);
        let track = track_formants(&waveform, &FormantConfig::default()).unwrap();
        assert!(track.n_frames() > 0);
        assert!(track.frames().iter().all(|f| f.formants.is_empty()));
        assert_eq!(track.value_at(1, 0.15), None);
    }

    #[test]
    fn test_value_at_requires_both_frames() {
        let frames = vec![
            FormantFrame::new(0.1, vec![FormantPoint::new(500.0, 80.0)]),
            FormantFrame::new(
                0.11,
                vec![FormantPoint::new(600.0, 90.0), FormantPoint::new(1500.0, 100.0)],
            ),
            FormantFrame::new(0.12, vec![]),
        ];
        let track = FormantTrack::new(frames, 0.01, 5500.0, 5);

        assert_relative_eq!(track.value_at(1, 0.105).unwrap(), 550.0, epsilon = 1e-9);
        assert_relative_eq!(track.bandwidth_at(1, 0.105).unwrap(), 85.0, epsilon = 1e-9);
        assert_eq!(track.value_at(2, 0.105), None);
        assert_eq!(track.value_at(1, 0.115), None);
        assert_eq!(track.value_at(1, 0.2), None);
        assert_eq!(track.value_at(0, 0.1), None);
        assert!(track.formant_values(2)[0].is_nan());
    }

    #[test]
    fn test_resample_preserves_tone() {
        let sr = 16000.0;
        let target = 11000.0;
        let samples: Vec<f64> = (0..8000)
            .map(|i| (2.0 * PI * 440.0 * i as f64 / sr).sin())
            .collect();
        let resampled = resample(&samples, sr, target);

        assert_eq!(resampled.len(), 5500);
        for i in 1000..4500 {
            let expected = (2.0 * PI * 440.0 * i as f64 / target).sin();
            assert_relative_eq!(resampled[i], expected, epsilon = 0.02);
        }
    }

    #[test]
    fn test_linear_resample_endpoints() {
        let out = linear_resample(&[0.0, 1.0, 2.0], 5);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_invalid_config() {
        let waveform = Waveform::tone(200.0, 0.3, 11000.0, 0.5);
        let config = FormantConfig {
            max_formants: 0,
            ..FormantConfig::default()
        };
        assert!(matches!(
            track_formants(&waveform, &config),
            Err(Error::InvalidParameter(_))
        ));
    }
}
