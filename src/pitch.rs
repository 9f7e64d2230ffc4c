//! Pitch - Fundamental frequency (F0) contour.
//!
//! Documentation sources:
//! - Boersma (1993): "Accurate short-term analysis of the fundamental frequency
//!   and the harmonics-to-noise ratio of a sampled sound"
//! - Praat manual: Sound: To Pitch (ac)...
//!
//! Key documented facts (from Boersma 1993):
//! - Autocorrelation normalization: r_x(τ) ≈ r_a(τ) / r_w(τ) (Eq. 9)
//! - Candidate strength formulas (Eq. 23, 24)
//! - Viterbi transition costs (Eq. 27)
//!
//! A frame is voiced when its best path candidate is a periodicity peak
//! rather than the unvoiced candidate. The unvoiced candidate's strength is
//! the voicing threshold, raised further for quiet frames, so a frame can only
//! be voiced when its normalised autocorrelation peak clears the threshold.

use ndarray::Array1;
use tracing::debug;

use crate::config::PitchConfig;
use crate::error::Result;
use crate::timegrid::{extract_frame, odd_window_samples, Interpolation, TimeGrid};
use crate::waveform::Waveform;
use crate::window;

/// Most periodicity candidates kept per frame.
const MAX_CANDIDATES: usize = 15;

/// A pitch candidate for a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchCandidate {
    /// Frequency in Hz (0 = unvoiced).
    pub frequency: f64,
    /// Correlation strength, after octave cost.
    pub strength: f64,
}

impl PitchCandidate {
    pub fn new(frequency: f64, strength: f64) -> Self {
        Self {
            frequency,
            strength,
        }
    }
}

/// Pitch analysis results for a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchFrame {
    /// Time in seconds.
    pub time: f64,
    /// Candidates (first is selected).
    pub candidates: Vec<PitchCandidate>,
    /// Local peak relative to the global peak (0-1).
    pub intensity: f64,
}

impl PitchFrame {
    pub fn new(time: f64, candidates: Vec<PitchCandidate>, intensity: f64) -> Self {
        Self {
            time,
            candidates,
            intensity,
        }
    }

    /// A frame holding a single selected frequency (0 for unvoiced).
    pub fn with_frequency(time: f64, frequency: f64) -> Self {
        let strength = if frequency > 0.0 { 1.0 } else { 0.0 };
        Self::new(time, vec![PitchCandidate::new(frequency, strength)], 1.0)
    }

    /// Selected pitch frequency (0 if unvoiced).
    #[inline]
    pub fn frequency(&self) -> f64 {
        self.candidates.first().map_or(0.0, |c| c.frequency)
    }

    /// Selected pitch strength.
    #[inline]
    pub fn strength(&self) -> f64 {
        self.candidates.first().map_or(0.0, |c| c.strength)
    }

    #[inline]
    pub fn voiced(&self) -> bool {
        self.frequency() > 0.0
    }
}

/// Pitch (F0) contour on a regular frame grid.
#[derive(Debug, Clone)]
pub struct PitchContour {
    frames: Vec<PitchFrame>,
    grid: TimeGrid,
    pitch_floor: f64,
    pitch_ceiling: f64,
    /// Rate of the analysed waveform; 0 when unknown.
    sample_rate: f64,
}

impl PitchContour {
    /// Build a contour from frames spaced `time_step` apart.
    ///
    /// The first frame's time anchors the grid.
    pub fn new(
        frames: Vec<PitchFrame>,
        time_step: f64,
        pitch_floor: f64,
        pitch_ceiling: f64,
    ) -> Self {
        let t1 = frames.first().map_or(0.0, |f| f.time);
        let grid = TimeGrid::new(t1, time_step, frames.len());
        Self {
            frames,
            grid,
            pitch_floor,
            pitch_ceiling,
            sample_rate: 0.0,
        }
    }

    /// Record the sample rate of the waveform the contour describes.
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Build a contour from selected frequencies (0 = unvoiced).
    pub fn from_values(t1: f64, time_step: f64, values: &[f64], floor: f64, ceiling: f64) -> Self {
        let frames = values
            .iter()
            .enumerate()
            .map(|(i, &f)| PitchFrame::with_frequency(t1 + i as f64 * time_step, f))
            .collect();
        Self::new(frames, time_step, floor, ceiling)
    }

    #[inline]
    pub fn frames(&self) -> &[PitchFrame] {
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
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn pitch_floor(&self) -> f64 {
        self.pitch_floor
    }

    #[inline]
    pub fn pitch_ceiling(&self) -> f64 {
        self.pitch_ceiling
    }

    /// Frame times.
    pub fn times(&self) -> Array1<f64> {
        Array1::from_iter(self.frames.iter().map(|f| f.time))
    }

    /// Selected frequencies (0 for unvoiced).
    pub fn values(&self) -> Array1<f64> {
        Array1::from_iter(self.frames.iter().map(|f| f.frequency()))
    }

    pub fn strengths(&self) -> Array1<f64> {
        Array1::from_iter(self.frames.iter().map(|f| f.strength()))
    }

    /// (time, f0) of voiced frames only.
    pub fn voiced_points(&self) -> Vec<(f64, f64)> {
        self.frames
            .iter()
            .filter(|f| f.voiced())
            .map(|f| (f.time, f.frequency()))
            .collect()
    }

    /// F0 at time `t`, linearly interpolated.
    ///
    /// `None` when `t` is out of range or either bracketing frame is unvoiced.
    pub fn value_at(&self, t: f64) -> Option<f64> {
        self.value_at_with(t, Interpolation::Linear)
    }

    /// F0 of the frame nearest to `t`; `None` when that frame is unvoiced.
    pub fn nearest_value(&self, t: f64) -> Option<f64> {
        self.value_at_with(t, Interpolation::Nearest)
    }

    pub fn value_at_with(&self, t: f64, interpolation: Interpolation) -> Option<f64> {
        match interpolation {
            Interpolation::Nearest => {
                let frame = &self.frames[self.grid.nearest(t)?];
                frame.voiced().then(|| frame.frequency())
            }
            Interpolation::Linear => {
                let bracket = self.grid.bracket(t)?;
                let lo = &self.frames[bracket.lo];
                let hi = &self.frames[bracket.hi];
                if !lo.voiced() || !hi.voiced() {
                    return None;
                }
                Some(bracket.interpolate(lo.frequency(), hi.frequency()))
            }
        }
    }

    /// Time spans covered by runs of consecutive voiced frames.
    ///
    /// Each span reaches half a time step beyond its outer frame centres.
    pub fn voiced_intervals(&self) -> Vec<(f64, f64)> {
        let half_step = 0.5 * self.time_step();
        let mut intervals = Vec::new();
        let mut start: Option<f64> = None;
        let mut last = 0.0;
        for frame in &self.frames {
            if frame.voiced() {
                start.get_or_insert(frame.time - half_step);
                last = frame.time;
            } else if let Some(s) = start.take() {
                intervals.push((s, last + half_step));
            }
        }
        if let Some(s) = start {
            intervals.push((s, last + half_step));
        }
        intervals
    }
}

/// Autocorrelation for lags 0 to max_lag (numerically, also used for the window).
fn compute_autocorrelation(samples: &[f64], max_lag: usize) -> Vec<f64> {
    let n = samples.len();
    let mut r = vec![0.0; max_lag + 1];

    for (lag, slot) in r.iter_mut().enumerate().take(n) {
        *slot = samples[..n - lag]
            .iter()
            .zip(samples[lag..].iter())
            .map(|(&a, &b)| a * b)
            .sum();
    }

    r
}

/// Peaks of the normalised autocorrelation in `[min_lag, max_lag)`, strongest first.
///
/// Returns (frequency, strength) pairs; the lag is refined by parabolic
/// interpolation while the strength stays the raw peak value.
fn find_autocorrelation_peaks(
    r: &[f64],
    r_w: &[f64],
    min_lag: usize,
    max_lag: usize,
    sample_rate: f64,
) -> Vec<(f64, f64)> {
    if max_lag >= r.len() || max_lag >= r_w.len() {
        return Vec::new();
    }

    let r_0 = r[0];
    if r_0 <= 0.0 || r_w[0] <= 0.0 {
        return Vec::new();
    }

    let r_norm: Vec<f64> = (0..=max_lag)
        .map(|lag| {
            if r_w[lag] > 0.0 {
                (r[lag] / r_0) / (r_w[lag] / r_w[0])
            } else {
                0.0
            }
        })
        .collect();

    let mut candidates = Vec::new();

    for lag in min_lag.max(1)..max_lag {
        let r_prev = r_norm[lag - 1];
        let r_curr = r_norm[lag];
        let r_next = r_norm[lag + 1];
        if r_curr <= r_prev || r_curr <= r_next {
            continue;
        }

        let denom = r_prev - 2.0 * r_curr + r_next;
        let refined_lag = if denom.abs() > 1e-10 {
            let delta = 0.5 * (r_prev - r_next) / denom;
            if delta.abs() < 1.0 {
                lag as f64 + delta
            } else {
                lag as f64
            }
        } else {
            lag as f64
        };
        candidates.push((sample_rate / refined_lag, r_curr));
    }

    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    candidates.truncate(MAX_CANDIDATES);
    candidates
}

/// Apply Viterbi algorithm to find optimal path through candidates.
///
/// From Boersma (1993) Eq. 27, the transition cost is:
/// - 0 if both unvoiced
/// - voiced_unvoiced_cost if voicing changes
/// - octave_jump_cost × |log₂(F1/F2)| if both voiced
///
/// The costs are corrected for time step: multiply by 0.01 / time_step.
/// The winning candidate of each frame is moved to the front.
fn viterbi_path(
    frames: &mut [PitchFrame],
    time_step: f64,
    octave_jump_cost: f64,
    voiced_unvoiced_cost: f64,
) {
    let n_frames = frames.len();
    if n_frames <= 1 {
        return;
    }

    let time_correction = 0.01 / time_step;

    // best_cost[i][j]: cheapest path ending in candidate j of frame i
    let mut best_cost: Vec<Vec<f64>> = frames
        .iter()
        .map(|f| vec![f64::INFINITY; f.candidates.len()])
        .collect();
    let mut best_prev: Vec<Vec<usize>> = frames
        .iter()
        .map(|f| vec![0; f.candidates.len()])
        .collect();

    for (j, cand) in frames[0].candidates.iter().enumerate() {
        best_cost[0][j] = -cand.strength;
    }

    for i in 1..n_frames {
        for (j, cand_j) in frames[i].candidates.iter().enumerate() {
            for (k, cand_k) in frames[i - 1].candidates.iter().enumerate() {
                let f_k = cand_k.frequency;
                let f_j = cand_j.frequency;

                let trans_cost = if f_k == 0.0 && f_j == 0.0 {
                    0.0
                } else if f_k == 0.0 || f_j == 0.0 {
                    voiced_unvoiced_cost
                } else {
                    octave_jump_cost * (f_j / f_k).log2().abs()
                };

                let total_cost =
                    best_cost[i - 1][k] + trans_cost * time_correction - cand_j.strength;

                if total_cost < best_cost[i][j] {
                    best_cost[i][j] = total_cost;
                    best_prev[i][j] = k;
                }
            }
        }
    }

    let mut path = vec![0usize; n_frames];
    path[n_frames - 1] = best_cost[n_frames - 1]
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);

    for i in (0..n_frames - 1).rev() {
        path[i] = best_prev[i + 1][path[i + 1]];
    }

    for (frame, &best_idx) in frames.iter_mut().zip(path.iter()) {
        if best_idx > 0 {
            frame.candidates.swap(0, best_idx);
        }
    }
}

/// Track pitch with the autocorrelation method.
///
/// Algorithm:
/// 1. Extract a centred frame of `periods_per_window / floor` seconds
/// 2. Remove the frame mean and apply a Hanning window
/// 3. Autocorrelate and normalise by the window's autocorrelation
/// 4. Collect peaks with lags in [sr/ceiling, sr/floor] as candidates
/// 5. Add the unvoiced candidate and apply the octave cost
/// 6. Pick one candidate per frame with a Viterbi pass
///
/// # Errors
///
/// - `Error::InvalidParameter` if the configuration is out of range (see
///   [`PitchConfig::validate`])
/// - `Error::NotMono` for multi-channel input
pub fn track_pitch(waveform: &Waveform, config: &PitchConfig) -> Result<PitchContour> {
    waveform.validate()?;
    let sample_rate = waveform.sample_rate();
    config.validate(sample_rate)?;
    let samples = waveform.mono()?;
    let duration = waveform.duration();
    let pitch_floor = config.floor;
    let pitch_ceiling = config.ceiling;

    // Default time step (documented: 0.75 / floor)
    let time_step = if config.time_step <= 0.0 {
        0.75 / pitch_floor
    } else {
        config.time_step
    };

    let window_duration = config.periods_per_window / pitch_floor;
    let window_samples = odd_window_samples(window_duration, sample_rate);

    let min_lag = ((sample_rate / pitch_ceiling).ceil() as usize).max(2);
    let max_lag = ((sample_rate / pitch_floor).floor() as usize).min(window_samples - 1);

    let window = window::hanning(window_samples);
    let r_w = compute_autocorrelation(&window, max_lag);

    let grid = TimeGrid::centered(duration, window_duration, time_step);
    debug!(
        frames = grid.n_frames(),
        window_samples, min_lag, max_lag, "tracking pitch"
    );

    let global_peak = samples.iter().fold(0.0f64, |m, &s| m.max(s.abs()));

    let mut frames = Vec::with_capacity(grid.n_frames());

    for i in 0..grid.n_frames() {
        let t = grid.time(i);
        let mut frame = extract_frame(&samples, t, sample_rate, window_samples);

        let local_peak = frame.iter().fold(0.0f64, |m, &s| m.max(s.abs()));
        let local_intensity = local_peak / (global_peak + 1e-30);

        let mean = frame.iter().sum::<f64>() / frame.len() as f64;
        for (s, &w) in frame.iter_mut().zip(window.iter()) {
            *s = (*s - mean) * w;
        }
        let r = compute_autocorrelation(&frame, max_lag);
        let peaks = find_autocorrelation_peaks(&r, &r_w, min_lag, max_lag, sample_rate);

        let mut candidates = Vec::with_capacity(peaks.len() + 1);

        // Unvoiced candidate (Boersma 1993, Eq. 23)
        let unvoiced_strength = config.voicing_threshold
            + (2.0 - local_intensity / config.silence_threshold).max(0.0)
                * (1.0 + config.voicing_threshold);
        candidates.push(PitchCandidate::new(0.0, unvoiced_strength));

        // Voiced candidates with octave cost (Eq. 24)
        for (freq, strength) in peaks {
            if freq >= pitch_floor && freq <= pitch_ceiling && strength > 0.0 {
                let adjusted = strength - config.octave_cost * (pitch_floor / freq).log2();
                candidates.push(PitchCandidate::new(freq, adjusted));
            }
        }

        candidates.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        frames.push(PitchFrame::new(t, candidates, local_intensity));
    }

    viterbi_path(
        &mut frames,
        time_step,
        config.octave_jump_cost,
        config.voiced_unvoiced_cost,
    );

    Ok(PitchContour {
        frames,
        grid,
        pitch_floor,
        pitch_ceiling,
        sample_rate,
    })
}
