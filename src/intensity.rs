//! Intensity - RMS energy contour in dB.
//!
//! # Documentation Sources
//!
//! - Praat manual: Sound: To Intensity...
//! - Praat manual: Intro 6.2. Configuring the intensity contour
//!
//! # Key Facts
//!
//! - Window: Gaussian, effective duration 3.2 / min_pitch
//! - Physical window: 7.2 / min_pitch (2.25× the effective duration)
//! - DC removal: unweighted frame mean subtracted before windowing
//!
//! # Algorithm Overview
//!
//! For each analysis frame:
//! 1. Extract samples centered at frame time
//! 2. Subtract the frame mean (optional)
//! 3. Compute the window-weighted mean square
//! 4. Convert to dB relative to [`INTENSITY_REFERENCE_PA2`]

use ndarray::Array1;
use tracing::debug;

use crate::config::IntensityConfig;
use crate::error::Result;
use crate::timegrid::{extract_frame, odd_window_samples, Interpolation, TimeGrid};
use crate::waveform::Waveform;
use crate::window;

/// Squared reference pressure, (2×10⁻⁵ Pa)², for dB SPL.
pub const INTENSITY_REFERENCE_PA2: f64 = 4e-10;

/// Gaussian shape parameter of the intensity window.
const WINDOW_ALPHA: f64 = 13.2;

/// Intensity contour (loudness over time).
///
/// Values are in dB relative to [`INTENSITY_REFERENCE_PA2`]. A full-scale
/// sine reads about 91 dB; complete silence reads negative infinity.
#[derive(Debug, Clone)]
pub struct Intensity {
    grid: TimeGrid,
    /// Negative infinity marks zero energy.
    values: Array1<f64>,
    min_pitch: f64,
}

impl Intensity {
    pub fn new(grid: TimeGrid, values: Array1<f64>, min_pitch: f64) -> Self {
        Self {
            grid,
            values,
            min_pitch,
        }
    }

    #[inline]
    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    pub fn times(&self) -> Array1<f64> {
        Array1::from_vec(self.grid.times())
    }

    #[inline]
    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    #[inline]
    pub fn n_frames(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn time_step(&self) -> f64 {
        self.grid.time_step()
    }

    #[inline]
    pub fn min_pitch(&self) -> f64 {
        self.min_pitch
    }

    /// Intensity at time `t`, or `None` outside the analysed range.
    ///
    /// Within half a time step of either end the edge frame's value is used.
    pub fn value_at(&self, t: f64, interpolation: Interpolation) -> Option<f64> {
        match interpolation {
            Interpolation::Nearest => self.grid.nearest(t).map(|i| self.values[i]),
            Interpolation::Linear => {
                let bracket = self.grid.bracket(t)?;
                let lo = self.values[bracket.lo];
                if bracket.lo == bracket.hi {
                    return Some(lo);
                }
                Some(bracket.interpolate(lo, self.values[bracket.hi]))
            }
        }
    }
}

/// Compute the intensity contour of a mono waveform.
///
/// Frames are left-aligned: the first is centred half a window into the
/// signal and no window extends past the end, apart from the single frame
/// produced when the signal is shorter than one window.
///
/// # Errors
///
/// - `Error::InvalidParameter` for a non-positive `min_pitch` or negative `time_step`
/// - `Error::NotMono` for multi-channel input
pub fn intensity(waveform: &Waveform, config: &IntensityConfig) -> Result<Intensity> {
    config.validate()?;
    waveform.validate()?;
    let samples = waveform.mono()?;
    let sample_rate = waveform.sample_rate();
    let duration = waveform.duration();
    let min_pitch = config.min_pitch;

    let time_step = if config.time_step <= 0.0 {
        0.8 / min_pitch
    } else {
        config.time_step
    };

    let physical_window_duration = 7.2 / min_pitch;
    let half_window_duration = physical_window_duration / 2.0;
    let window_samples = odd_window_samples(physical_window_duration, sample_rate);
    let window = window::gaussian_edge_zero(window_samples, WINDOW_ALPHA);
    let window_sum: f64 = window.iter().sum();

    let t1 = half_window_duration;
    let t_max = duration - half_window_duration;
    let span = (t_max - t1) / time_step + 1e-9;
    let n_frames = if span.is_finite() && span > 0.0 {
        span.floor() as usize + 1
    } else {
        1
    };
    let grid = TimeGrid::new(t1, time_step, n_frames);

    debug!(frames = n_frames, window_samples, "computing intensity");

    let values = (0..n_frames)
        .map(|i| {
            let mut frame = extract_frame(&samples, grid.time(i), sample_rate, window_samples);

            if config.subtract_mean {
                let mean = frame.iter().sum::<f64>() / frame.len() as f64;
                for s in frame.iter_mut() {
                    *s -= mean;
                }
            }

            let mean_square = frame
                .iter()
                .zip(window.iter())
                .map(|(&s, &w)| s * s * w)
                .sum::<f64>()
                / window_sum;

            if mean_square <= 0.0 {
                f64::NEG_INFINITY
            } else {
                10.0 * (mean_square / INTENSITY_REFERENCE_PA2).log10()
            }
        })
        .collect::<Array1<f64>>();

    Ok(Intensity::new(grid, values, min_pitch))
}
