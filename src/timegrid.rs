//! Frame grids and time lookup.
//!
//! Every frame-based artifact (spectrogram, pitch contour, formant track,
//! intensity) sits on its own regular grid of frame centres. The grids differ
//! in window length and therefore in where their first frame falls, so
//! artifacts are always aligned by time, never by frame index.
//!
//! A time `t` is in range when it lies no more than half a time step beyond
//! the first or last frame centre; inside that margin the edge frame is used.

use serde::Serialize;

/// Fractional-index distance below which a time counts as a frame centre.
const CENTRE_TOLERANCE: f64 = 1e-9;

/// Regular grid of frame centres: `t1, t1 + step, ..., t1 + (n-1)·step`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeGrid {
    t1: f64,
    time_step: f64,
    n_frames: usize,
}

/// The two frames around a time and the interpolation weight of the second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub lo: usize,
    pub hi: usize,
    /// Weight of `hi`, in [0, 1).
    pub frac: f64,
}

impl Bracket {
    /// Linear interpolation between two frame values.
    #[inline]
    pub fn interpolate(&self, lo_value: f64, hi_value: f64) -> f64 {
        lo_value * (1.0 - self.frac) + hi_value * self.frac
    }
}

impl TimeGrid {
    pub fn new(t1: f64, time_step: f64, n_frames: usize) -> Self {
        Self {
            t1,
            time_step,
            n_frames,
        }
    }

    /// Frames of `window_duration` centred in a signal of `duration` seconds.
    ///
    /// `n = floor((duration - window) / step) + 1`, at least one frame, with
    /// the leftover time split evenly between both ends. A non-finite frame
    /// count collapses to one frame.
    pub fn centered(duration: f64, window_duration: f64, time_step: f64) -> Self {
        let span = (duration - window_duration) / time_step + 1e-9;
        let n_frames = if span.is_finite() && span > 0.0 {
            span.floor() as usize + 1
        } else {
            1
        };
        let t1 = (duration - (n_frames - 1) as f64 * time_step) / 2.0;
        Self::new(t1, time_step, n_frames)
    }

    #[inline]
    pub fn t1(&self) -> f64 {
        self.t1
    }

    #[inline]
    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    #[inline]
    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Centre time of a frame.
    #[inline]
    pub fn time(&self, frame: usize) -> f64 {
        self.t1 + frame as f64 * self.time_step
    }

    pub fn times(&self) -> Vec<f64> {
        (0..self.n_frames).map(|i| self.time(i)).collect()
    }

    /// Fractional frame index of `t`, or `None` when out of range.
    fn index(&self, t: f64) -> Option<f64> {
        if self.n_frames == 0 {
            return None;
        }
        let idx_float = (t - self.t1) / self.time_step;
        if !idx_float.is_finite() || idx_float < -0.5 || idx_float > self.n_frames as f64 - 0.5 {
            return None;
        }
        Some(idx_float)
    }

    /// Frame whose centre is nearest to `t`.
    pub fn nearest(&self, t: f64) -> Option<usize> {
        let idx_float = self.index(t)?;
        Some((idx_float.round().max(0.0) as usize).min(self.n_frames - 1))
    }

    /// Frames bracketing `t` for linear interpolation.
    ///
    /// Inside the half-step margin at either end both frames are the edge frame,
    /// and so is a time on (within rounding of) a frame centre.
    pub fn bracket(&self, t: f64) -> Option<Bracket> {
        let idx_float = self.index(t)?;
        let last = self.n_frames - 1;
        if idx_float <= 0.0 {
            return Some(Bracket { lo: 0, hi: 0, frac: 0.0 });
        }
        let nearest = idx_float.round();
        if (idx_float - nearest).abs() < CENTRE_TOLERANCE {
            let frame = (nearest as usize).min(last);
            return Some(Bracket {
                lo: frame,
                hi: frame,
                frac: 0.0,
            });
        }
        let lo = idx_float.floor() as usize;
        if lo >= last {
            return Some(Bracket {
                lo: last,
                hi: last,
                frac: 0.0,
            });
        }
        Some(Bracket {
            lo,
            hi: lo + 1,
            frac: idx_float - lo as f64,
        })
    }
}

/// Interpolation between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// Value of the nearest frame.
    Nearest,
    /// Linear interpolation between the two bracketing frames.
    #[default]
    Linear,
}

/// Odd sample count for a window of `duration` seconds.
pub(crate) fn odd_window_samples(duration: f64, sample_rate: f64) -> usize {
    let n = (duration * sample_rate).round() as usize;
    if n % 2 == 0 {
        n + 1
    } else {
        n
    }
}

/// Copy `window_samples` samples centred on time `t`, zero-padding past either end.
pub(crate) fn extract_frame(
    samples: &[f64],
    t: f64,
    sample_rate: f64,
    window_samples: usize,
) -> Vec<f64> {
    let half_window = (window_samples / 2) as isize;
    let n_samples = samples.len() as isize;
    let center = (t * sample_rate).round() as isize;
    let start = center - half_window;
    let end = start + window_samples as isize;

    let mut frame = vec![0.0; window_samples];
    let src_start = start.clamp(0, n_samples);
    let src_end = end.clamp(0, n_samples);
    if src_end > src_start {
        let dst_start = (src_start - start) as usize;
        let len = (src_end - src_start) as usize;
        frame[dst_start..dst_start + len]
            .copy_from_slice(&samples[src_start as usize..src_end as usize]);
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_centered_grid() {
        // 1 s signal, 40 ms window, 10 ms step
        let grid = TimeGrid::centered(1.0, 0.04, 0.01);
        assert_eq!(grid.n_frames(), 97);
        assert_relative_eq!(grid.t1(), 0.02, epsilon = 1e-12);
        assert_relative_eq!(grid.time(96), 0.98, epsilon = 1e-12);
    }

    #[test]
    fn test_centered_grid_short_signal() {
        let grid = TimeGrid::centered(0.01, 0.04, 0.01);
        assert_eq!(grid.n_frames(), 1);
        assert_relative_eq!(grid.t1(), 0.005);
    }

    #[test]
    fn test_centered_grid_degenerate_step() {
        assert_eq!(TimeGrid::centered(1.0, 0.04, 0.0).n_frames(), 1);
        assert_eq!(TimeGrid::centered(f64::NAN, 0.04, 0.01).n_frames(), 1);
        assert_eq!(TimeGrid::centered(f64::INFINITY, 0.04, 0.01).n_frames(), 1);
    }

    #[test]
    fn test_bracket() {
        let grid = TimeGrid::new(0.1, 0.01, 5);

        let b = grid.bracket(0.125).unwrap();
        assert_eq!((b.lo, b.hi), (2, 3));
        assert_relative_eq!(b.frac, 0.5, epsilon = 1e-9);
        assert_relative_eq!(b.interpolate(100.0, 200.0), 150.0, epsilon = 1e-6);

        let edge = grid.bracket(0.097).unwrap();
        assert_eq!((edge.lo, edge.hi), (0, 0));
        let end = grid.bracket(0.143).unwrap();
        assert_eq!((end.lo, end.hi), (4, 4));

        let centre = grid.bracket(0.1 + 3.0 * 0.01).unwrap();
        assert_eq!((centre.lo, centre.hi), (3, 3));

        assert!(grid.bracket(0.094).is_none());
        assert!(grid.bracket(0.146).is_none());
        assert!(grid.bracket(f64::NAN).is_none());
        assert!(TimeGrid::new(0.0, 0.01, 0).bracket(0.0).is_none());
    }

    #[test]
    fn test_nearest() {
        let grid = TimeGrid::new(0.1, 0.01, 5);
        assert_eq!(grid.nearest(0.1139), Some(1));
        assert_eq!(grid.nearest(0.1151), Some(2));
        assert_eq!(grid.nearest(0.0951), Some(0));
        assert_eq!(grid.nearest(0.2), None);
    }

    #[test]
    fn test_extract_frame_pads_edges() {
        let samples: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        // Centre on sample 0 with a 5-sample window
        let frame = extract_frame(&samples, 0.0, 1.0, 5);
        assert_eq!(frame, vec![0.0, 0.0, 1.0, 2.0, 3.0]);

        let frame = extract_frame(&samples, 9.0, 1.0, 5);
        assert_eq!(frame, vec![8.0, 9.0, 10.0, 0.0, 0.0]);

        let frame = extract_frame(&samples, 4.0, 1.0, 3);
        assert_eq!(frame, vec![4.0, 5.0, 6.0]);

        let frame = extract_frame(&samples, 100.0, 1.0, 3);
        assert_eq!(frame, vec![0.0; 3]);
    }

    #[test]
    fn test_odd_window_samples() {
        assert_eq!(odd_window_samples(0.04, 16000.0), 641);
        assert_eq!(odd_window_samples(0.0405, 16000.0), 649);
    }
}
