//! Spectrogram - Time-frequency power grid.
//!
//! This module computes spectrograms using the Short-Time Fourier Transform (STFT)
//! and answers the band-energy questions the spectral features ask of it.
//!
//! # Documentation Sources
//!
//! - Praat manual: Sound: To Spectrogram...
//! - Standard STFT definition from signal processing textbooks
//!
//! # Key Documented Facts
//!
//! From the Praat manual:
//!
//! - **Gaussian window**: "analyzes a factor of 2 slower... twice as many samples"
//!   This means the physical window is 2× the effective (user-specified) window length.
//!
//! # Algorithm Overview
//!
//! 1. **Framing**: Frames are centred in the signal, `time_step` apart.
//! 2. **Windowing**: Each frame is multiplied by a unit-energy Gaussian (or Hanning) window.
//! 3. **FFT**: Power-of-two FFT, at least as fine as `frequency_step`.
//! 4. **Power**: |X(f)|² for every bin from 0 Hz up to `max_frequency`.
//!
//! Values are never negative. Ratios of band sums are independent of the
//! absolute scaling, which is what every spectral feature uses.

use ndarray::{Array2, ArrayView1};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SpectrogramConfig;
use crate::error::Result;
use crate::timegrid::{extract_frame, odd_window_samples, TimeGrid};
use crate::waveform::Waveform;
use crate::window;

/// Window shape for spectrogram analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowShape {
    /// Gaussian window, physical length twice the effective length.
    Gaussian,
    /// Hanning window, physical length equal to the effective length.
    Hanning,
}

/// A frequency band in Hz.
///
/// Half-open bands `[low, high)` tile the axis without overlap: a bin exactly
/// on a shared boundary belongs to the upper band only. Closed bands
/// `[low, high]` include the upper edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub low: f64,
    pub high: f64,
    #[serde(default)]
    pub include_high: bool,
}

impl FrequencyBand {
    /// `[low, high)`.
    pub fn half_open(low: f64, high: f64) -> Self {
        Self {
            low,
            high,
            include_high: false,
        }
    }

    /// `[low, high]`.
    pub fn closed(low: f64, high: f64) -> Self {
        Self {
            low,
            high,
            include_high: true,
        }
    }

    /// `[centre - width/2, centre + width/2]`.
    pub fn around(centre: f64, width: f64) -> Self {
        Self::closed(centre - 0.5 * width, centre + 0.5 * width)
    }

    #[inline]
    pub fn contains(&self, frequency: f64) -> bool {
        frequency >= self.low
            && if self.include_high {
                frequency <= self.high
            } else {
                frequency < self.high
            }
    }
}

/// Power spectrogram (frequency bins × frames).
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// Power values, shape (n_freqs, n_times).
    values: Array2<f64>,
    grid: TimeGrid,
    /// Spacing of the frequency bins (the FFT resolution).
    freq_step: f64,
    /// Configured ceiling; the top bin never exceeds it.
    freq_max: f64,
    sample_rate: f64,
}

impl Spectrogram {
    pub fn new(
        values: Array2<f64>,
        grid: TimeGrid,
        freq_step: f64,
        freq_max: f64,
        sample_rate: f64,
    ) -> Self {
        Self {
            values,
            grid,
            freq_step,
            freq_max,
            sample_rate,
        }
    }

    /// Power values, shape (n_freqs, n_times).
    #[inline]
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    #[inline]
    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    #[inline]
    pub fn n_times(&self) -> usize {
        self.values.ncols()
    }

    #[inline]
    pub fn n_freqs(&self) -> usize {
        self.values.nrows()
    }

    #[inline]
    pub fn time_step(&self) -> f64 {
        self.grid.time_step()
    }

    #[inline]
    pub fn freq_step(&self) -> f64 {
        self.freq_step
    }

    #[inline]
    pub fn freq_max(&self) -> f64 {
        self.freq_max
    }

    /// Sample rate of the analysed waveform.
    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn time(&self, frame: usize) -> f64 {
        self.grid.time(frame)
    }

    #[inline]
    pub fn frequency(&self, bin: usize) -> f64 {
        bin as f64 * self.freq_step
    }

    pub fn times(&self) -> Vec<f64> {
        self.grid.times()
    }

    pub fn frequencies(&self) -> Vec<f64> {
        (0..self.n_freqs()).map(|i| self.frequency(i)).collect()
    }

    /// Power spectrum of one frame.
    pub fn frame(&self, frame: usize) -> Option<ArrayView1<'_, f64>> {
        (frame < self.n_times()).then(|| self.values.column(frame))
    }

    /// Frame nearest to `t`, or `None` when `t` is outside the grid.
    pub fn frame_at_time(&self, t: f64) -> Option<usize> {
        self.grid.nearest(t)
    }

    /// Sum of power over all bins of a frame (0 for an out-of-range frame).
    pub fn total_energy(&self, frame: usize) -> f64 {
        self.frame(frame).map(|column| column.sum()).unwrap_or(0.0)
    }

    /// Sum of power over bins in `[low, high)`.
    pub fn band_energy(&self, low: f64, high: f64, frame: usize) -> f64 {
        self.band_energy_in(&FrequencyBand::half_open(low, high), frame)
    }

    /// Sum of power over bins whose frequency lies in `band`.
    pub fn band_energy_in(&self, band: &FrequencyBand, frame: usize) -> f64 {
        let Some(column) = self.frame(frame) else {
            return 0.0;
        };
        column
            .iter()
            .enumerate()
            .filter(|&(bin, _)| band.contains(self.frequency(bin)))
            .map(|(_, &power)| power)
            .sum()
    }
}

/// Compute a power spectrogram.
///
/// # Arguments
///
/// * `waveform` - Mono waveform
/// * `config` - Window length, time step, ceiling, frequency step and window shape
///
/// # Errors
///
/// - `Error::InvalidParameter` for non-positive window length, time step,
///   maximum frequency or frequency step
/// - `Error::NotMono` for multi-channel input
pub fn spectrogram(waveform: &Waveform, config: &SpectrogramConfig) -> Result<Spectrogram> {
    config.validate()?;
    waveform.validate()?;
    let samples = waveform.mono()?;
    let sample_rate = waveform.sample_rate();
    let duration = waveform.duration();

    let physical_window_duration = match config.window_shape {
        WindowShape::Gaussian => 2.0 * config.window_length,
        WindowShape::Hanning => config.window_length,
    };
    let window_samples = odd_window_samples(physical_window_duration, sample_rate);
    let window = match config.window_shape {
        WindowShape::Gaussian => window::gaussian_unit_energy(window_samples, 12.0),
        WindowShape::Hanning => window::hanning(window_samples),
    };

    let grid = TimeGrid::centered(duration, physical_window_duration, config.time_step);

    // FFT size: power of 2, at least as fine as the requested frequency step
    let min_fft_size = (sample_rate / config.frequency_step).ceil() as usize;
    let fft_size = window_samples.max(min_fft_size).next_power_of_two();
    let df_fft = sample_rate / fft_size as f64;

    // Highest bin at or below both the ceiling and Nyquist
    let freq_max = config.max_frequency.min(0.5 * sample_rate);
    let n_freq_bins = ((freq_max / df_fft + 1e-9).floor() as usize + 1).min(fft_size / 2 + 1);

    debug!(
        frames = grid.n_frames(),
        bins = n_freq_bins,
        fft_size,
        "computing spectrogram"
    );

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);

    let mut values = Array2::<f64>::zeros((n_freq_bins, grid.n_frames()));
    let mut buffer = vec![Complex::new(0.0, 0.0); fft_size];

    for i in 0..grid.n_frames() {
        let frame = extract_frame(&samples, grid.time(i), sample_rate, window_samples);

        buffer.fill(Complex::new(0.0, 0.0));
        for (slot, (&s, &w)) in buffer.iter_mut().zip(frame.iter().zip(window.iter())) {
            *slot = Complex::new(s * w, 0.0);
        }
        fft.process(&mut buffer);

        for (j, c) in buffer.iter().take(n_freq_bins).enumerate() {
            values[[j, i]] = c.norm_sqr();
        }
    }

    Ok(Spectrogram::new(values, grid, df_fft, freq_max, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use approx::assert_relative_eq;

    fn tone_spectrogram(frequency: f64) -> Spectrogram {
        let waveform = Waveform::tone(frequency, 0.5, 16000.0, 0.5);
        spectrogram(&waveform, &SpectrogramConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_sample_rate() {
        let waveform = Waveform::from_slice(&[0.1; 800], -8000.0);
        assert!(matches!(
            spectrogram(&waveform, &SpectrogramConfig::default()),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_grid_invariants() {
        let spec = tone_spectrogram(440.0);
        assert!(spec.n_times() > 0);
        for i in 1..spec.n_times() {
            assert_relative_eq!(spec.time(i) - spec.time(i - 1), 0.01, epsilon = 1e-12);
        }
        let top = spec.frequency(spec.n_freqs() - 1);
        assert!(top <= 5000.0);
        assert!(top + spec.freq_step() > 5000.0);
        assert!(spec.values().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_peak_at_tone_frequency() {
        let spec = tone_spectrogram(1000.0);
        let frame = spec.frame(spec.n_times() / 2).unwrap();
        let (peak_bin, _) = frame
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
        assert!((spec.frequency(peak_bin) - 1000.0).abs() <= spec.freq_step());
    }

    #[test]
    fn test_adjacent_bands_partition() {
        let spec = tone_spectrogram(1000.0);
        let frame = spec.n_times() / 2;
        let low = spec.band_energy(50.0, 1000.0, frame);
        let high = spec.band_energy(1000.0, 5000.0, frame);
        let union = spec.band_energy(50.0, 5000.0, frame);
        assert_relative_eq!(low + high, union, max_relative = 1e-12);

        // 1000 Hz sits exactly on a bin; the half-open upper band owns it
        let at_edge = spec.band_energy_in(&FrequencyBand::closed(1000.0, 1000.0), frame);
        assert!(at_edge > 0.0);
        assert_eq!(spec.band_energy(1000.0, 1000.0, frame), 0.0);
    }

    #[test]
    fn test_total_energy() {
        let spec = tone_spectrogram(300.0);
        let frame = spec.n_times() / 2;
        let all = spec.band_energy_in(&FrequencyBand::closed(0.0, spec.freq_max()), frame);
        assert_relative_eq!(spec.total_energy(frame), all, max_relative = 1e-12);
        assert_eq!(spec.total_energy(spec.n_times() + 3), 0.0);
    }

    #[test]
    fn test_silence_has_zero_energy() {
        let waveform = Waveform::silence(0.3, 16000.0);
        let spec = spectrogram(&waveform, &SpectrogramConfig::default()).unwrap();
        for i in 0..spec.n_times() {
            assert_eq!(spec.total_energy(i), 0.0);
        }
    }

    #[test]
    fn test_frame_at_time() {
        let spec = tone_spectrogram(440.0);
        let t = spec.time(7);
        assert_eq!(spec.frame_at_time(t + 0.004), Some(7));
        assert_eq!(spec.frame_at_time(-1.0), None);
    }

    #[test]
    fn test_ceiling_clamped_to_nyquist() {
        let waveform = Waveform::tone(440.0, 0.3, 8000.0, 0.5);
        let config = SpectrogramConfig {
            max_frequency: 10000.0,
            ..SpectrogramConfig::default()
        };
        let spec = spectrogram(&waveform, &config).unwrap();
        assert!(spec.frequency(spec.n_freqs() - 1) <= 4000.0);
    }

    #[test]
    fn test_invalid_config() {
        let waveform = Waveform::tone(440.0, 0.3, 8000.0, 0.5);
        let config = SpectrogramConfig {
            time_step: 0.0,
            ..SpectrogramConfig::default()
        };
        assert!(matches!(
            spectrogram(&waveform, &config),
            Err(Error::InvalidParameter(_))
        ));
    }
}
