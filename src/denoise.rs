//! Noise removal ahead of feature extraction.
//!
//! [`Denoiser`] is the seam: any implementation must return a waveform with
//! the input's sample rate, channel count and sample format.
//! [`SpectralSubtraction`] is the implementation shipped with the crate.
//!
//! # Spectral subtraction
//!
//! Each channel is cut into frames of `window_length` seconds with 50 %
//! overlap and a periodic Hann window, so that the unmodified frames
//! overlap-add back to the input exactly. The noise power spectrum is the
//! average power of the frames centred inside the noise region, smoothed
//! across frequency with a moving average `smoothing_hz` wide. Inside the
//! filter band every frame's power is reduced by the noise power, floored
//! at zero, while the phase is kept.

use ndarray::{Array2, Axis};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DenoiseConfig;
use crate::error::{Error, Result};
use crate::waveform::Waveform;
use crate::window;

/// Span of the recording holding noise only, in seconds.
///
/// `end < start` asks the denoiser to pick the span itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseRegion {
    pub start: f64,
    pub end: f64,
}

impl NoiseRegion {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// A region that requests auto-selection.
    pub fn auto() -> Self {
        Self {
            start: 0.0,
            end: -1.0,
        }
    }

    #[inline]
    pub fn is_auto(&self) -> bool {
        self.end < self.start
    }
}

/// Removes stationary noise from a waveform.
pub trait Denoiser {
    /// # Errors
    ///
    /// - `Error::InvalidParameter` for a degenerate noise region
    fn denoise(&self, waveform: &Waveform, region: NoiseRegion) -> Result<Waveform>;
}

/// Power spectral subtraction with a noise estimate taken from one region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectralSubtraction {
    pub config: DenoiseConfig,
}

/// Frame geometry for one sample rate.
struct Framing {
    /// Frame length in samples (even).
    length: usize,
    hop: usize,
    fft_size: usize,
}

impl Framing {
    fn new(config: &DenoiseConfig, sample_rate: f64) -> Result<Self> {
        let mut length = (config.window_length * sample_rate).round() as usize;
        if length < 2 {
            return Err(Error::InvalidParameter(format!(
                "window length {} s is shorter than two samples at {} Hz",
                config.window_length, sample_rate
            )));
        }
        length += length % 2;
        Ok(Self {
            length,
            hop: length / 2,
            fft_size: length.next_power_of_two(),
        })
    }
}

impl SpectralSubtraction {
    pub fn new(config: DenoiseConfig) -> Self {
        Self { config }
    }

    /// The quietest `auto_noise_duration` span, summed over channels.
    ///
    /// The span is never shorter than one analysis window and is clipped to
    /// the recording.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidParameter` if the recording is shorter than one
    ///   analysis window
    pub fn quietest_region(&self, waveform: &Waveform) -> Result<NoiseRegion> {
        self.config.validate()?;
        let sr = waveform.sample_rate();
        let framing = Framing::new(&self.config, sr)?;
        let n = waveform.n_samples();
        if n < framing.length {
            return Err(Error::InvalidParameter(format!(
                "recording of {} s is shorter than one analysis window",
                waveform.duration()
            )));
        }

        let span = ((self.config.auto_noise_duration * sr).round() as usize)
            .max(framing.length)
            .min(n);

        // Prefix sums of the per-sample energy across channels
        let mut cumulative = vec![0.0; n + 1];
        for i in 0..n {
            let energy: f64 = waveform.samples().column(i).iter().map(|s| s * s).sum();
            cumulative[i + 1] = cumulative[i] + energy;
        }

        let mut best = 0;
        let mut best_energy = f64::INFINITY;
        for start in 0..=n - span {
            let energy = cumulative[start + span] - cumulative[start];
            if energy < best_energy {
                best_energy = energy;
                best = start;
            }
        }

        Ok(NoiseRegion::new(best as f64 / sr, (best + span) as f64 / sr))
    }

    /// Sample range `[lo, hi)` of an explicit region.
    fn region_samples(
        &self,
        region: NoiseRegion,
        waveform: &Waveform,
        framing: &Framing,
    ) -> Result<(usize, usize)> {
        let NoiseRegion { start, end } = region;
        if !(start.is_finite() && end.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "noise region bounds must be finite, got [{}, {}]",
                start, end
            )));
        }
        if start == end {
            return Err(Error::InvalidParameter(format!(
                "noise region [{}, {}] is empty",
                start, end
            )));
        }
        if start < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "noise region starts before the recording: {}",
                start
            )));
        }

        let sr = waveform.sample_rate();
        let duration = waveform.duration();
        if end > duration + 0.5 / sr {
            return Err(Error::InvalidParameter(format!(
                "noise region [{}, {}] extends past the recording ({} s)",
                start, end, duration
            )));
        }

        let n = waveform.n_samples();
        let lo = ((start * sr).round() as usize).min(n);
        let hi = ((end * sr).round() as usize).min(n);
        if hi - lo < framing.length {
            return Err(Error::InvalidParameter(format!(
                "noise region [{}, {}] is shorter than one analysis window ({} s)",
                start, end, self.config.window_length
            )));
        }
        Ok((lo, hi))
    }

    fn resolve(
        &self,
        waveform: &Waveform,
        region: NoiseRegion,
        framing: &Framing,
    ) -> Result<(usize, usize)> {
        let region = if region.is_auto() {
            let chosen = self.quietest_region(waveform)?;
            debug!(
                start = chosen.start,
                end = chosen.end,
                "auto-selected noise region"
            );
            chosen
        } else {
            region
        };
        self.region_samples(region, waveform, framing)
    }

    /// Moving average over `±half_width` bins, truncated at the edges.
    fn smooth(power: &[f64], half_width: usize) -> Vec<f64> {
        let n = power.len();
        (0..n)
            .map(|k| {
                let lo = k.saturating_sub(half_width);
                let hi = (k + half_width).min(n - 1);
                power[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64
            })
            .collect()
    }

    fn process_channel(
        &self,
        samples: &[f64],
        sample_rate: f64,
        framing: &Framing,
        noise_range: (usize, usize),
    ) -> Vec<f64> {
        let Framing {
            length,
            hop,
            fft_size,
        } = *framing;
        let n = samples.len();
        let half = fft_size / 2;
        let bin_width = sample_rate / fft_size as f64;

        // hop zeros in front so the first sample is covered by two frames
        let mut padded = vec![0.0; hop + n + length];
        padded[hop..hop + n].copy_from_slice(samples);
        let n_frames = (padded.len() - length) / hop + 1;

        let window = window::hann_periodic(length);
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let spectra: Vec<Vec<Complex<f64>>> = (0..n_frames)
            .map(|k| {
                let start = k * hop;
                let mut buffer = vec![Complex::new(0.0, 0.0); fft_size];
                for (j, b) in buffer.iter_mut().take(length).enumerate() {
                    *b = Complex::new(padded[start + j] * window[j], 0.0);
                }
                forward.process(&mut buffer);
                buffer
            })
            .collect();

        // Frame k is centred on original sample k·hop
        let (lo, hi) = noise_range;
        let noise_frames: Vec<&Vec<Complex<f64>>> = spectra
            .iter()
            .enumerate()
            .filter(|(k, _)| (lo..hi).contains(&(k * hop)))
            .map(|(_, s)| s)
            .collect();

        let mut noise = vec![0.0; half + 1];
        for spectrum in &noise_frames {
            for (p, x) in noise.iter_mut().zip(spectrum.iter()) {
                *p += x.norm_sqr();
            }
        }
        let count = noise_frames.len().max(1) as f64;
        noise.iter_mut().for_each(|p| *p /= count);
        let smoothing_bins = (0.5 * self.config.smoothing_hz / bin_width).round() as usize;
        let noise = Self::smooth(&noise, smoothing_bins);

        let in_band = |k: usize| {
            let f = k as f64 * bin_width;
            f >= self.config.filter_low_hz && f <= self.config.filter_high_hz
        };

        let mut output = vec![0.0; padded.len()];
        for (k, mut spectrum) in spectra.into_iter().enumerate() {
            for bin in (0..=half).filter(|&b| in_band(b)) {
                let power = spectrum[bin].norm_sqr();
                let gain = if power > 0.0 {
                    ((power - noise[bin]).max(0.0) / power).sqrt()
                } else {
                    1.0
                };
                spectrum[bin] *= gain;
                if bin > 0 && bin < half {
                    spectrum[fft_size - bin] *= gain;
                }
            }

            inverse.process(&mut spectrum);
            let start = k * hop;
            for (j, x) in spectrum.iter().take(length).enumerate() {
                output[start + j] += x.re / fft_size as f64;
            }
        }

        output.drain(..hop);
        output.truncate(n);
        output
    }
}

impl Denoiser for SpectralSubtraction {
    fn denoise(&self, waveform: &Waveform, region: NoiseRegion) -> Result<Waveform> {
        self.config.validate()?;
        waveform.validate()?;
        let framing = Framing::new(&self.config, waveform.sample_rate())?;
        let noise_range = self.resolve(waveform, region, &framing)?;

        debug!(
            window = framing.length,
            fft_size = framing.fft_size,
            noise_start = noise_range.0,
            noise_end = noise_range.1,
            channels = waveform.n_channels(),
            "spectral subtraction"
        );

        let range = waveform.format().integer_range();
        let mut samples = Array2::<f64>::zeros(waveform.samples().raw_dim());
        for (src, mut dst) in waveform
            .samples()
            .axis_iter(Axis(0))
            .zip(samples.axis_iter_mut(Axis(0)))
        {
            let channel: Vec<f64> = src.to_vec();
            let cleaned =
                self.process_channel(&channel, waveform.sample_rate(), &framing, noise_range);
            for (d, c) in dst.iter_mut().zip(cleaned) {
                *d = match range {
                    Some((lo, hi)) => c.clamp(lo, hi),
                    None => c,
                };
            }
        }
        Ok(waveform.with_samples(samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::SampleFormat;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    /// Uniform noise in [-amplitude, amplitude] from a fixed LCG.
    fn noise(n: usize, amplitude: f64, seed: u64) -> Vec<f64> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
                amplitude * (2.0 * unit - 1.0)
            })
            .collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    /// 1 s at 16 kHz: noise throughout, a 440 Hz tone from 0.5 s on.
    fn noisy_tone() -> Waveform {
        let sr = 16000.0;
        let n = 16000;
        let mut samples = noise(n, 0.1, 7);
        for (i, s) in samples.iter_mut().enumerate().skip(n / 2) {
            let t = (i - n / 2) as f64 / sr;
            *s += 0.5 * (2.0 * std::f64::consts::PI * 440.0 * t).sin();
        }
        Waveform::new(Array1::from_vec(samples), sr)
    }

    fn span(waveform: &Waveform, from: f64, to: f64) -> Vec<f64> {
        let sr = waveform.sample_rate();
        let row = waveform.samples().row(0);
        row.iter()
            .skip((from * sr) as usize)
            .take(((to - from) * sr) as usize)
            .copied()
            .collect()
    }

    #[test]
    fn test_unmodified_frames_reconstruct_input() {
        let waveform = noisy_tone();
        // Filter band above Nyquist leaves every bin untouched
        let denoiser = SpectralSubtraction::new(DenoiseConfig {
            filter_low_hz: 10000.0,
            filter_high_hz: 12000.0,
            ..DenoiseConfig::default()
        });
        let out = denoiser
            .denoise(&waveform, NoiseRegion::new(0.0, 0.4))
            .unwrap();

        for (a, b) in out.samples().iter().zip(waveform.samples().iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_noise_span_is_attenuated() {
        let waveform = noisy_tone();
        let out = SpectralSubtraction::default()
            .denoise(&waveform, NoiseRegion::new(0.0, 0.4))
            .unwrap();

        let before = rms(&span(&waveform, 0.05, 0.45));
        let after = rms(&span(&out, 0.05, 0.45));
        assert!(after < 0.8 * before, "rms {} -> {}", before, after);
    }

    #[test]
    fn test_tone_is_preserved() {
        let waveform = noisy_tone();
        let out = SpectralSubtraction::default()
            .denoise(&waveform, NoiseRegion::new(0.0, 0.4))
            .unwrap();

        let tone_rms = rms(&span(&out, 0.6, 0.95));
        assert_relative_eq!(tone_rms, 0.5 / 2f64.sqrt(), max_relative = 0.05);
    }

    #[test]
    fn test_output_keeps_layout() {
        let sr = 8000.0;
        let left = noise(4000, 1000.0, 1);
        let right = noise(4000, 2000.0, 2);
        let mut interleaved = Vec::with_capacity(8000);
        for (l, r) in left.iter().zip(right.iter()) {
            interleaved.push(l.round());
            interleaved.push(r.round());
        }
        let waveform =
            Waveform::from_interleaved(&interleaved, 2, sr, SampleFormat::Int { bits: 16 })
                .unwrap();

        let out = SpectralSubtraction::default()
            .denoise(&waveform, NoiseRegion::new(0.1, 0.3))
            .unwrap();
        assert_eq!(out.n_channels(), 2);
        assert_eq!(out.n_samples(), waveform.n_samples());
        assert_eq!(out.sample_rate(), sr);
        assert_eq!(out.format(), SampleFormat::Int { bits: 16 });
    }

    #[test]
    fn test_rejects_degenerate_regions() {
        let waveform = noisy_tone();
        let denoiser = SpectralSubtraction::default();
        let bad = [
            NoiseRegion::new(0.2, 0.2),
            NoiseRegion::new(f64::NAN, 0.3),
            NoiseRegion::new(0.1, f64::INFINITY),
            NoiseRegion::new(-0.1, 0.3),
            NoiseRegion::new(0.1, 0.11),
            NoiseRegion::new(0.9, 1.5),
        ];
        for region in bad {
            assert!(
                matches!(
                    denoiser.denoise(&waveform, region),
                    Err(Error::InvalidParameter(_))
                ),
                "{:?} accepted",
                region
            );
        }
    }

    #[test]
    fn test_rejects_recording_shorter_than_window() {
        let waveform = Waveform::silence(0.01, 16000.0);
        assert!(matches!(
            SpectralSubtraction::default().denoise(&waveform, NoiseRegion::auto()),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_auto_region_finds_quiet_span() {
        let sr = 16000.0;
        let mut samples = Waveform::tone(300.0, 1.0, sr, 0.5).samples().row(0).to_vec();
        let quiet = noise(4800, 0.01, 3);
        samples[9600..14400].copy_from_slice(&quiet);
        let waveform = Waveform::new(Array1::from_vec(samples), sr);

        let denoiser = SpectralSubtraction::default();
        let region = denoiser.quietest_region(&waveform).unwrap();
        assert!(region.start >= 0.6 - 1e-9, "{:?}", region);
        assert!(region.end <= 0.9 + 1e-9, "{:?}", region);
        assert_relative_eq!(region.end - region.start, 0.25, epsilon = 1e-9);

        let out = denoiser.denoise(&waveform, NoiseRegion::auto()).unwrap();
        assert!(rms(&span(&out, 0.65, 0.85)) < rms(&span(&waveform, 0.65, 0.85)));
    }

    #[test]
    fn test_region_serde() {
        let region: NoiseRegion = serde_json::from_str(r#"{"start": 0.0, "end": 0.5}"#).unwrap();
        assert_eq!(region, NoiseRegion::new(0.0, 0.5));
        assert!(!region.is_auto());
        assert!(NoiseRegion::auto().is_auto());
    }
}
