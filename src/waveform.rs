//! Waveform - Audio samples with sample rate and sample format.
//!
//! This is the input type for every analysis in voicemarkers. Decoding audio
//! files is left to the caller; a `Waveform` is built from samples that are
//! already in memory.
//!
//! # Channels
//!
//! Samples are stored as a channels × frames array. Preprocessing works on
//! every channel; the analyses (pitch, formants, spectrogram, intensity)
//! require a single channel and return [`Error::NotMono`] otherwise. Use
//! [`Waveform::channel_waveform`] to pick one.
//!
//! # Sample Format
//!
//! Integer formats keep their native scale (±32768 for 16-bit audio), so that
//! preprocessing can clip results back into the representable range. Analyses
//! read samples normalised to full scale through [`Waveform::mono`]: integer
//! samples are divided by 2^(bits-1), float samples are used as-is.

use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::config::{FormantConfig, IntensityConfig, PitchConfig, SpectrogramConfig};
use crate::error::{Error, Result};
use crate::formant::FormantTrack;
use crate::intensity::Intensity;
use crate::pitch::PitchContour;
use crate::spectrogram::Spectrogram;

/// Storage format of the samples a waveform was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// Floating point, nominally in [-1.0, 1.0].
    #[default]
    Float,
    /// Signed integer PCM with the given bit depth, stored at native scale.
    Int { bits: u16 },
}

impl SampleFormat {
    /// Value that maps to 1.0 when normalising: 2^(bits-1) for integer formats.
    pub fn full_scale(&self) -> f64 {
        match *self {
            SampleFormat::Float => 1.0,
            SampleFormat::Int { bits } => (1i64 << (bits - 1)) as f64,
        }
    }

    /// Representable range `[min, max]` of integer formats.
    pub fn integer_range(&self) -> Option<(f64, f64)> {
        match *self {
            SampleFormat::Float => None,
            SampleFormat::Int { .. } => {
                let full = self.full_scale();
                Some((-full, full - 1.0))
            }
        }
    }

    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(self, SampleFormat::Int { .. })
    }

    fn validate(&self) -> Result<()> {
        match *self {
            SampleFormat::Int { bits } if !(2..=32).contains(&bits) => Err(
                Error::InvalidParameter(format!("unsupported integer bit depth {}", bits)),
            ),
            _ => Ok(()),
        }
    }
}

/// Audio samples with sample rate and format.
///
/// Immutable once built; preprocessing returns new waveforms.
///
/// # Example
///
/// ```
/// use voicemarkers::Waveform;
///
/// let waveform = Waveform::tone(150.0, 0.5, 16000.0, 0.5);
/// assert_eq!(waveform.n_channels(), 1);
/// assert!((waveform.duration() - 0.5).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct Waveform {
    /// Samples, one row per channel.
    samples: Array2<f64>,

    /// Sample rate in Hz.
    sample_rate: f64,

    format: SampleFormat,
}

impl Waveform {
    /// Create a mono, float-format waveform.
    ///
    /// # Arguments
    ///
    /// * `samples` - Audio samples as a 1D array
    /// * `sample_rate` - Sample rate in Hz
    pub fn new(samples: Array1<f64>, sample_rate: f64) -> Self {
        Self {
            samples: samples.insert_axis(Axis(0)),
            sample_rate,
            format: SampleFormat::Float,
        }
    }

    /// Create a mono, float-format waveform from a slice.
    pub fn from_slice(samples: &[f64], sample_rate: f64) -> Self {
        Self::new(Array1::from_vec(samples.to_vec()), sample_rate)
    }

    /// Create a waveform from a channels × frames array.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidParameter` if the sample rate is not positive and
    ///   finite, there are no channels, or the bit depth is unsupported
    pub fn from_channels(
        samples: Array2<f64>,
        sample_rate: f64,
        format: SampleFormat,
    ) -> Result<Self> {
        if samples.nrows() == 0 {
            return Err(Error::InvalidParameter(
                "waveform must have at least one channel".to_string(),
            ));
        }
        let waveform = Self {
            samples,
            sample_rate,
            format,
        };
        waveform.validate()?;
        Ok(waveform)
    }

    /// Create a waveform from interleaved samples: `[L0, R0, L1, R1, ...]`.
    ///
    /// A trailing incomplete frame is dropped.
    pub fn from_interleaved(
        samples: &[f64],
        n_channels: usize,
        sample_rate: f64,
        format: SampleFormat,
    ) -> Result<Self> {
        if n_channels == 0 {
            return Err(Error::InvalidParameter(
                "waveform must have at least one channel".to_string(),
            ));
        }
        let n_frames = samples.len() / n_channels;
        let mut channels = Array2::<f64>::zeros((n_channels, n_frames));
        for (c, mut row) in channels.axis_iter_mut(Axis(0)).enumerate() {
            // Every Nth sample starting at the channel offset
            for (dst, &src) in row
                .iter_mut()
                .zip(samples.iter().skip(c).step_by(n_channels))
            {
                *dst = src;
            }
        }
        Self::from_channels(channels, sample_rate, format)
    }

    /// A sine tone `amplitude · sin(2π·f·t)`.
    pub fn tone(frequency: f64, duration: f64, sample_rate: f64, amplitude: f64) -> Self {
        let n = (duration * sample_rate).round() as usize;
        let omega = 2.0 * std::f64::consts::PI * frequency / sample_rate;
        Self::new(
            Array1::from_iter((0..n).map(|i| amplitude * (omega * i as f64).sin())),
            sample_rate,
        )
    }

    /// Digital silence.
    pub fn silence(duration: f64, sample_rate: f64) -> Self {
        let n = (duration * sample_rate).round() as usize;
        Self::new(Array1::zeros(n), sample_rate)
    }

    /// New waveform with the same rate and format.
    pub(crate) fn with_samples(&self, samples: Array2<f64>) -> Self {
        Self {
            samples,
            sample_rate: self.sample_rate,
            format: self.format,
        }
    }

    /// Raw samples at native scale, one row per channel.
    #[inline]
    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }

    /// Raw samples of one channel.
    pub fn channel(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.n_channels()).then(|| self.samples.row(index))
    }

    /// A mono waveform holding one channel.
    pub fn channel_waveform(&self, index: usize) -> Result<Self> {
        let row = self.channel(index).ok_or_else(|| {
            Error::InvalidParameter(format!(
                "Channel {} does not exist. Waveform has {} channels.",
                index,
                self.n_channels()
            ))
        })?;
        Ok(self.with_samples(row.to_owned().insert_axis(Axis(0))))
    }

    /// Check the sample rate and format before analysis.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidParameter` if the sample rate is not positive and
    ///   finite, or the bit depth is unsupported
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        self.format.validate()
    }

    /// The single channel normalised to full scale.
    ///
    /// # Errors
    ///
    /// - `Error::NotMono` if the waveform has more than one channel
    pub fn mono(&self) -> Result<Vec<f64>> {
        if self.n_channels() != 1 {
            return Err(Error::NotMono(self.n_channels()));
        }
        let scale = self.format.full_scale();
        Ok(self.samples.row(0).iter().map(|&s| s / scale).collect())
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    #[inline]
    pub fn n_channels(&self) -> usize {
        self.samples.nrows()
    }

    /// Number of samples per channel.
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.samples.ncols()
    }

    /// Duration in seconds: n_samples / sample_rate.
    #[inline]
    pub fn duration(&self) -> f64 {
        self.n_samples() as f64 / self.sample_rate
    }

    /// Sample period (1 / sample_rate).
    #[inline]
    pub fn dx(&self) -> f64 {
        1.0 / self.sample_rate
    }

    #[inline]
    pub fn nyquist(&self) -> f64 {
        0.5 * self.sample_rate
    }

    // ========== Analysis Methods ==========
    //
    // Convenience wrappers; each delegates to the module that implements it.

    /// Autocorrelation pitch contour. See [`crate::pitch::track_pitch`].
    pub fn to_pitch(&self, config: &PitchConfig) -> Result<PitchContour> {
        crate::pitch::track_pitch(self, config)
    }

    /// Burg formant track. See [`crate::formant::track_formants`].
    pub fn to_formants(&self, config: &FormantConfig) -> Result<FormantTrack> {
        crate::formant::track_formants(self, config)
    }

    /// Power spectrogram. See [`crate::spectrogram::spectrogram`].
    pub fn to_spectrogram(&self, config: &SpectrogramConfig) -> Result<Spectrogram> {
        crate::spectrogram::spectrogram(self, config)
    }

    /// Intensity contour in dB. See [`crate::intensity::intensity`].
    pub fn to_intensity(&self, config: &IntensityConfig) -> Result<Intensity> {
        crate::intensity::intensity(self, config)
    }
}

impl std::fmt::Display for Waveform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Waveform({} ch, {} samples, {} Hz, {:.3}s)",
            self.n_channels(),
            self.n_samples(),
            self.sample_rate,
            self.duration()
        )
    }
}
