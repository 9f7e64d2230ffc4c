//! Configuration records for every analysis.
//!
//! Each record implements `Default` with the parameters the voice-feature
//! pipeline has always used (Praat's defaults where Praat defines one), and
//! derives serde so that a caller can keep them in a JSON/TOML file. Missing
//! fields fall back to their defaults.
//!
//! Records are validated by the function that consumes them, before any frame
//! is analysed, so a bad configuration never produces a partial result.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::spectrogram::{FrequencyBand, WindowShape};

fn require_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "{} must be a positive finite number, got {}",
            name, value
        )))
    }
}

fn require_non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "{} must be a non-negative finite number, got {}",
            name, value
        )))
    }
}

fn require_band(name: &str, band: &FrequencyBand) -> Result<()> {
    if band.low.is_finite() && band.high.is_finite() && band.low >= 0.0 && band.low < band.high {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "{} must satisfy 0 <= low < high, got [{}, {}]",
            name, band.low, band.high
        )))
    }
}

/// Demean and high-pass settings applied before analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Subtract each channel's mean.
    pub demean: bool,
    /// High-pass cutoff in Hz, or `None` to skip filtering.
    pub highpass_cutoff_hz: Option<f64>,
    /// Butterworth order of the high-pass filter.
    pub highpass_order: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            demean: true,
            highpass_cutoff_hz: Some(80.0),
            highpass_order: 5,
        }
    }
}

impl PreprocessConfig {
    /// Check ranges that do not depend on the waveform.
    ///
    /// The Nyquist bound on the cutoff is checked by `preprocess::highpass`.
    pub fn validate(&self) -> Result<()> {
        if let Some(cutoff) = self.highpass_cutoff_hz {
            require_positive("highpass_cutoff_hz", cutoff)?;
            if self.highpass_order == 0 {
                return Err(Error::InvalidParameter(
                    "highpass_order must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Short-time spectrum settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    /// Effective window length in seconds (the Gaussian window is twice as long).
    pub window_length: f64,
    /// Distance between frame centres in seconds.
    pub time_step: f64,
    /// Highest frequency kept in the grid, in Hz.
    pub max_frequency: f64,
    /// Requested frequency resolution in Hz; the FFT may resolve finer.
    pub frequency_step: f64,
    pub window_shape: WindowShape,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            window_length: 0.025,
            time_step: 0.01,
            max_frequency: 5000.0,
            frequency_step: 20.0,
            window_shape: WindowShape::Gaussian,
        }
    }
}

impl SpectrogramConfig {
    pub fn validate(&self) -> Result<()> {
        require_positive("window_length", self.window_length)?;
        require_positive("time_step", self.time_step)?;
        require_positive("max_frequency", self.max_frequency)?;
        require_positive("frequency_step", self.frequency_step)
    }
}

/// Autocorrelation pitch tracker settings.
///
/// The engine constants (`voicing_threshold` onwards) are Praat's defaults
/// for "To Pitch (ac)".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    /// Frame spacing in seconds; 0 selects 0.75 / floor.
    pub time_step: f64,
    pub floor: f64,
    pub ceiling: f64,
    /// Minimum normalised autocorrelation for a frame to be voiced.
    pub voicing_threshold: f64,
    /// Frames whose peak falls below this fraction of the global peak are silent.
    pub silence_threshold: f64,
    /// Preference for higher candidates, per octave.
    pub octave_cost: f64,
    pub octave_jump_cost: f64,
    pub voiced_unvoiced_cost: f64,
    /// Window length in periods of the floor.
    pub periods_per_window: f64,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            time_step: 0.01,
            floor: 75.0,
            ceiling: 500.0,
            voicing_threshold: 0.45,
            silence_threshold: 0.03,
            octave_cost: 0.01,
            octave_jump_cost: 0.35,
            voiced_unvoiced_cost: 0.14,
            periods_per_window: 3.0,
        }
    }
}

impl PitchConfig {
    /// Validate against the sample rate the tracker will run at.
    pub fn validate(&self, sample_rate: f64) -> Result<()> {
        require_non_negative("time_step", self.time_step)?;
        require_positive("floor", self.floor)?;
        require_positive("ceiling", self.ceiling)?;
        if self.ceiling <= self.floor {
            return Err(Error::InvalidParameter(format!(
                "pitch ceiling ({} Hz) must exceed the floor ({} Hz)",
                self.ceiling, self.floor
            )));
        }
        if self.ceiling > 0.5 * sample_rate {
            return Err(Error::InvalidParameter(format!(
                "pitch ceiling ({} Hz) exceeds the Nyquist frequency ({} Hz)",
                self.ceiling,
                0.5 * sample_rate
            )));
        }
        require_non_negative("voicing_threshold", self.voicing_threshold)?;
        require_non_negative("silence_threshold", self.silence_threshold)?;
        require_non_negative("octave_cost", self.octave_cost)?;
        require_non_negative("octave_jump_cost", self.octave_jump_cost)?;
        require_non_negative("voiced_unvoiced_cost", self.voiced_unvoiced_cost)?;
        require_positive("periods_per_window", self.periods_per_window)
    }
}

/// Burg formant tracker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormantConfig {
    /// Frame spacing in seconds; 0 selects a quarter of `window_length`.
    pub time_step: f64,
    pub max_formants: usize,
    /// Ceiling of the formant search; the signal is resampled to twice this.
    pub max_formant_hz: f64,
    /// Effective window length in seconds (the Gaussian window is twice as long).
    pub window_length: f64,
    /// Pre-emphasis corner frequency in Hz.
    pub pre_emphasis_from: f64,
}

impl Default for FormantConfig {
    fn default() -> Self {
        Self {
            time_step: 0.01,
            max_formants: 5,
            max_formant_hz: 5500.0,
            window_length: 0.025,
            pre_emphasis_from: 50.0,
        }
    }
}

impl FormantConfig {
    pub fn validate(&self) -> Result<()> {
        require_non_negative("time_step", self.time_step)?;
        if self.max_formants == 0 {
            return Err(Error::InvalidParameter(
                "max_formants must be at least 1".to_string(),
            ));
        }
        // The [50, max - 50] Hz acceptance band must be non-empty.
        if !(self.max_formant_hz.is_finite() && self.max_formant_hz > 100.0) {
            return Err(Error::InvalidParameter(format!(
                "max_formant_hz must exceed 100 Hz, got {}",
                self.max_formant_hz
            )));
        }
        require_positive("window_length", self.window_length)?;
        require_non_negative("pre_emphasis_from", self.pre_emphasis_from)
    }
}

/// Intensity contour settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntensityConfig {
    /// Lowest pitch expected; sets the window to 7.2 / min_pitch seconds.
    pub min_pitch: f64,
    /// Frame spacing in seconds; 0 selects 0.8 / min_pitch.
    pub time_step: f64,
    /// Remove each frame's mean before measuring energy.
    pub subtract_mean: bool,
}

impl Default for IntensityConfig {
    fn default() -> Self {
        Self {
            min_pitch: 75.0,
            time_step: 0.01,
            subtract_mean: true,
        }
    }
}

impl IntensityConfig {
    pub fn validate(&self) -> Result<()> {
        require_positive("min_pitch", self.min_pitch)?;
        require_non_negative("time_step", self.time_step)
    }
}

/// Active-frame loudness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoudnessConfig {
    pub intensity: IntensityConfig,
    /// Frames at or above this level (dB) count as active.
    pub activity_threshold_db: f64,
}

impl Default for LoudnessConfig {
    fn default() -> Self {
        Self {
            intensity: IntensityConfig::default(),
            activity_threshold_db: 40.0,
        }
    }
}

impl LoudnessConfig {
    pub fn validate(&self) -> Result<()> {
        self.intensity.validate()?;
        if self.activity_threshold_db.is_nan() {
            return Err(Error::InvalidParameter(
                "activity_threshold_db must not be NaN".to_string(),
            ));
        }
        Ok(())
    }
}

/// Period and amplitude constraints shared by jitter and shimmer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerturbationConfig {
    /// Start of the measured span in seconds.
    pub from_time: f64,
    /// End of the measured span; equal to `from_time` means the whole recording.
    pub to_time: f64,
    /// Shortest period accepted, in seconds.
    pub period_floor: f64,
    /// Longest period accepted, in seconds.
    pub period_ceiling: f64,
    /// Largest ratio between consecutive periods.
    pub max_period_factor: f64,
    /// Largest ratio between consecutive period amplitudes (shimmer only).
    pub max_amplitude_factor: f64,
}

impl Default for PerturbationConfig {
    fn default() -> Self {
        Self {
            from_time: 0.0,
            to_time: 0.0,
            period_floor: 0.0001,
            period_ceiling: 0.02,
            max_period_factor: 1.3,
            max_amplitude_factor: 1.6,
        }
    }
}

impl PerturbationConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.from_time.is_finite() || !self.to_time.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "time range must be finite, got [{}, {})",
                self.from_time, self.to_time
            )));
        }
        if self.to_time < self.from_time {
            return Err(Error::InvalidParameter(format!(
                "to_time ({}) precedes from_time ({})",
                self.to_time, self.from_time
            )));
        }
        require_non_negative("period_floor", self.period_floor)?;
        require_positive("period_ceiling", self.period_ceiling)?;
        if self.period_ceiling <= self.period_floor {
            return Err(Error::InvalidParameter(format!(
                "period_ceiling ({}) must exceed period_floor ({})",
                self.period_ceiling, self.period_floor
            )));
        }
        if !(self.max_period_factor.is_finite() && self.max_period_factor >= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "max_period_factor must be at least 1, got {}",
                self.max_period_factor
            )));
        }
        if !(self.max_amplitude_factor.is_finite() && self.max_amplitude_factor >= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "max_amplitude_factor must be at least 1, got {}",
                self.max_amplitude_factor
            )));
        }
        Ok(())
    }

    /// The half-open span `[from, to)` that pulses must fall in.
    pub fn span(&self) -> (f64, f64) {
        if self.from_time == self.to_time {
            (f64::NEG_INFINITY, f64::INFINITY)
        } else {
            (self.from_time, self.to_time)
        }
    }
}

/// Alpha ratio bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlphaRatioConfig {
    pub low_band: FrequencyBand,
    pub high_band: FrequencyBand,
}

impl Default for AlphaRatioConfig {
    fn default() -> Self {
        Self {
            low_band: FrequencyBand::half_open(50.0, 1000.0),
            high_band: FrequencyBand::closed(1000.0, 5000.0),
        }
    }
}

impl AlphaRatioConfig {
    pub fn validate(&self) -> Result<()> {
        require_band("low_band", &self.low_band)?;
        require_band("high_band", &self.high_band)
    }
}

/// Relative formant energy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelativeEnergyConfig {
    /// Formant number, 1-based (1 = F1).
    pub formant: usize,
    /// Width of the band around the formant in Hz; `None` uses
    /// [`default_formant_bandwidth`].
    pub bandwidth_hz: Option<f64>,
    /// Formants above this frequency are not measured.
    pub max_frequency: f64,
    /// Report `10·log10` of the ratio instead of the ratio.
    pub as_db: bool,
}

impl Default for RelativeEnergyConfig {
    fn default() -> Self {
        Self {
            formant: 3,
            bandwidth_hz: None,
            max_frequency: 5000.0,
            as_db: true,
        }
    }
}

impl RelativeEnergyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.formant == 0 {
            return Err(Error::InvalidParameter(
                "formant numbers start at 1".to_string(),
            ));
        }
        if let Some(bw) = self.bandwidth_hz {
            require_positive("bandwidth_hz", bw)?;
        }
        require_positive("max_frequency", self.max_frequency)
    }

    /// Bandwidth in Hz, resolving the per-formant default.
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth_hz
            .unwrap_or_else(|| default_formant_bandwidth(self.formant))
    }
}

/// Band widths (Hz) used around F1..F4 when none is configured; 100 Hz otherwise.
pub fn default_formant_bandwidth(formant: usize) -> f64 {
    match formant {
        1 => 60.0,
        2 => 90.0,
        3 => 150.0,
        4 => 200.0,
        _ => 100.0,
    }
}

/// Spectral subtraction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    /// Analysis frame length in seconds.
    pub window_length: f64,
    /// Subtraction is applied to bins in `[filter_low_hz, filter_high_hz]` only.
    pub filter_low_hz: f64,
    pub filter_high_hz: f64,
    /// Width of the moving average applied to the noise spectrum, in Hz.
    pub smoothing_hz: f64,
    /// Length of the span chosen when the noise region is auto-selected.
    pub auto_noise_duration: f64,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            window_length: 0.025,
            filter_low_hz: 0.0,
            filter_high_hz: 20000.0,
            smoothing_hz: 40.0,
            auto_noise_duration: 0.25,
        }
    }
}

impl DenoiseConfig {
    pub fn validate(&self) -> Result<()> {
        require_positive("window_length", self.window_length)?;
        require_non_negative("filter_low_hz", self.filter_low_hz)?;
        require_positive("filter_high_hz", self.filter_high_hz)?;
        if self.filter_high_hz <= self.filter_low_hz {
            return Err(Error::InvalidParameter(format!(
                "filter_high_hz ({}) must exceed filter_low_hz ({})",
                self.filter_high_hz, self.filter_low_hz
            )));
        }
        require_non_negative("smoothing_hz", self.smoothing_hz)?;
        require_positive("auto_noise_duration", self.auto_noise_duration)
    }
}

/// Everything a full [`VoiceAnalysis`](crate::analysis::VoiceAnalysis) needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub pitch: PitchConfig,
    pub spectrogram: SpectrogramConfig,
    pub formant: FormantConfig,
    pub perturbation: PerturbationConfig,
    pub alpha_ratio: AlphaRatioConfig,
    pub loudness: LoudnessConfig,
    /// Template for relative formant energy; `formant` is overridden per call.
    pub formant_energy: RelativeEnergyConfig,
    /// Formants reported by `VoiceAnalysis::report`.
    pub report_formants: ReportFormants,
}

/// Formant numbers included in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportFormants(pub Vec<usize>);

impl Default for ReportFormants {
    fn default() -> Self {
        Self(vec![1, 2, 3])
    }
}

impl AnalysisConfig {
    /// Validate every record that does not depend on the sample rate.
    pub fn validate(&self) -> Result<()> {
        self.spectrogram.validate()?;
        self.formant.validate()?;
        self.perturbation.validate()?;
        self.alpha_ratio.validate()?;
        self.loudness.validate()?;
        self.formant_energy.validate()?;
        if self.report_formants.0.iter().any(|&f| f == 0) {
            return Err(Error::InvalidParameter(
                "report_formants: formant numbers start at 1".to_string(),
            ));
        }
        Ok(())
    }
}
