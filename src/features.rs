//! Band-energy, loudness and pitch summary features.
//!
//! Every feature produces a [`FeatureResult`]: the per-frame series that
//! qualified plus a summary value. Frames that cannot be measured (unvoiced,
//! zero energy, formant missing) are left out of the series rather than
//! failing the call. When no frame qualifies the series is empty, the summary
//! is `None`, and a `warn!` event names the feature.

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{AlphaRatioConfig, LoudnessConfig, RelativeEnergyConfig};
use crate::error::Result;
use crate::formant::FormantTrack;
use crate::intensity::intensity;
use crate::perturbation::JitterKind;
use crate::pitch::PitchContour;
use crate::spectrogram::{FrequencyBand, Spectrogram};
use crate::waveform::Waveform;

/// Which feature a [`FeatureResult`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum FeatureKind {
    Pitch,
    Jitter { kind: JitterKind },
    Shimmer { apq: usize },
    AlphaRatio,
    RelativeFormantEnergy { formant: usize },
    Loudness,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKind::Pitch => write!(f, "pitch"),
            FeatureKind::Jitter { kind } => write!(f, "jitter ({})", kind),
            FeatureKind::Shimmer { apq } => write!(f, "shimmer (apq{})", apq),
            FeatureKind::AlphaRatio => write!(f, "alpha ratio"),
            FeatureKind::RelativeFormantEnergy { formant } => {
                write!(f, "relative F{} energy", formant)
            }
            FeatureKind::Loudness => write!(f, "loudness"),
        }
    }
}

/// Least-squares line `value = slope · time + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearTrend {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearTrend {
    /// Fit a line; `None` for fewer than two points or constant `x`.
    pub fn fit(x: &[f64], y: &[f64]) -> Option<Self> {
        let n = x.len().min(y.len());
        if n < 2 {
            return None;
        }
        let mean_x = x[..n].iter().sum::<f64>() / n as f64;
        let mean_y = y[..n].iter().sum::<f64>() / n as f64;

        let (mut sxx, mut sxy) = (0.0, 0.0);
        for (&xi, &yi) in x[..n].iter().zip(&y[..n]) {
            sxx += (xi - mean_x) * (xi - mean_x);
            sxy += (xi - mean_x) * (yi - mean_y);
        }
        if sxx <= 0.0 {
            return None;
        }

        let slope = sxy / sxx;
        Some(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }
}

/// A feature's per-frame series and its summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureResult {
    pub feature: FeatureKind,
    pub times: Vec<f64>,
    pub values: Vec<f64>,
    /// Mean of `values`, or the perturbation quotient; `None` when undefined.
    pub summary: Option<f64>,
    pub trend: Option<LinearTrend>,
    pub sample_rate: f64,
}

impl FeatureResult {
    /// Series whose summary is its mean.
    pub fn series(
        feature: FeatureKind,
        times: Vec<f64>,
        values: Vec<f64>,
        sample_rate: f64,
    ) -> Self {
        let summary = if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        };
        Self::with_summary(feature, times, values, summary, sample_rate)
    }

    /// Series with an externally computed summary; a NaN summary becomes `None`.
    pub fn with_summary(
        feature: FeatureKind,
        times: Vec<f64>,
        values: Vec<f64>,
        summary: Option<f64>,
        sample_rate: f64,
    ) -> Self {
        let summary = summary.filter(|s| !s.is_nan());
        if summary.is_none() {
            warn!(feature = %feature, "no frames qualified, feature undefined");
        } else {
            debug!(feature = %feature, frames = values.len(), "feature computed");
        }
        Self {
            feature,
            times,
            values,
            summary,
            trend: None,
            sample_rate,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// Alpha ratio: per-frame `log10(E_low / E_high)`.
///
/// A frame with low-band energy but an empty high band reads
/// `f64::INFINITY`, which serialises as JSON `null`. Frames with no
/// low-band energy are excluded.
///
/// # Errors
///
/// `Error::InvalidParameter` for an empty or inverted band.
pub fn alpha_ratio(spectrogram: &Spectrogram, config: &AlphaRatioConfig) -> Result<FeatureResult> {
    config.validate()?;

    let mut times = Vec::new();
    let mut values = Vec::new();
    for frame in 0..spectrogram.n_times() {
        let low = spectrogram.band_energy_in(&config.low_band, frame);
        let high = spectrogram.band_energy_in(&config.high_band, frame);
        if low <= 0.0 {
            continue;
        }
        times.push(spectrogram.time(frame));
        values.push(if high > 0.0 {
            (low / high).log10()
        } else {
            f64::INFINITY
        });
    }

    Ok(FeatureResult::series(
        FeatureKind::AlphaRatio,
        times,
        values,
        spectrogram.sample_rate(),
    ))
}

/// Energy in a band around formant `config.formant`, relative to the frame total.
///
/// A spectrogram frame is measured when the pitch is defined at its time
/// and the formant lies in `[0, max_frequency]`. The band is the closed
/// interval of `config.bandwidth()` Hz centred on the formant.
///
/// # Errors
///
/// `Error::InvalidParameter` for formant 0 or a non-positive bandwidth or ceiling.
pub fn relative_formant_energy(
    spectrogram: &Spectrogram,
    formants: &FormantTrack,
    pitch: &PitchContour,
    config: &RelativeEnergyConfig,
) -> Result<FeatureResult> {
    config.validate()?;
    let bandwidth = config.bandwidth();

    let mut times = Vec::new();
    let mut values = Vec::new();
    for frame in 0..spectrogram.n_times() {
        let t = spectrogram.time(frame);
        if pitch.value_at(t).is_none() {
            continue;
        }
        let Some(frequency) = formants.value_at(config.formant, t) else {
            continue;
        };
        if !(0.0..=config.max_frequency).contains(&frequency) {
            continue;
        }

        let total = spectrogram.total_energy(frame);
        if total <= 0.0 {
            continue;
        }
        let band = spectrogram.band_energy_in(&FrequencyBand::around(frequency, bandwidth), frame);
        let ratio = band / total;

        let value = if config.as_db {
            if band <= 0.0 {
                continue;
            }
            10.0 * ratio.log10()
        } else {
            ratio
        };
        times.push(t);
        values.push(value);
    }

    Ok(FeatureResult::series(
        FeatureKind::RelativeFormantEnergy {
            formant: config.formant,
        },
        times,
        values,
        spectrogram.sample_rate(),
    ))
}

/// Intensity (dB) of the frames at or above the activity threshold.
///
/// Each frame measures a window of 7.2 / `min_pitch` seconds, so frames
/// centred up to half a window before an onset, or after an offset, can
/// reach the threshold and count as active.
///
/// # Errors
///
/// - `Error::InvalidParameter` for a bad intensity configuration or NaN threshold
/// - `Error::NotMono` for multi-channel input
pub fn active_intensity(waveform: &Waveform, config: &LoudnessConfig) -> Result<FeatureResult> {
    config.validate()?;
    let contour = intensity(waveform, &config.intensity)?;

    let (times, values): (Vec<f64>, Vec<f64>) = contour
        .grid()
        .times()
        .into_iter()
        .zip(contour.values().iter().copied())
        .filter(|&(_, db)| db.is_finite() && db >= config.activity_threshold_db)
        .unzip();

    Ok(FeatureResult::series(
        FeatureKind::Loudness,
        times,
        values,
        waveform.sample_rate(),
    ))
}

/// F0 of the voiced frames, with their mean and least-squares trend.
pub fn pitch_statistics(contour: &PitchContour) -> FeatureResult {
    let (times, values): (Vec<f64>, Vec<f64>) = contour.voiced_points().into_iter().unzip();
    let trend = LinearTrend::fit(&times, &values);

    let mut result = FeatureResult::series(FeatureKind::Pitch, times, values, contour.sample_rate());
    result.trend = trend;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IntensityConfig, SpectrogramConfig};
    use crate::formant::{FormantFrame, FormantPoint};
    use crate::timegrid::TimeGrid;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    /// 3 frames, bins every 100 Hz up to 2000 Hz.
    fn flat_spectrogram(power: f64) -> Spectrogram {
        Spectrogram::new(
            Array2::from_elem((21, 3), power),
            TimeGrid::new(0.1, 0.01, 3),
            100.0,
            2000.0,
            16000.0,
        )
    }

    #[test]
    fn test_linear_trend() {
        let trend = LinearTrend::fit(&[0.0, 1.0, 2.0], &[1.0, 3.0, 5.0]).unwrap();
        assert_relative_eq!(trend.slope, 2.0, epsilon = 1e-12);
        assert_relative_eq!(trend.intercept, 1.0, epsilon = 1e-12);

        assert!(LinearTrend::fit(&[1.0], &[1.0]).is_none());
        assert!(LinearTrend::fit(&[1.0, 1.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_alpha_ratio_flat_spectrum() {
        let spec = flat_spectrogram(1.0);
        let config = AlphaRatioConfig {
            low_band: FrequencyBand::half_open(0.0, 1000.0),
            high_band: FrequencyBand::closed(1000.0, 2000.0),
        };
        let result = alpha_ratio(&spec, &config).unwrap();

        // 10 bins below 1000 Hz, 11 bins in [1000, 2000]
        assert_eq!(result.len(), 3);
        assert_relative_eq!(result.summary.unwrap(), (10.0f64 / 11.0).log10(), epsilon = 1e-12);
        assert_relative_eq!(result.times[2], 0.12, epsilon = 1e-12);
    }

    #[test]
    fn test_alpha_ratio_excludes_silent_frames() {
        let mut values = Array2::from_elem((21, 3), 1.0);
        for bin in 0..10 {
            values[[bin, 1]] = 0.0;
        }
        let spec = Spectrogram::new(values, TimeGrid::new(0.1, 0.01, 3), 100.0, 2000.0, 16000.0);
        let result = alpha_ratio(&spec, &AlphaRatioConfig::default()).unwrap();
        assert_eq!(result.len(), 2);
        assert_relative_eq!(result.times[1], 0.12, epsilon = 1e-12);

        let silent = flat_spectrogram(0.0);
        let result = alpha_ratio(&silent, &AlphaRatioConfig::default()).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.summary, None);
    }

    #[test]
    fn test_alpha_ratio_empty_high_band_is_infinite() {
        // Energy only in bins 1-9 (100-900 Hz)
        let mut values = Array2::zeros((21, 3));
        for bin in 1..10 {
            for frame in 0..3 {
                values[[bin, frame]] = 1.0;
            }
        }
        let spec = Spectrogram::new(values, TimeGrid::new(0.1, 0.01, 3), 100.0, 2000.0, 16000.0);
        let result = alpha_ratio(&spec, &AlphaRatioConfig::default()).unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.values.iter().all(|&v| v == f64::INFINITY));
        assert_eq!(result.summary, Some(f64::INFINITY));
    }

    #[test]
    fn test_alpha_ratio_of_low_tone_is_positive() {
        let waveform = Waveform::tone(300.0, 0.5, 16000.0, 0.5);
        let spec = waveform.to_spectrogram(&SpectrogramConfig::default()).unwrap();
        let result = alpha_ratio(&spec, &AlphaRatioConfig::default()).unwrap();
        assert!(!result.is_empty());
        assert!(result.summary.unwrap() > 3.0);
    }

    fn formant_track(f: f64) -> FormantTrack {
        let frames = (0..3)
            .map(|i| FormantFrame::new(0.1 + 0.01 * i as f64, vec![FormantPoint::new(f, 80.0)]))
            .collect();
        FormantTrack::new(frames, 0.01, 5500.0, 5)
    }

    #[test]
    fn test_relative_formant_energy() {
        let spec = flat_spectrogram(1.0);
        let formants = formant_track(500.0);
        let pitch = PitchContour::from_values(0.1, 0.01, &[120.0, 120.0, 0.0], 75.0, 500.0);

        let config = RelativeEnergyConfig {
            formant: 1,
            bandwidth_hz: Some(200.0),
            max_frequency: 5000.0,
            as_db: false,
        };
        let result = relative_formant_energy(&spec, &formants, &pitch, &config).unwrap();

        // The third frame is unvoiced
        assert_eq!(result.len(), 2);
        assert_relative_eq!(result.times[1], 0.11, epsilon = 1e-12);
        // Bins 400, 500, 600 Hz out of 21
        assert_relative_eq!(result.values[0], 3.0 / 21.0, epsilon = 1e-12);

        let db = relative_formant_energy(
            &spec,
            &formants,
            &pitch,
            &RelativeEnergyConfig {
                as_db: true,
                ..config
            },
        )
        .unwrap();
        assert_relative_eq!(db.values[0], 10.0 * (3.0f64 / 21.0).log10(), epsilon = 1e-12);
    }

    #[test]
    fn test_relative_formant_energy_skips_missing_formant() {
        let spec = flat_spectrogram(1.0);
        let formants = formant_track(500.0);
        let pitch = PitchContour::from_values(0.1, 0.01, &[120.0; 3], 75.0, 500.0);

        let config = RelativeEnergyConfig {
            formant: 2,
            ..RelativeEnergyConfig::default()
        };
        let result = relative_formant_energy(&spec, &formants, &pitch, &config).unwrap();
        assert!(result.is_empty());

        let low_ceiling = RelativeEnergyConfig {
            formant: 1,
            max_frequency: 400.0,
            ..RelativeEnergyConfig::default()
        };
        let result = relative_formant_energy(&spec, &formants, &pitch, &low_ceiling).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_active_intensity_threshold() {
        let waveform = Waveform::tone(200.0, 0.5, 16000.0, 0.5);

        let quiet = LoudnessConfig {
            intensity: IntensityConfig::default(),
            activity_threshold_db: 40.0,
        };
        let result = active_intensity(&waveform, &quiet).unwrap();
        assert!(!result.is_empty());
        assert_relative_eq!(result.summary.unwrap(), 84.95, epsilon = 0.05);

        let loud = LoudnessConfig {
            activity_threshold_db: 100.0,
            ..quiet
        };
        assert!(active_intensity(&waveform, &loud).unwrap().is_empty());
    }

    #[test]
    fn test_pitch_statistics() {
        let contour =
            PitchContour::from_values(0.1, 0.01, &[100.0, 0.0, 120.0, 130.0], 75.0, 500.0);
        let result = pitch_statistics(&contour);

        assert_eq!(result.len(), 3);
        assert_relative_eq!(result.summary.unwrap(), 350.0 / 3.0, epsilon = 1e-9);
        assert!(result.trend.unwrap().slope > 0.0);

        let silent = PitchContour::from_values(0.1, 0.01, &[0.0; 4], 75.0, 500.0);
        let result = pitch_statistics(&silent);
        assert!(result.is_empty());
        assert_eq!(result.summary, None);
        assert_eq!(result.trend, None);
    }

    #[test]
    fn test_feature_result_serializes() {
        let result = FeatureResult::series(
            FeatureKind::Jitter {
                kind: JitterKind::Local,
            },
            vec![0.1],
            vec![0.01],
            16000.0,
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["feature"]["name"], "jitter");
        assert_eq!(json["feature"]["kind"], "local");
        assert_eq!(json["summary"], 0.01);
    }
}
