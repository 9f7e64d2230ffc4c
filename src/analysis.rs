//! Per-recording analysis scope.
//!
//! [`VoiceAnalysis`] borrows one waveform and one [`AnalysisConfig`] and
//! computes the derived artifacts (spectrogram, pitch contour, formant track,
//! glottal pulses) at most once each, on first use. Nothing outlives the
//! scope, so separate recordings never share cached state.
//!
//! ```
//! use voicemarkers::{AnalysisConfig, JitterKind, VoiceAnalysis, Waveform};
//!
//! let waveform = Waveform::tone(150.0, 0.5, 16000.0, 0.5);
//! let analysis = VoiceAnalysis::new(&waveform, AnalysisConfig::default())?;
//! let jitter = analysis.jitter(JitterKind::Local)?;
//! assert!(jitter.summary.unwrap() < 0.01);
//! # Ok::<(), voicemarkers::Error>(())
//! ```

use std::cell::OnceCell;

use serde::Serialize;
use tracing::debug;

use crate::config::{AnalysisConfig, RelativeEnergyConfig};
use crate::error::{Error, Result};
use crate::features::{self, FeatureKind, FeatureResult};
use crate::formant::{track_formants, FormantTrack};
use crate::perturbation::{self, JitterKind, SHIMMER_WINDOWS};
use crate::pitch::{track_pitch, PitchContour};
use crate::point_process::{derive_points, PointProcess};
use crate::spectrogram::{spectrogram, Spectrogram};
use crate::waveform::Waveform;

/// Every feature for one recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceReport {
    pub duration: f64,
    pub sample_rate: f64,
    pub pitch: FeatureResult,
    /// One entry per [`JitterKind`], in [`JitterKind::ALL`] order.
    pub jitter: Vec<FeatureResult>,
    /// apq3, apq5, apq11.
    pub shimmer: Vec<FeatureResult>,
    pub alpha_ratio: FeatureResult,
    /// One entry per configured report formant.
    pub formant_energy: Vec<FeatureResult>,
    pub loudness: FeatureResult,
}

/// Lazily computed artifacts of one waveform under one configuration.
///
/// Not `Sync`: use one scope per thread.
#[derive(Debug)]
pub struct VoiceAnalysis<'a> {
    waveform: &'a Waveform,
    config: AnalysisConfig,
    spectrogram: OnceCell<Spectrogram>,
    pitch: OnceCell<PitchContour>,
    formants: OnceCell<FormantTrack>,
    points: OnceCell<PointProcess>,
}

fn cached<T>(cell: &OnceCell<T>, compute: impl FnOnce() -> Result<T>) -> Result<&T> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = compute()?;
    Ok(cell.get_or_init(|| value))
}

impl<'a> VoiceAnalysis<'a> {
    /// Open a scope after validating the configuration against the waveform.
    ///
    /// # Errors
    ///
    /// - `Error::NotMono` for multi-channel input
    /// - `Error::InvalidParameter` for an invalid sample rate or an
    ///   out-of-range configuration
    pub fn new(waveform: &'a Waveform, config: AnalysisConfig) -> Result<Self> {
        waveform.validate()?;
        if waveform.n_channels() != 1 {
            return Err(Error::NotMono(waveform.n_channels()));
        }
        config.validate()?;
        config.pitch.validate(waveform.sample_rate())?;

        Ok(Self {
            waveform,
            config,
            spectrogram: OnceCell::new(),
            pitch: OnceCell::new(),
            formants: OnceCell::new(),
            points: OnceCell::new(),
        })
    }

    #[inline]
    pub fn waveform(&self) -> &Waveform {
        self.waveform
    }

    #[inline]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn spectrogram(&self) -> Result<&Spectrogram> {
        cached(&self.spectrogram, || {
            spectrogram(self.waveform, &self.config.spectrogram)
        })
    }

    pub fn pitch_contour(&self) -> Result<&PitchContour> {
        cached(&self.pitch, || track_pitch(self.waveform, &self.config.pitch))
    }

    pub fn formants(&self) -> Result<&FormantTrack> {
        cached(&self.formants, || {
            track_formants(self.waveform, &self.config.formant)
        })
    }

    pub fn points(&self) -> Result<&PointProcess> {
        cached(&self.points, || {
            derive_points(self.waveform, self.pitch_contour()?)
        })
    }

    /// F0 series of the voiced frames with mean and trend.
    pub fn pitch(&self) -> Result<FeatureResult> {
        Ok(features::pitch_statistics(self.pitch_contour()?))
    }

    /// Jitter; the series holds the surviving period durations.
    pub fn jitter(&self, kind: JitterKind) -> Result<FeatureResult> {
        let points = self.points()?;
        let config = &self.config.perturbation;

        let (times, durations): (Vec<f64>, Vec<f64>) =
            perturbation::valid_period_runs(points, config)?
                .into_iter()
                .flatten()
                .map(|p| (p.start, p.duration))
                .unzip();
        let value = perturbation::jitter(points, kind, config)?;

        Ok(FeatureResult::with_summary(
            FeatureKind::Jitter { kind },
            times,
            durations,
            Some(value),
            self.waveform.sample_rate(),
        ))
    }

    /// Shimmer apqN; the series holds the surviving period amplitudes.
    pub fn shimmer(&self, n: usize) -> Result<FeatureResult> {
        let points = self.points()?;
        let config = &self.config.perturbation;

        let value = perturbation::shimmer_apq(points, self.waveform, n, config)?;
        let (times, amplitudes): (Vec<f64>, Vec<f64>) =
            perturbation::amplitude_runs(points, self.waveform, config)?
                .into_iter()
                .flatten()
                .map(|p| (p.period.start, p.amplitude))
                .unzip();

        Ok(FeatureResult::with_summary(
            FeatureKind::Shimmer { apq: n },
            times,
            amplitudes,
            Some(value),
            self.waveform.sample_rate(),
        ))
    }

    pub fn alpha_ratio(&self) -> Result<FeatureResult> {
        features::alpha_ratio(self.spectrogram()?, &self.config.alpha_ratio)
    }

    /// Relative energy around formant `formant` (1-based), using the
    /// configured template for everything else.
    pub fn relative_formant_energy(&self, formant: usize) -> Result<FeatureResult> {
        let config = RelativeEnergyConfig {
            formant,
            ..self.config.formant_energy.clone()
        };
        features::relative_formant_energy(
            self.spectrogram()?,
            self.formants()?,
            self.pitch_contour()?,
            &config,
        )
    }

    pub fn loudness(&self) -> Result<FeatureResult> {
        features::active_intensity(self.waveform, &self.config.loudness)
    }

    /// Compute every feature.
    pub fn report(&self) -> Result<VoiceReport> {
        debug!(
            duration = self.waveform.duration(),
            sample_rate = self.waveform.sample_rate(),
            "building voice report"
        );

        let jitter = JitterKind::ALL
            .iter()
            .map(|&kind| self.jitter(kind))
            .collect::<Result<Vec<_>>>()?;
        let shimmer = SHIMMER_WINDOWS
            .iter()
            .map(|&n| self.shimmer(n))
            .collect::<Result<Vec<_>>>()?;
        let formant_energy = self
            .config
            .report_formants
            .0
            .iter()
            .map(|&f| self.relative_formant_energy(f))
            .collect::<Result<Vec<_>>>()?;

        Ok(VoiceReport {
            duration: self.waveform.duration(),
            sample_rate: self.waveform.sample_rate(),
            pitch: self.pitch()?,
            jitter,
            shimmer,
            alpha_ratio: self.alpha_ratio()?,
            formant_energy,
            loudness: self.loudness()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::SampleFormat;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_new_rejects_invalid_sample_rate() {
        let waveform = Waveform::from_slice(&[0.0; 1600], f64::NAN);
        assert!(matches!(
            VoiceAnalysis::new(&waveform, AnalysisConfig::default()),
            Err(Error::InvalidParameter(_))
        ));
        let waveform = Waveform::from_slice(&[0.0; 1600], 0.0);
        assert!(VoiceAnalysis::new(&waveform, AnalysisConfig::default()).is_err());
    }

    #[test]
    fn test_artifacts_are_computed_once() {
        let waveform = Waveform::tone(150.0, 0.4, 16000.0, 0.5);
        let analysis = VoiceAnalysis::new(&waveform, AnalysisConfig::default()).unwrap();

        let first = analysis.pitch_contour().unwrap();
        let second = analysis.pitch_contour().unwrap();
        assert!(std::ptr::eq(first, second));

        let spec = analysis.spectrogram().unwrap();
        assert!(std::ptr::eq(spec, analysis.spectrogram().unwrap()));
    }

    #[test]
    fn test_tone_report() {
        let waveform = Waveform::tone(150.0, 0.6, 16000.0, 0.5);
        let analysis = VoiceAnalysis::new(&waveform, AnalysisConfig::default()).unwrap();
        let report = analysis.report().unwrap();

        assert_relative_eq!(report.pitch.summary.unwrap(), 150.0, epsilon = 1.5);
        assert_eq!(report.jitter.len(), 5);
        assert_eq!(report.shimmer.len(), 3);
        assert_eq!(report.formant_energy.len(), 3);

        let local = &report.jitter[0];
        assert_eq!(local.feature, FeatureKind::Jitter { kind: JitterKind::Local });
        assert!(local.summary.unwrap() < 0.002);
        for &d in &local.values {
            assert_relative_eq!(d, 1.0 / 150.0, epsilon = 1e-4);
        }

        assert!(report.shimmer[1].summary.unwrap() < 0.01);
        assert!(report.alpha_ratio.summary.unwrap() > 0.0);
        assert_relative_eq!(report.loudness.summary.unwrap(), 84.95, epsilon = 0.1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["jitter"][4]["feature"]["kind"], "ddp");
    }

    #[test]
    fn test_silence_report_is_undefined_not_an_error() {
        let waveform = Waveform::silence(0.5, 16000.0);
        let analysis = VoiceAnalysis::new(&waveform, AnalysisConfig::default()).unwrap();
        let report = analysis.report().unwrap();

        assert_eq!(report.pitch.summary, None);
        assert!(report.jitter.iter().all(|j| j.summary.is_none()));
        assert!(report.shimmer.iter().all(|s| s.summary.is_none()));
        assert!(report.alpha_ratio.is_empty());
        assert!(report.formant_energy.iter().all(FeatureResult::is_empty));
        assert!(report.loudness.is_empty());
    }

    #[test]
    fn test_rejects_stereo() {
        let stereo = Waveform::from_channels(
            Array2::zeros((2, 1600)),
            16000.0,
            SampleFormat::Float,
        )
        .unwrap();
        assert!(matches!(
            VoiceAnalysis::new(&stereo, AnalysisConfig::default()),
            Err(Error::NotMono(2))
        ));
    }

    #[test]
    fn test_rejects_unsupported_shimmer_window() {
        let waveform = Waveform::tone(150.0, 0.3, 16000.0, 0.5);
        let analysis = VoiceAnalysis::new(&waveform, AnalysisConfig::default()).unwrap();
        assert!(matches!(analysis.shimmer(7), Err(Error::InvalidParameter(_))));
    }
}
