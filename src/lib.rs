//! # voicemarkers
//!
//! Acoustic voice-quality markers computed from one recording at a time.
//!
//! The library derives a small set of clinically used voice features from a
//! decoded waveform. Every feature is computed from analyses implemented in
//! this crate (autocorrelation pitch, Burg LPC formants, STFT spectrograms,
//! intensity contours and glottal pulse trains), so no external acoustic
//! engine is needed.
//!
//! # Supported Features
//!
//! - **Pitch**: F0 series of the voiced frames, with mean and linear trend
//! - **Jitter**: local, local absolute, rap, ppq5 and ddp period perturbation
//! - **Shimmer**: apq3, apq5 and apq11 amplitude perturbation
//! - **Alpha ratio**: per-frame energy ratio of the low band (50–1000 Hz) to the
//!   high band (1000–5000 Hz), log10
//! - **Relative formant energy**: energy around F_n relative to the frame's total energy
//! - **Loudness**: intensity contour restricted to active (above-threshold) frames
//!
//! Supporting steps: DC removal and zero-phase high-pass filtering
//! ([`preprocess`]), and noise removal behind the [`Denoiser`] trait.
//!
//! # Quick Start
//!
//! ```
//! use voicemarkers::{AnalysisConfig, VoiceAnalysis, Waveform};
//!
//! // Decoded samples come from the caller; here a synthetic vowel stand-in
//! let waveform = Waveform::tone(140.0, 0.5, 16000.0, 0.5);
//!
//! let analysis = VoiceAnalysis::new(&waveform, AnalysisConfig::default())?;
//! let report = analysis.report()?;
//!
//! // Mean F0 of the voiced frames
//! assert!((report.pitch.summary.unwrap() - 140.0).abs() < 2.0);
//! # Ok::<(), voicemarkers::Error>(())
//! ```
//!
//! # Module Organization
//!
//! Each analysis has its own module containing:
//! - A result struct (e.g., `PitchContour`, `FormantTrack`)
//! - A computing function (e.g., `track_pitch`, `track_formants`)
//! - Supporting types and helper functions
//!
//! Time-indexed results share [`TimeGrid`], so a frame of one analysis can be
//! looked up in another by time. [`VoiceAnalysis`] caches the shared artifacts
//! of one recording and assembles the [`FeatureResult`]s.
//!
//! # Conventions
//!
//! Perturbation measures that lack enough periods are `NaN`; series features
//! with no valid frames have `summary: None`. Neither is an error.

pub mod analysis;
pub mod config;
pub mod denoise;
pub mod error;
pub mod features;
pub mod formant;
pub mod intensity;
pub mod perturbation;
pub mod pitch;
pub mod point_process;
pub mod preprocess;
pub mod spectrogram;
pub mod timegrid;
pub mod waveform;

mod window;

// Re-export main types at crate root for convenient access
//
//   use voicemarkers::{Waveform, VoiceAnalysis, AnalysisConfig};
//
// Less common types stay in their modules:
//   use voicemarkers::preprocess::Butterworth;

/// Error types for voicemarkers operations.
pub use error::{Error, Result};

/// Waveform container and sample format.
pub use waveform::{SampleFormat, Waveform};

/// Configuration records, one per analysis.
pub use config::{
    AlphaRatioConfig, AnalysisConfig, DenoiseConfig, FormantConfig, IntensityConfig,
    LoudnessConfig, PerturbationConfig, PitchConfig, PreprocessConfig, RelativeEnergyConfig,
    SpectrogramConfig,
};

/// Frame timing shared by every contour.
pub use timegrid::{Interpolation, TimeGrid};

/// Pitch (F0) analysis types and functions.
///
/// - `PitchContour`: Result of pitch analysis
/// - `PitchFrame`: Single frame with candidates
/// - `track_pitch`: Compute pitch using the autocorrelation method
pub use pitch::{track_pitch, PitchCandidate, PitchContour, PitchFrame};

/// Formant analysis types and functions.
pub use formant::{track_formants, FormantFrame, FormantPoint, FormantTrack};

/// Intensity contour and its dB reference.
pub use intensity::{intensity, Intensity, INTENSITY_REFERENCE_PA2};

/// Spectrogram types and functions.
pub use spectrogram::{spectrogram, FrequencyBand, Spectrogram, WindowShape};

/// Glottal pulses.
pub use point_process::{derive_points, PointProcess};

/// Jitter and shimmer.
pub use perturbation::{jitter, shimmer_apq, JitterKind, SHIMMER_WINDOWS};

/// Feature results and the per-recording analysis scope.
pub use analysis::{VoiceAnalysis, VoiceReport};
pub use features::{FeatureKind, FeatureResult, LinearTrend};

/// Noise removal.
pub use denoise::{Denoiser, NoiseRegion, SpectralSubtraction};

/// Preprocessing entry point.
pub use preprocess::preprocess;
