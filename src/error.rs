//! Error types for voicemarkers.
//!
//! Only structurally invalid requests are errors. Data that is merely too
//! short or too quiet to measure is not: perturbation metrics report `NaN`,
//! series features report an empty series with no summary, and frames with
//! zero energy are left out of the series they would have contributed to.

use thiserror::Error;

/// Result type alias using voicemarkers' Error type.
///
/// # Example
///
/// ```
/// use voicemarkers::{PitchConfig, Result, Waveform};
///
/// fn mean_f0(waveform: &Waveform) -> Result<Option<f64>> {
///     let contour = waveform.to_pitch(&PitchConfig::default())?;
///     let voiced: Vec<f64> = contour.values().iter().copied().filter(|&f| f > 0.0).collect();
///     if voiced.is_empty() {
///         return Ok(None);
///     }
///     Ok(Some(voiced.iter().sum::<f64>() / voiced.len() as f64))
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during voice analysis.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// An analysis that needs a single channel received several.
    ///
    /// Select a channel first with `Waveform::channel_waveform()`.
    #[error("Audio must be mono (single channel), got {0} channels")]
    NotMono(usize),

    /// Invalid parameter value.
    ///
    /// Returned eagerly, before any frame is analysed, when a configuration
    /// value is out of range. Examples:
    ///
    /// - non-positive window length or time step
    /// - pitch ceiling at or below the floor, or above Nyquist
    /// - high-pass cutoff at or above Nyquist
    /// - unsupported jitter kind or shimmer neighbourhood
    /// - degenerate noise region for denoising
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}
