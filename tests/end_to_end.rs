//! Full pipeline on synthetic recordings with known answers.

use approx::assert_relative_eq;
use ndarray::Array1;

use voicemarkers::{
    preprocess, AnalysisConfig, Denoiser, JitterKind, NoiseRegion, PreprocessConfig,
    SpectralSubtraction, VoiceAnalysis, Waveform,
};

const SR: f64 = 16000.0;
const F0: f64 = 150.0;
const ONSET: f64 = 0.25;

/// 0.25 s of silence, then a 150 Hz sine of amplitude 0.5 until 1.0 s.
fn silence_then_tone() -> Waveform {
    let n = SR as usize;
    let samples = Array1::from_iter((0..n).map(|i| {
        let t = i as f64 / SR;
        if t < ONSET {
            0.0
        } else {
            0.5 * (2.0 * std::f64::consts::PI * F0 * (t - ONSET)).sin()
        }
    }));
    Waveform::new(samples, SR)
}

fn config_from_json(json: &str) -> AnalysisConfig {
    serde_json::from_str(json).unwrap()
}

#[test]
fn test_pitch_follows_voicing() {
    let waveform = silence_then_tone();
    let analysis = VoiceAnalysis::new(&waveform, AnalysisConfig::default()).unwrap();
    let contour = analysis.pitch_contour().unwrap();

    for frame in contour.frames() {
        if frame.time < ONSET - 0.05 {
            assert!(!frame.voiced(), "voiced silence at {}", frame.time);
        } else if frame.time > ONSET + 0.05 && frame.time < 0.95 {
            assert!(frame.voiced(), "unvoiced tone at {}", frame.time);
            assert_relative_eq!(frame.frequency(), F0, epsilon = 2.0);
        }
    }

    let pitch = analysis.pitch().unwrap();
    assert_relative_eq!(pitch.summary.unwrap(), F0, epsilon = 2.0);
    assert!(pitch.times.iter().all(|&t| t > ONSET - 0.05));
}

#[test]
fn test_perturbation_of_clean_tone_is_low() {
    let waveform = silence_then_tone();
    let analysis = VoiceAnalysis::new(&waveform, AnalysisConfig::default()).unwrap();

    let points = analysis.points().unwrap();
    assert!(points.len() > 80);
    assert!(points.times().iter().all(|&t| t >= ONSET - 0.01));

    let local = analysis.jitter(JitterKind::Local).unwrap();
    assert!(local.summary.unwrap() < 0.002);

    let apq5 = analysis.shimmer(5).unwrap();
    assert!(apq5.summary.unwrap() < 0.01);
}

#[test]
fn test_loudness_counts_only_active_frames() {
    let waveform = silence_then_tone();
    let config = AnalysisConfig::default();
    assert_eq!(config.loudness.activity_threshold_db, 40.0);
    assert_eq!(config.loudness.intensity.min_pitch, 75.0);
    let half_window = 3.6 / config.loudness.intensity.min_pitch;

    let analysis = VoiceAnalysis::new(&waveform, config).unwrap();
    let loudness = analysis.loudness().unwrap();

    assert!(!loudness.is_empty());
    for &t in &loudness.times {
        assert!(
            t >= ONSET - half_window - 1e-9 && t <= 1.0 - half_window + 1e-9,
            "active frame at {}",
            t
        );
    }
    // Frames straddling the onset read below the steady 84.95 dB
    assert!(loudness.times.iter().any(|&t| t < ONSET));
    let summary = loudness.summary.unwrap();
    assert!(summary > 82.0 && summary < 85.5, "summary {}", summary);
}

#[test]
fn test_loudness_threshold_selects_steady_frames() {
    let waveform = silence_then_tone();
    let config = config_from_json(r#"{ "loudness": { "activity_threshold_db": 84.0 } }"#);
    let analysis = VoiceAnalysis::new(&waveform, config).unwrap();
    let loudness = analysis.loudness().unwrap();

    assert!(!loudness.is_empty());
    assert!(loudness.times.iter().all(|&t| t >= ONSET));
    assert_relative_eq!(loudness.summary.unwrap(), 84.95, epsilon = 1.0);
}

#[test]
fn test_report_serializes() {
    let waveform = silence_then_tone();
    let analysis = VoiceAnalysis::new(&waveform, AnalysisConfig::default()).unwrap();
    let report = analysis.report().unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["pitch"]["feature"]["name"], "pitch");
    assert_eq!(json["shimmer"].as_array().unwrap().len(), 3);
    assert_eq!(json["formant_energy"][0]["feature"]["formant"], 1);
}

#[test]
fn test_preprocess_and_denoise_before_analysis() {
    // Low-level hum and noise over the same silence-then-tone layout
    let clean = silence_then_tone();
    let mut state: u64 = 12345;
    let noisy: Vec<f64> = clean
        .samples()
        .row(0)
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
            let hum = 0.02 * (2.0 * std::f64::consts::PI * 30.0 * i as f64 / SR).sin();
            s + 0.01 + hum + 0.01 * (2.0 * unit - 1.0)
        })
        .collect();
    let waveform = Waveform::new(Array1::from_vec(noisy), SR);

    let filtered = preprocess(&waveform, &PreprocessConfig::default()).unwrap();
    let denoised = SpectralSubtraction::default()
        .denoise(&filtered, NoiseRegion::new(0.0, 0.2))
        .unwrap();
    assert_eq!(denoised.n_samples(), waveform.n_samples());

    let analysis = VoiceAnalysis::new(&denoised, AnalysisConfig::default()).unwrap();
    let pitch = analysis.pitch().unwrap();
    assert_relative_eq!(pitch.summary.unwrap(), F0, epsilon = 2.0);
}
