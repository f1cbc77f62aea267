//! Fixed-length feature vector shared by inference and training.

use crate::analysis::spectral::{frame_rms, Spectrogram};
use crate::audio::AudioBuffer;
use crate::error::{DetectError, Result};

/// Order matters: trained artifacts record it and are rejected on mismatch.
pub const FEATURE_NAMES: [&str; 8] = [
    "duration_secs",
    "mean_abs",
    "std_dev",
    "peak_abs",
    "rms",
    "zero_crossing_rate",
    "silent_frame_ratio",
    "beep_band_share",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

const FRAME_SECS: f32 = 0.02;
const SILENT_FRAME_LEVEL: f32 = 0.1;
const BEEP_BAND_HZ: (f32, f32) = (900.0, 1_100.0);
const SPECTRUM_SEGMENT: usize = 1024;

pub fn extract_features(audio: &AudioBuffer) -> Result<Vec<f32>> {
    if audio.is_empty() || audio.sample_rate == 0 {
        return Err(DetectError::FeatureExtraction("empty audio".into()));
    }
    let x = &audio.samples;
    if x.iter().any(|s| !s.is_finite()) {
        return Err(DetectError::FeatureExtraction("non-finite samples".into()));
    }

    let n = x.len() as f32;
    let mean = x.iter().sum::<f32>() / n;
    let mean_abs = x.iter().map(|s| s.abs()).sum::<f32>() / n;
    let variance = x.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>() / n;
    let peak = x.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    let rms = (x.iter().map(|s| s * s).sum::<f32>() / n).sqrt();

    let crossings = x
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    let zcr = crossings as f32 / (n - 1.0).max(1.0);

    let frame_len = ((audio.sample_rate as f32 * FRAME_SECS) as usize).max(1);
    let frames = frame_rms(x, frame_len);
    let loudest = frames.iter().copied().fold(0.0f32, f32::max);
    let silent_ratio = if loudest <= f32::EPSILON {
        1.0
    } else {
        frames
            .iter()
            .filter(|&&r| r < SILENT_FRAME_LEVEL * loudest)
            .count() as f32
            / frames.len() as f32
    };

    let spec = Spectrogram::compute(x, audio.sample_rate, SPECTRUM_SEGMENT);
    let total: f32 = spec.power.iter().flatten().sum();
    let band: f32 = spec
        .band_power(BEEP_BAND_HZ.0, BEEP_BAND_HZ.1)
        .map(|b| b.iter().sum())
        .unwrap_or(0.0);
    let beep_share = if total > 0.0 { band / total } else { 0.0 };

    Ok(vec![
        audio.duration_seconds as f32,
        mean_abs,
        variance.sqrt(),
        peak,
        rms,
        zcr,
        silent_ratio,
        beep_share,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::spectral::test_signals::*;
    use approx::assert_relative_eq;

    #[test]
    fn vector_has_fixed_length_and_order() {
        let f = extract_features(&AudioBuffer::new(tone(1_000.0, 1.0, 0.5), SR)).unwrap();
        assert_eq!(f.len(), FEATURE_COUNT);
        assert_relative_eq!(f[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(f[3], 0.5, epsilon = 1e-3);
        assert_relative_eq!(f[4], 0.5 / 2f32.sqrt(), epsilon = 1e-3);
        // 1 kHz at 16 kHz crosses zero twice per 16 samples.
        assert_relative_eq!(f[5], 0.125, epsilon = 0.01);
        assert!(f[7] > 0.9, "beep share {}", f[7]);
    }

    #[test]
    fn silent_ratio_tracks_pauses() {
        let samples = concat(&[tone(300.0, 1.0, 0.5), silence(1.0)]);
        let f = extract_features(&AudioBuffer::new(samples, SR)).unwrap();
        assert_relative_eq!(f[6], 0.5, epsilon = 0.02);
        assert!(f[7] < 0.05);
    }

    #[test]
    fn empty_audio_is_rejected() {
        assert!(matches!(
            extract_features(&AudioBuffer::new(Vec::new(), SR)),
            Err(DetectError::FeatureExtraction(_))
        ));
        assert!(extract_features(&AudioBuffer::new(vec![f32::NAN; 10], SR)).is_err());
    }
}
