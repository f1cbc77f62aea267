//! Audio-pattern analysis.
//!
//! ## Sub-detectors
//!
//! | Detector   | Looks for                                        | Weight |
//! |------------|--------------------------------------------------|--------|
//! | beep       | a steady tone in the 900–1100 Hz band, 0.5–2 s   | 0.4    |
//! | silence    | a long low-envelope gap (greeting → beep)        | 0.3    |
//! | rhythm     | evenly spaced utterance onsets (read-out cadence)| 0.1    |
//! | speakers   | one dominant pitch track                         | +0.1   |
//! | repetition | self-similar energy contour (templated greeting) | 0.1    |
//!
//! Each detector is independent and deterministic. The combined confidence is
//! capped at 0.95 and signals voicemail above 0.6.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::spectral::{
    amplitude_envelope, contiguous_regions, frame_rms, mean, std_dev, Spectrogram,
};
use super::{Evidence, SubAnalysisResult};
use crate::audio::AudioBuffer;

const BEEP_WEIGHT: f32 = 0.4;
const SILENCE_WEIGHT: f32 = 0.3;
const RHYTHM_WEIGHT: f32 = 0.1;
const SINGLE_SPEAKER_BONUS: f32 = 0.1;
const REPETITION_WEIGHT: f32 = 0.1;
const REPETITION_MIN_SCORE: f32 = 0.6;
const MAX_CONFIDENCE: f32 = 0.95;
const SIGNAL_THRESHOLD: f32 = 0.6;

/// Neutral score for detectors that cannot judge the input.
const NEUTRAL: f32 = 0.5;

const RHYTHM_FRAME_SECS: f32 = 0.02;
const PITCH_FRAME_SECS: f32 = 0.04;
const PITCH_MIN_HZ: f32 = 80.0;
const PITCH_MAX_HZ: f32 = 400.0;
const MAX_PITCH_FRAMES: usize = 400;
const REPETITION_FRAME_SECS: f32 = 0.05;
const REPETITION_MIN_LAG_SECS: f32 = 0.5;

/// Beep-tone detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeepConfig {
    pub min_freq_hz: f32,
    pub max_freq_hz: f32,
    pub min_duration_secs: f32,
    pub max_duration_secs: f32,
    /// Normalized band power a frame must exceed.
    pub power_threshold: f32,
    /// Share of the frame's total power that must sit inside the band, so a
    /// broadband recording with constant loudness is not mistaken for a tone.
    pub min_band_share: f32,
    /// Spectrogram segment length in samples.
    pub segment_length: usize,
}

impl Default for BeepConfig {
    fn default() -> Self {
        Self {
            min_freq_hz: 900.0,
            max_freq_hz: 1100.0,
            min_duration_secs: 0.5,
            max_duration_secs: 2.0,
            power_threshold: 0.7,
            min_band_share: 0.25,
            segment_length: 1024,
        }
    }
}

/// Silence-before-beep detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SilenceConfig {
    pub min_duration_secs: f32,
    /// Normalized envelope level below which a sample counts as silent.
    pub max_volume: f32,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: 0.8,
            max_volume: 0.1,
        }
    }
}

/// Named pattern reported in the evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPattern {
    Beep,
    SilencePattern,
    SpeechRhythm,
    SingleSpeaker,
    RepetitionPatterns,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeepDetection {
    pub found: bool,
    pub confidence: f32,
    /// Start of the winning region (s).
    pub timestamp: Option<f32>,
    pub duration: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceDetection {
    pub found: bool,
    pub confidence: f32,
    /// Up to three `(start, end)` regions in seconds, longest first.
    pub regions: Vec<(f32, f32)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RhythmEstimate {
    pub matches_voicemail: bool,
    pub confidence: f32,
    pub onsets: usize,
    /// Coefficient of variation of onset intervals.
    pub interval_cv: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerEstimate {
    pub count: u32,
    pub confidence: f32,
    pub voiced_frames: usize,
    pub median_pitch_hz: Option<f32>,
}

/// Everything the audio analyzer found, attached as evidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPatternReport {
    pub patterns_found: Vec<AudioPattern>,
    pub beep: BeepDetection,
    pub silence: SilenceDetection,
    pub rhythm: RhythmEstimate,
    pub speakers: SpeakerEstimate,
    pub repetition: f32,
}

/// Combines the five sub-detectors.
#[derive(Debug, Clone, Default)]
pub struct AudioPatternAnalyzer {
    beep: BeepConfig,
    silence: SilenceConfig,
}

impl AudioPatternAnalyzer {
    pub fn new(beep: BeepConfig, silence: SilenceConfig) -> Self {
        Self { beep, silence }
    }

    pub fn analyze(&self, audio: &AudioBuffer) -> SubAnalysisResult {
        if audio.is_empty() || audio.sample_rate == 0 {
            return SubAnalysisResult::negative(Evidence::Audio(AudioPatternReport::default()));
        }

        let beep = self.detect_beep(audio);
        let silence = self.detect_silence(audio);
        let rhythm = analyze_rhythm(audio);
        let speakers = estimate_speakers(audio);
        let repetition = repetition_score(audio);

        let mut patterns_found = Vec::new();
        let mut confidence = 0.0f32;

        if beep.found {
            patterns_found.push(AudioPattern::Beep);
            confidence += beep.confidence * BEEP_WEIGHT;
        }
        if silence.found {
            patterns_found.push(AudioPattern::SilencePattern);
            confidence += silence.confidence * SILENCE_WEIGHT;
        }
        if rhythm.matches_voicemail {
            patterns_found.push(AudioPattern::SpeechRhythm);
            confidence += rhythm.confidence * RHYTHM_WEIGHT;
        }
        if speakers.count == 1 {
            patterns_found.push(AudioPattern::SingleSpeaker);
            confidence += SINGLE_SPEAKER_BONUS;
        }
        if repetition > REPETITION_MIN_SCORE {
            patterns_found.push(AudioPattern::RepetitionPatterns);
            confidence += repetition * REPETITION_WEIGHT;
        }

        let confidence = confidence.min(MAX_CONFIDENCE);

        debug!(confidence, ?patterns_found, "audio patterns scored");

        SubAnalysisResult::new(
            confidence > SIGNAL_THRESHOLD,
            confidence,
            Evidence::Audio(AudioPatternReport {
                patterns_found,
                beep,
                silence,
                rhythm,
                speakers,
                repetition,
            }),
        )
    }

    /// Find the strongest in-band tone region of plausible length.
    pub fn detect_beep(&self, audio: &AudioBuffer) -> BeepDetection {
        let cfg = &self.beep;
        let spec = Spectrogram::compute(&audio.samples, audio.sample_rate, cfg.segment_length);

        let Some(band) = spec.band_power(cfg.min_freq_hz, cfg.max_freq_hz) else {
            return BeepDetection::default();
        };
        let peak = band.iter().copied().fold(0.0f32, f32::max);
        if peak <= f32::EPSILON {
            return BeepDetection::default();
        }

        let mask: Vec<bool> = band
            .iter()
            .zip(&spec.power)
            .map(|(&p, row)| {
                let total: f32 = row.iter().sum();
                p / peak > cfg.power_threshold && total > 0.0 && p / total >= cfg.min_band_share
            })
            .collect();

        let mut best = BeepDetection::default();
        for region in contiguous_regions(&mask) {
            let duration = (region.end - 1 - region.start) as f32 * spec.frame_step;
            if duration < cfg.min_duration_secs || duration > cfg.max_duration_secs {
                continue;
            }
            let region_peak = band[region.clone()]
                .iter()
                .copied()
                .fold(0.0f32, f32::max)
                / peak;
            let duration_factor = 1.0 - ((duration - 1.0) / cfg.max_duration_secs).abs();
            let confidence = 0.7 * region_peak + 0.3 * duration_factor;

            if confidence > best.confidence {
                best = BeepDetection {
                    found: true,
                    confidence,
                    timestamp: Some(spec.times[region.start]),
                    duration: Some(duration),
                };
            }
        }
        best
    }

    /// Longest low-envelope region of at least the configured duration.
    pub fn detect_silence(&self, audio: &AudioBuffer) -> SilenceDetection {
        let cfg = &self.silence;
        let envelope = amplitude_envelope(&audio.samples);
        let max = envelope.iter().copied().fold(0.0f32, f32::max);
        if max <= f32::EPSILON {
            return SilenceDetection::default();
        }

        let mask: Vec<bool> = envelope.iter().map(|v| v / max < cfg.max_volume).collect();
        let per_sample = 1.0 / audio.sample_rate as f32;

        let mut regions: Vec<(f32, f32, f32)> = contiguous_regions(&mask)
            .into_iter()
            .map(|r| {
                let duration = r.len() as f32 * per_sample;
                (
                    r.start as f32 * per_sample,
                    (r.end - 1) as f32 * per_sample,
                    duration,
                )
            })
            .filter(|&(_, _, d)| d >= cfg.min_duration_secs)
            .collect();

        if regions.is_empty() {
            return SilenceDetection::default();
        }

        regions.sort_by(|a, b| b.2.total_cmp(&a.2));
        let best = regions[0].2;
        let confidence = (0.5 + (best - cfg.min_duration_secs) * 0.5).min(0.9);

        SilenceDetection {
            found: true,
            confidence,
            regions: regions.iter().take(3).map(|&(s, e, _)| (s, e)).collect(),
        }
    }
}

/// Regularity of utterance onsets.
///
/// Recorded greetings are read in one breath-controlled cadence, so the time
/// between utterance starts varies little. Confidence is `1 - cv` of those
/// intervals; fewer than three onsets is not enough to judge.
pub fn analyze_rhythm(audio: &AudioBuffer) -> RhythmEstimate {
    let frame_len = ((audio.sample_rate as f32 * RHYTHM_FRAME_SECS) as usize).max(1);
    let rms = frame_rms(&audio.samples, frame_len);
    let max = rms.iter().copied().fold(0.0f32, f32::max);

    let neutral = |onsets| RhythmEstimate {
        matches_voicemail: false,
        confidence: NEUTRAL,
        onsets,
        interval_cv: None,
    };

    if max <= 1e-4 {
        return neutral(0);
    }

    let speech: Vec<bool> = rms.iter().map(|&r| r > 0.15 * max).collect();
    let onsets: Vec<usize> = contiguous_regions(&speech)
        .into_iter()
        .filter(|r| r.len() >= 2)
        .map(|r| r.start)
        .collect();

    if onsets.len() < 3 {
        return neutral(onsets.len());
    }

    let intervals: Vec<f32> = onsets.windows(2).map(|w| (w[1] - w[0]) as f32).collect();
    let m = mean(&intervals);
    if m <= 0.0 {
        return neutral(onsets.len());
    }
    let cv = std_dev(&intervals) / m;
    let confidence = (1.0 - cv).clamp(0.0, 1.0);

    RhythmEstimate {
        matches_voicemail: confidence > 0.6,
        confidence,
        onsets: onsets.len(),
        interval_cv: Some(cv),
    }
}

/// One dominant pitch track → one speaker.
///
/// Pitch is estimated per voiced 40 ms frame by normalized autocorrelation in
/// the 80–400 Hz range. When more than 30 % of frames sit over 35 % away from
/// the median pitch, a second voice is assumed.
pub fn estimate_speakers(audio: &AudioBuffer) -> SpeakerEstimate {
    let sr = audio.sample_rate as f32;
    let frame_len = (sr * PITCH_FRAME_SECS) as usize;
    let min_lag = (sr / PITCH_MAX_HZ).floor().max(1.0) as usize;
    let max_lag = (sr / PITCH_MIN_HZ).ceil() as usize;
    if frame_len <= max_lag || audio.samples.len() < frame_len {
        return SpeakerEstimate::default();
    }

    let frames: Vec<&[f32]> = audio.samples.chunks_exact(frame_len).collect();
    let rms = frame_rms(&audio.samples[..frames.len() * frame_len], frame_len);
    let max_rms = rms.iter().copied().fold(0.0f32, f32::max);

    let voiced: Vec<&[f32]> = frames
        .iter()
        .zip(&rms)
        .filter(|(_, &r)| r > 1e-3 && r > 0.1 * max_rms)
        .map(|(f, _)| *f)
        .collect();

    let stride = voiced.len().div_ceil(MAX_PITCH_FRAMES).max(1);
    let mut pitches: Vec<f32> = voiced
        .iter()
        .step_by(stride)
        .filter_map(|frame| frame_pitch(frame, min_lag, max_lag).map(|lag| sr / lag as f32))
        .collect();

    if pitches.is_empty() {
        return SpeakerEstimate {
            voiced_frames: voiced.len(),
            ..SpeakerEstimate::default()
        };
    }

    pitches.sort_by(f32::total_cmp);
    let median = pitches[pitches.len() / 2];

    if pitches.len() < 5 {
        return SpeakerEstimate {
            count: 1,
            confidence: 0.3,
            voiced_frames: voiced.len(),
            median_pitch_hz: Some(median),
        };
    }

    let deviating = pitches
        .iter()
        .filter(|&&p| (p - median).abs() / median > 0.35)
        .count() as f32
        / pitches.len() as f32;

    let (count, confidence) = if deviating <= 0.3 {
        (1, 1.0 - 0.5 * deviating / 0.3)
    } else {
        (2, 0.5 + 0.5 * ((deviating - 0.3) / 0.7).min(1.0))
    };

    SpeakerEstimate {
        count,
        confidence,
        voiced_frames: voiced.len(),
        median_pitch_hz: Some(median),
    }
}

/// Period (in samples) of a voiced frame, or `None` when unvoiced.
///
/// Takes the first autocorrelation peak within 90 % of the global best so
/// period multiples do not halve the pitch.
fn frame_pitch(frame: &[f32], min_lag: usize, max_lag: usize) -> Option<usize> {
    let corr: Vec<f32> = (min_lag..=max_lag.min(frame.len() - 1))
        .map(|lag| normalized_autocorr(frame, lag))
        .collect();
    let best = corr.iter().copied().fold(f32::MIN, f32::max);
    if best < 0.5 {
        return None;
    }
    let mut idx = corr.iter().position(|&r| r >= 0.9 * best)?;
    while idx + 1 < corr.len() && corr[idx + 1] > corr[idx] {
        idx += 1;
    }
    Some(min_lag + idx)
}

fn normalized_autocorr(x: &[f32], lag: usize) -> f32 {
    if lag >= x.len() {
        return 0.0;
    }
    let a = &x[..x.len() - lag];
    let b = &x[lag..];
    let num: f32 = a.iter().zip(b).map(|(p, q)| p * q).sum();
    let ea: f32 = a.iter().map(|v| v * v).sum();
    let eb: f32 = b.iter().map(|v| v * v).sum();
    let denom = (ea * eb).sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        num / denom
    }
}

/// Structural self-similarity of the energy contour in [0, 1].
///
/// Best normalized autocorrelation of the mean-removed 50 ms energy contour
/// at lags between 0.5 s and half the recording.
pub fn repetition_score(audio: &AudioBuffer) -> f32 {
    let frame_len = ((audio.sample_rate as f32 * REPETITION_FRAME_SECS) as usize).max(1);
    let contour = frame_rms(&audio.samples, frame_len);
    let min_lag = (REPETITION_MIN_LAG_SECS / REPETITION_FRAME_SECS).ceil() as usize;
    let max_lag = contour.len() / 2;
    if max_lag < min_lag {
        return NEUTRAL;
    }

    let m = mean(&contour);
    let centered: Vec<f32> = contour.iter().map(|v| v - m).collect();
    let variance = centered.iter().map(|v| v * v).sum::<f32>() / centered.len() as f32;
    if m <= f32::EPSILON || variance / (m * m) < 1e-4 {
        return NEUTRAL;
    }

    (min_lag..=max_lag)
        .map(|lag| normalized_autocorr(&centered, lag))
        .fold(0.0f32, f32::max)
        .clamp(0.0, 1.0)
}
