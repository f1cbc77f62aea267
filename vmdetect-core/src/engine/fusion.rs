//! Tiered weighted vote over the three analyzer opinions.
//!
//! ```text
//! 1. text  signal ∧ conf > 0.80          → voicemail (text)
//! 2. audio signal ∧ conf > 0.85          → voicemail (audio)
//! 3. ai    signal ∧ conf > ai_threshold  → voicemail (ai)
//! 4. w = 0.3·text + 0.3·audio + 0.4·ai
//!    w > 0.65                            → voicemail (combined)
//! 5. otherwise                           → not voicemail, confidence w (none)
//! ```
//!
//! Pure: the same inputs always give the same verdict.

use crate::analysis::{unit_interval, SubAnalysisResult};
use crate::report::{DetectionMethod, DetectionResult, SubResults};

const TEXT_OVERRIDE: f32 = 0.8;
const AUDIO_OVERRIDE: f32 = 0.85;
const TEXT_WEIGHT: f32 = 0.3;
const AUDIO_WEIGHT: f32 = 0.3;
const AI_WEIGHT: f32 = 0.4;
const COMBINED_THRESHOLD: f32 = 0.65;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionPolicy {
    pub ai_threshold: f32,
}

impl Default for FusionPolicy {
    fn default() -> Self {
        Self { ai_threshold: 0.75 }
    }
}

impl FusionPolicy {
    pub fn new(ai_threshold: f32) -> Self {
        Self { ai_threshold }
    }

    /// Verdict only; timing, cache and hash fields are left at their defaults.
    pub fn decide(
        &self,
        text: SubAnalysisResult,
        audio: SubAnalysisResult,
        ai: SubAnalysisResult,
    ) -> DetectionResult {
        let (is_voicemail, confidence, method) = self.vote(&text, &audio, &ai);
        DetectionResult {
            is_voicemail,
            confidence: unit_interval(confidence),
            method,
            transcript: text.transcript().map(str::to_string),
            sub_results: SubResults { text, audio, ai },
            analysis_time_seconds: 0.0,
            from_cache: false,
            error: None,
            content_hash: None,
        }
    }

    fn vote(
        &self,
        text: &SubAnalysisResult,
        audio: &SubAnalysisResult,
        ai: &SubAnalysisResult,
    ) -> (bool, f32, DetectionMethod) {
        if text.is_voicemail_signal && text.confidence > TEXT_OVERRIDE {
            return (true, text.confidence, DetectionMethod::Text);
        }
        if audio.is_voicemail_signal && audio.confidence > AUDIO_OVERRIDE {
            return (true, audio.confidence, DetectionMethod::Audio);
        }
        if ai.is_voicemail_signal && ai.confidence > self.ai_threshold {
            return (true, ai.confidence, DetectionMethod::Ai);
        }

        let weighted = TEXT_WEIGHT * text.confidence
            + AUDIO_WEIGHT * audio.confidence
            + AI_WEIGHT * ai.confidence;

        if weighted > COMBINED_THRESHOLD {
            (true, weighted, DetectionMethod::Combined)
        } else {
            (false, weighted, DetectionMethod::None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Evidence, TextEvidence};
    use approx::assert_relative_eq;

    fn sub(signal: bool, confidence: f32) -> SubAnalysisResult {
        SubAnalysisResult::new(signal, confidence, Evidence::Disabled)
    }

    fn text(signal: bool, confidence: f32, transcript: &str) -> SubAnalysisResult {
        SubAnalysisResult::new(
            signal,
            confidence,
            Evidence::Text(TextEvidence {
                transcript: Some(transcript.into()),
                language: "en-US".into(),
                matched_phrases: Vec::new(),
            }),
        )
    }

    #[test]
    fn strong_text_wins_regardless_of_others() {
        let r = FusionPolicy::default().decide(
            text(true, 0.9, "leave a message"),
            sub(false, 0.0),
            sub(false, 0.0),
        );
        assert!(r.is_voicemail);
        assert_eq!(r.method, DetectionMethod::Text);
        assert_relative_eq!(r.confidence, 0.9);
        assert_eq!(r.transcript.as_deref(), Some("leave a message"));
    }

    #[test]
    fn text_at_exactly_080_does_not_override() {
        let r = FusionPolicy::default().decide(sub(true, 0.8), sub(false, 0.0), sub(false, 0.0));
        assert!(!r.is_voicemail);
        assert_eq!(r.method, DetectionMethod::None);
        assert_relative_eq!(r.confidence, 0.24, epsilon = 1e-6);
    }

    #[test]
    fn strong_audio_is_second_tier() {
        let r = FusionPolicy::default().decide(sub(true, 0.65), sub(true, 0.9), sub(false, 0.0));
        assert_eq!(r.method, DetectionMethod::Audio);
        assert_relative_eq!(r.confidence, 0.9);
    }

    #[test]
    fn ai_uses_configured_threshold() {
        let policy = FusionPolicy::new(0.6);
        let r = policy.decide(sub(false, 0.0), sub(false, 0.0), sub(true, 0.7));
        assert_eq!(r.method, DetectionMethod::Ai);

        let r = FusionPolicy::default().decide(sub(false, 0.0), sub(false, 0.0), sub(true, 0.7));
        assert_ne!(r.method, DetectionMethod::Ai);
    }

    #[test]
    fn weighted_vote_above_065_is_combined() {
        let r = FusionPolicy::default().decide(sub(true, 0.8), sub(true, 0.8), sub(false, 0.5));
        assert!(r.is_voicemail);
        assert_eq!(r.method, DetectionMethod::Combined);
        assert_relative_eq!(r.confidence, 0.68, epsilon = 1e-6);
    }

    #[test]
    fn weighted_vote_below_threshold_is_none() {
        let r = FusionPolicy::default().decide(sub(false, 0.6), sub(false, 0.6), sub(false, 0.6));
        assert!(!r.is_voicemail);
        assert_eq!(r.method, DetectionMethod::None);
        assert_relative_eq!(r.confidence, 0.6, epsilon = 1e-6);
    }

    #[test]
    fn weighted_sum_is_exact() {
        let r = FusionPolicy::default().decide(sub(true, 0.4), sub(true, 0.5), sub(true, 0.6));
        assert!(!r.is_voicemail);
        assert_eq!(r.method, DetectionMethod::None);
        assert_relative_eq!(r.confidence, 0.51, epsilon = 1e-6);
    }

    #[test]
    fn nan_opinion_never_leaks_into_verdict() {
        let nan = SubAnalysisResult {
            confidence: f32::NAN,
            ..sub(false, 0.0)
        };
        let r = FusionPolicy::default().decide(sub(false, 0.0), sub(false, 0.0), nan);
        assert!(!r.is_voicemail);
        assert_eq!(r.method, DetectionMethod::None);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn all_zero_is_none_with_zero_confidence() {
        let r = FusionPolicy::default().decide(sub(false, 0.0), sub(false, 0.0), sub(false, 0.0));
        assert!(!r.is_voicemail);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.method, DetectionMethod::None);
        assert!(r.transcript.is_none());
    }

    #[test]
    fn decision_is_deterministic() {
        let policy = FusionPolicy::default();
        let a = policy.decide(sub(true, 0.7), sub(true, 0.61), sub(false, 0.3));
        let b = policy.decide(sub(true, 0.7), sub(true, 0.61), sub(false, 0.3));
        assert_eq!(a, b);
    }
}
