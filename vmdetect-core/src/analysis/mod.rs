//! Independent analyzers feeding the fusion engine.
//!
//! Each analyzer reduces a recording (or its transcript) to one
//! [`SubAnalysisResult`]. They never see each other's output and never decide
//! the final verdict; that is the fusion engine's job.

pub mod patterns;
pub mod spectral;
pub mod text;

pub use patterns::{AudioPattern, AudioPatternAnalyzer, AudioPatternReport};
pub use text::{PhraseLexicon, TextAnalyzer};

use serde::{Deserialize, Serialize};

/// One analyzer's opinion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAnalysisResult {
    pub is_voicemail_signal: bool,
    /// In [0.0, 1.0].
    pub confidence: f32,
    pub evidence: Evidence,
    /// Set when the analyzer failed and this result is a zero-confidence stand-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubAnalysisResult {
    pub fn new(is_voicemail_signal: bool, confidence: f32, evidence: Evidence) -> Self {
        Self {
            is_voicemail_signal,
            confidence: unit_interval(confidence),
            evidence,
            error: None,
        }
    }

    /// Zero-confidence, negative result.
    pub fn negative(evidence: Evidence) -> Self {
        Self::new(false, 0.0, evidence)
    }

    /// Stand-in for an analyzer that failed.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::negative(Evidence::Failed)
        }
    }

    /// Stand-in for an analyzer switched off by configuration.
    pub fn disabled() -> Self {
        Self::negative(Evidence::Disabled)
    }

    /// Transcript carried by text evidence, if any.
    pub fn transcript(&self) -> Option<&str> {
        match &self.evidence {
            Evidence::Text(t) => t.transcript.as_deref(),
            _ => None,
        }
    }
}

/// Clamp to [0, 1]; NaN becomes 0.
pub fn unit_interval(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Analyzer-specific details backing a [`SubAnalysisResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Evidence {
    Text(TextEvidence),
    Audio(AudioPatternReport),
    Ai(AiEvidence),
    Disabled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEvidence {
    pub transcript: Option<String>,
    /// Lexicon actually consulted (after fallback).
    pub language: String,
    pub matched_phrases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiEvidence {
    /// Raw model probability; `None` when no model was available.
    pub raw_score: Option<f32>,
    pub model: Option<String>,
    pub features: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_stays_in_unit_interval() {
        assert_eq!(SubAnalysisResult::new(true, 1.7, Evidence::Disabled).confidence, 1.0);
        assert_eq!(SubAnalysisResult::new(true, -0.2, Evidence::Disabled).confidence, 0.0);
        assert_eq!(SubAnalysisResult::new(true, f32::NAN, Evidence::Disabled).confidence, 0.0);
        assert_eq!(unit_interval(f32::INFINITY), 1.0);
    }
}
