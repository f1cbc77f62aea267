//! Detector configuration.
//!
//! Loaded from JSON (camelCase, every field optional) by hosts, then passed
//! through [`DetectorConfig::normalize`] before use.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::analysis::patterns::{BeepConfig, SilenceConfig};

pub const DEFAULT_LANGUAGE: &str = "pt-BR";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini-transcribe";
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Configuration for `VoicemailDetector`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectorConfig {
    /// Run the ML classifier. When false it reports `disabled`.
    pub use_ai: bool,
    /// Trained model artifact. `None` means no model.
    pub ai_model_path: Option<PathBuf>,
    /// Probability above which the classifier signals voicemail. Default: 0.75.
    pub ai_threshold: f32,
    /// Scratch directory for byte-buffer inputs. `None` → platform temp dir.
    pub temp_dir: Option<PathBuf>,
    pub default_language: String,
    /// Per-language phrase lists replacing the built-in ones.
    pub lexicon_overrides: HashMap<String, Vec<String>>,
    /// Rate every analyzer sees. `None` keeps the decoded rate. Default: 16000.
    pub analysis_sample_rate: Option<u32>,
    /// Result-cache entries. 0 disables caching. Default: 256.
    pub cache_capacity: usize,
    pub beep: BeepConfig,
    pub silence: SilenceConfig,
    pub transcription: TranscriptionConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            use_ai: true,
            ai_model_path: None,
            ai_threshold: 0.75,
            temp_dir: None,
            default_language: DEFAULT_LANGUAGE.into(),
            lexicon_overrides: HashMap::new(),
            analysis_sample_rate: Some(16_000),
            cache_capacity: 256,
            beep: BeepConfig::default(),
            silence: SilenceConfig::default(),
            transcription: TranscriptionConfig::default(),
        }
    }
}

/// Speech-to-text backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscriptionConfig {
    /// Per-backend attempt timeout. Default: 20 s.
    pub timeout_secs: f64,
    /// Enables the cloud backend.
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_endpoint: String,
    /// whisper.cpp-compatible binary. Enables the offline backend.
    pub whisper_command: Option<PathBuf>,
    pub whisper_model: Option<PathBuf>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20.0,
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.into(),
            openai_endpoint: DEFAULT_OPENAI_ENDPOINT.into(),
            whisper_command: None,
            whisper_model: None,
        }
    }
}

impl DetectorConfig {
    pub fn normalize(&mut self) {
        self.ai_threshold = self.ai_threshold.clamp(0.0, 1.0);
        self.default_language = non_empty(&self.default_language, DEFAULT_LANGUAGE);
        self.analysis_sample_rate = self
            .analysis_sample_rate
            .filter(|&r| r > 0)
            .map(|r| r.clamp(4_000, 96_000));
        self.cache_capacity = self.cache_capacity.min(65_536);
        self.temp_dir = self
            .temp_dir
            .take()
            .filter(|p| !p.as_os_str().is_empty());
        self.ai_model_path = self
            .ai_model_path
            .take()
            .filter(|p| !p.as_os_str().is_empty());

        self.lexicon_overrides = self
            .lexicon_overrides
            .drain()
            .map(|(lang, phrases)| (lang.trim().to_string(), phrases))
            .filter(|(lang, _)| !lang.is_empty())
            .collect();

        normalize_beep(&mut self.beep);
        normalize_silence(&mut self.silence);
        self.transcription.normalize();
    }

    /// Scratch directory actually used.
    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl TranscriptionConfig {
    pub fn normalize(&mut self) {
        self.timeout_secs = if self.timeout_secs.is_finite() {
            self.timeout_secs.clamp(1.0, 600.0)
        } else {
            20.0
        };
        self.openai_api_key = self
            .openai_api_key
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self.openai_model = non_empty(&self.openai_model, DEFAULT_OPENAI_MODEL);
        self.openai_endpoint = non_empty(&self.openai_endpoint, DEFAULT_OPENAI_ENDPOINT);
        self.whisper_command = self
            .whisper_command
            .take()
            .filter(|p| !p.as_os_str().is_empty());
        self.whisper_model = self
            .whisper_model
            .take()
            .filter(|p| !p.as_os_str().is_empty());
    }
}

fn normalize_beep(beep: &mut BeepConfig) {
    beep.min_freq_hz = beep.min_freq_hz.clamp(20.0, 20_000.0);
    beep.max_freq_hz = beep.max_freq_hz.clamp(20.0, 20_000.0);
    if beep.max_freq_hz < beep.min_freq_hz {
        std::mem::swap(&mut beep.min_freq_hz, &mut beep.max_freq_hz);
    }
    beep.min_duration_secs = beep.min_duration_secs.clamp(0.05, 10.0);
    beep.max_duration_secs = beep.max_duration_secs.clamp(beep.min_duration_secs, 10.0);
    beep.power_threshold = beep.power_threshold.clamp(0.05, 1.0);
    beep.min_band_share = beep.min_band_share.clamp(0.0, 1.0);
    beep.segment_length = beep.segment_length.clamp(64, 16_384);
}

fn normalize_silence(silence: &mut SilenceConfig) {
    silence.min_duration_secs = silence.min_duration_secs.clamp(0.05, 30.0);
    silence.max_volume = silence.max_volume.clamp(0.001, 1.0);
}

fn non_empty(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.into()
    } else {
        trimmed.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: DetectorConfig =
            serde_json::from_str(r#"{"aiThreshold":0.9,"beep":{"minFreqHz":950}}"#).unwrap();
        assert_eq!(cfg.ai_threshold, 0.9);
        assert_eq!(cfg.beep.min_freq_hz, 950.0);
        assert_eq!(cfg.beep.max_freq_hz, 1_100.0);
        assert!(cfg.use_ai);
        assert_eq!(cfg.cache_capacity, 256);
        assert_eq!(cfg.analysis_sample_rate, Some(16_000));
        assert_eq!(cfg.transcription.timeout_secs, 20.0);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(DetectorConfig::default()).unwrap();
        assert_eq!(json["defaultLanguage"], DEFAULT_LANGUAGE);
        assert!(json["silence"]["minDurationSecs"].is_number());
        assert_eq!(json["cacheCapacity"], 256);
        assert_eq!(json["transcription"]["openaiModel"], DEFAULT_OPENAI_MODEL);
    }

    #[test]
    fn normalize_clamps_and_cleans() {
        let mut cfg = DetectorConfig {
            ai_threshold: 3.0,
            default_language: "   ".into(),
            analysis_sample_rate: Some(0),
            ..DetectorConfig::default()
        };
        cfg.beep.min_freq_hz = 1_200.0;
        cfg.beep.max_freq_hz = 800.0;
        cfg.transcription.openai_api_key = Some("  ".into());
        cfg.transcription.timeout_secs = f64::NAN;
        cfg.normalize();

        assert_eq!(cfg.ai_threshold, 1.0);
        assert_eq!(cfg.default_language, DEFAULT_LANGUAGE);
        assert_eq!(cfg.analysis_sample_rate, None);
        assert_eq!(cfg.beep.min_freq_hz, 800.0);
        assert_eq!(cfg.beep.max_freq_hz, 1_200.0);
        assert!(cfg.transcription.openai_api_key.is_none());
        assert_eq!(cfg.transcription.timeout_secs, 20.0);
    }

    #[test]
    fn normalize_keeps_sane_values() {
        let mut cfg = DetectorConfig::default();
        let before = cfg.clone();
        cfg.normalize();
        assert_eq!(cfg, before);
    }
}
