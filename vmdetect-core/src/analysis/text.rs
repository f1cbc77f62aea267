//! Transcript phrase matching.
//!
//! Greetings recorded by answering systems reuse a small vocabulary ("leave
//! a message", "after the tone", "caixa postal"). Counting how many of those
//! phrases appear in the transcript is a cheap and surprisingly strong signal.

use std::collections::HashMap;

use tracing::debug;

use super::{Evidence, SubAnalysisResult, TextEvidence};

/// Per-language voicemail phrases. Read-only after construction.
#[derive(Debug, Clone)]
pub struct PhraseLexicon {
    phrases: HashMap<String, Vec<String>>,
    default_language: String,
}

impl PhraseLexicon {
    /// Built-in phrases for `pt-BR`, `en-US` and `es-ES`.
    pub fn builtin(default_language: &str) -> Self {
        let mut phrases = HashMap::new();
        phrases.insert(
            "pt-BR".to_string(),
            to_owned(&[
                "deixe seu recado",
                "após o sinal",
                "caixa postal",
                "não posso atender",
                "deixe uma mensagem",
                "grave sua mensagem",
                "no momento não posso",
                "sinal sonoro",
                "não estou disponível",
            ]),
        );
        phrases.insert(
            "en-US".to_string(),
            to_owned(&[
                "leave a message",
                "leave your message",
                "not available",
                "after the tone",
                "at the beep",
                "voicemail",
                "voice mailbox",
                "call you back",
                "unable to take your call",
            ]),
        );
        phrases.insert(
            "es-ES".to_string(),
            to_owned(&[
                "deje su mensaje",
                "no está disponible",
                "después del tono",
                "buzón de voz",
                "no puedo atender",
                "grabe su mensaje",
            ]),
        );
        Self {
            phrases,
            default_language: default_language.to_string(),
        }
    }

    /// Built-ins with per-language replacements applied.
    pub fn with_overrides(default_language: &str, overrides: &HashMap<String, Vec<String>>) -> Self {
        let mut lexicon = Self::builtin(default_language);
        for (language, list) in overrides {
            let cleaned: Vec<String> = list
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            lexicon.phrases.insert(language.clone(), cleaned);
        }
        lexicon
    }

    /// Resolve `language` to a lexicon key: exact match, then any lexicon
    /// sharing the primary subtag, then the default language.
    pub fn resolve(&self, language: &str) -> Option<&str> {
        if let Some((key, _)) = self.phrases.get_key_value(language) {
            return Some(key.as_str());
        }

        let primary = primary_subtag(language);
        let mut same_primary: Vec<&String> = self
            .phrases
            .keys()
            .filter(|k| primary_subtag(k).eq_ignore_ascii_case(primary))
            .collect();
        same_primary.sort();
        if let Some(key) = same_primary.first() {
            return Some(key.as_str());
        }

        self.phrases
            .get_key_value(self.default_language.as_str())
            .map(|(k, _)| k.as_str())
    }

    pub fn phrases_for(&self, language: &str) -> &[String] {
        self.resolve(language)
            .and_then(|key| self.phrases.get(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.phrases.keys().map(String::as_str)
    }
}

/// Scores a transcript against the lexicon.
#[derive(Debug, Clone)]
pub struct TextAnalyzer {
    lexicon: PhraseLexicon,
}

impl TextAnalyzer {
    pub fn new(lexicon: PhraseLexicon) -> Self {
        Self { lexicon }
    }

    pub fn lexicon(&self) -> &PhraseLexicon {
        &self.lexicon
    }

    /// `None` transcript → confidence 0, no signal. Otherwise
    /// `min(0.5 + 0.15 * matches, 0.95)`, signalling on any match.
    pub fn analyze(&self, transcript: Option<&str>, language: &str) -> SubAnalysisResult {
        let resolved = self
            .lexicon
            .resolve(language)
            .unwrap_or(language)
            .to_string();

        let Some(transcript) = transcript else {
            return SubAnalysisResult::negative(Evidence::Text(TextEvidence {
                transcript: None,
                language: resolved,
                matched_phrases: Vec::new(),
            }));
        };

        let lowered = transcript.to_lowercase();
        let matched: Vec<String> = self
            .lexicon
            .phrases_for(language)
            .iter()
            .filter(|phrase| lowered.contains(&phrase.to_lowercase()))
            .cloned()
            .collect();

        debug!(language = %resolved, matches = matched.len(), "transcript scored");

        let (signal, confidence) = if matched.is_empty() {
            (false, 0.0)
        } else {
            (true, text_confidence(matched.len()))
        };

        SubAnalysisResult::new(
            signal,
            confidence,
            Evidence::Text(TextEvidence {
                transcript: Some(transcript.to_string()),
                language: resolved,
                matched_phrases: matched,
            }),
        )
    }
}

/// `min(0.5 + 0.15 * n, 0.95)` for n ≥ 1.
pub fn text_confidence(matches: usize) -> f32 {
    (0.5 + 0.15 * matches as f32).min(0.95)
}

/// `"pt-BR"` → `"pt"`.
pub fn primary_subtag(language: &str) -> &str {
    language
        .split(['-', '_'])
        .next()
        .unwrap_or(language)
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn analyzer() -> TextAnalyzer {
        TextAnalyzer::new(PhraseLexicon::builtin("en-US"))
    }

    #[test]
    fn missing_transcript_is_zero() {
        for lang in ["en-US", "pt-BR", "xx-YY"] {
            let r = analyzer().analyze(None, lang);
            assert!(!r.is_voicemail_signal);
            assert_eq!(r.confidence, 0.0);
        }
    }

    #[test]
    fn one_match_scores_065() {
        let r = analyzer().analyze(Some("Hi, please leave a message."), "en-US");
        assert!(r.is_voicemail_signal);
        assert_relative_eq!(r.confidence, 0.65, epsilon = 1e-6);
        match r.evidence {
            Evidence::Text(t) => assert_eq!(t.matched_phrases, vec!["leave a message"]),
            other => panic!("unexpected evidence {other:?}"),
        }
    }

    #[test]
    fn confidence_caps_at_095() {
        let transcript = "You've reached my VOICEMAIL. I'm not available, \
                          leave a message after the tone and I'll call you back";
        let r = analyzer().analyze(Some(transcript), "en-US");
        assert!(r.is_voicemail_signal);
        assert_relative_eq!(r.confidence, 0.95, epsilon = 1e-6);
    }

    #[test]
    fn confidence_is_monotonic_in_matches() {
        let mut last = 0.0;
        for n in 1..10 {
            let c = text_confidence(n);
            assert!(c >= last);
            assert!(c <= 0.95);
            last = c;
        }
        assert_relative_eq!(text_confidence(3), 0.95, epsilon = 1e-6);
    }

    #[test]
    fn no_match_is_negative_but_keeps_transcript() {
        let r = analyzer().analyze(Some("hello, who is this?"), "en-US");
        assert!(!r.is_voicemail_signal);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.transcript(), Some("hello, who is this?"));
    }

    #[test]
    fn portuguese_phrases_match_case_insensitively() {
        let r = analyzer().analyze(Some("Você ligou para a CAIXA POSTAL de Ana"), "pt-BR");
        assert!(r.is_voicemail_signal);
    }

    #[test]
    fn unknown_language_falls_back_to_default() {
        let lexicon = PhraseLexicon::builtin("en-US");
        assert_eq!(lexicon.resolve("de-DE"), Some("en-US"));
        let r = analyzer().analyze(Some("please leave a message"), "de-DE");
        assert!(r.is_voicemail_signal);
    }

    #[test]
    fn primary_subtag_resolves_regional_variants() {
        let lexicon = PhraseLexicon::builtin("en-US");
        assert_eq!(lexicon.resolve("pt-PT"), Some("pt-BR"));
        assert_eq!(lexicon.resolve("es"), Some("es-ES"));
    }

    #[test]
    fn overrides_replace_builtin_list() {
        let mut overrides = HashMap::new();
        overrides.insert("en-US".to_string(), vec!["  the party you are calling ".to_string()]);
        let a = TextAnalyzer::new(PhraseLexicon::with_overrides("en-US", &overrides));
        assert!(!a.analyze(Some("leave a message"), "en-US").is_voicemail_signal);
        assert!(a
            .analyze(Some("The party you are calling is away"), "en-US")
            .is_voicemail_signal);
    }
}
