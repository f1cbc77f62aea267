//! Lock-free detector counters and their snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::report::{DetectionMethod, DetectionResult, DetectorStats};

/// Lock-free counters shared by the caller thread and the queue worker.
#[derive(Default)]
pub struct StatsCounters {
    pub total_analyzed: AtomicUsize,
    pub voicemail_detected: AtomicUsize,
    pub text_decisions: AtomicUsize,
    pub audio_decisions: AtomicUsize,
    pub ai_decisions: AtomicUsize,
    pub combined_decisions: AtomicUsize,
    pub cache_hits: AtomicUsize,
    pub errors: AtomicUsize,
}

impl StatsCounters {
    /// Count a freshly computed result.
    pub fn record(&self, result: &DetectionResult) {
        self.total_analyzed.fetch_add(1, Ordering::Relaxed);
        if result.is_voicemail {
            self.voicemail_detected.fetch_add(1, Ordering::Relaxed);
        }
        let counter = match result.method {
            DetectionMethod::Text => &self.text_decisions,
            DetectionMethod::Audio => &self.audio_decisions,
            DetectionMethod::Ai => &self.ai_decisions,
            DetectionMethod::Combined => &self.combined_decisions,
            DetectionMethod::None => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for c in [
            &self.total_analyzed,
            &self.voicemail_detected,
            &self.text_decisions,
            &self.audio_decisions,
            &self.ai_decisions,
            &self.combined_decisions,
            &self.cache_hits,
            &self.errors,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DetectorStats {
        DetectorStats {
            total_analyzed: self.total_analyzed.load(Ordering::Relaxed),
            voicemail_detected: self.voicemail_detected.load(Ordering::Relaxed),
            text_decisions: self.text_decisions.load(Ordering::Relaxed),
            audio_decisions: self.audio_decisions.load(Ordering::Relaxed),
            ai_decisions: self.ai_decisions.load(Ordering::Relaxed),
            combined_decisions: self.combined_decisions.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_method() {
        let stats = StatsCounters::default();
        let mut r = DetectionResult::failure("x", 0.0);
        r.is_voicemail = true;
        r.method = DetectionMethod::Audio;
        stats.record(&r);
        r.is_voicemail = false;
        r.method = DetectionMethod::None;
        stats.record(&r);
        stats.record_cache_hit();
        stats.record_error();

        let s = stats.snapshot();
        assert_eq!(s.total_analyzed, 2);
        assert_eq!(s.voicemail_detected, 1);
        assert_eq!(s.audio_decisions, 1);
        assert_eq!(s.text_decisions, 0);
        assert_eq!(s.cache_hits, 1);
        assert_eq!(s.errors, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), DetectorStats::default());
    }
}
