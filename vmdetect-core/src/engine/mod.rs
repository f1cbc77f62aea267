//! `VoicemailDetector`: top-level facade.
//!
//! ## Analysis flow
//!
//! ```text
//! AudioSource ─► content hash ─► cache hit? ──yes──► cached result (fromCache)
//!                                    │ no
//!                                    ▼
//!                         Ingestor::prepare (decode, downmix, resample)
//!                                    │
//!            ┌───────────────────────┼────────────────────────┐
//!     transcribe + text        audio patterns           ML classifier
//!            └───────────────────────┼────────────────────────┘
//!                                    ▼
//!                              FusionPolicy ─► stats, cache ─► result
//! ```
//!
//! Only ingestion failures leave [`VoicemailDetector::analyze`] as errors.
//! Each analyzer runs behind a guard that turns errors and panics into a
//! zero-confidence opinion carrying the message.
//!
//! ## Threading
//!
//! `analyze` runs on the caller's thread. `submit` hands the job to the
//! queue's single worker thread. Both share one `Pipeline` through an `Arc`;
//! its mutable parts (cache, model slot, counters) have their own locks.

pub mod cache;
pub mod config;
pub mod fusion;
pub mod queue;
pub mod stats;

pub use config::{DetectorConfig, TranscriptionConfig};
pub use fusion::FusionPolicy;
pub use queue::{AnalysisJob, JobCallback, JobQueue};

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};

use crate::analysis::{AudioPatternAnalyzer, PhraseLexicon, SubAnalysisResult, TextAnalyzer};
use crate::audio::decode::AudioDecoder;
use crate::audio::{content_hash, AudioSource, Ingestor};
use crate::classifier::{
    training, ClassifierAdapter, FitOptions, LabeledSample, ModelSlot, TrainingReport,
    VoicemailModel,
};
use crate::error::{DetectError, Result};
use crate::report::{DetectionResult, DetectorStats, JobOutcome, JobTicket};
use crate::transcribe::{Transcriber, TranscriberChain};
use cache::ResultCache;
use stats::StatsCounters;

/// Everything one analysis needs. Shared by the caller thread and the worker.
struct Pipeline {
    config: DetectorConfig,
    ingestor: Ingestor,
    transcriber: TranscriberChain,
    text: TextAnalyzer,
    audio: AudioPatternAnalyzer,
    classifier: ClassifierAdapter,
    fusion: FusionPolicy,
    cache: ResultCache,
    stats: StatsCounters,
}

impl Pipeline {
    fn analyze(&self, source: &AudioSource, language: &str) -> Result<DetectionResult> {
        let started = Instant::now();
        // Must be read before the classifier runs.
        let generation = self.cache.generation();
        let language = match language.trim() {
            "" => self.config.default_language.as_str(),
            lang => lang,
        };

        let hash = match content_hash(source) {
            Ok(h) => Some(h),
            Err(e @ DetectError::SourceNotFound { .. }) => {
                self.stats.record_error();
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, "content hash unavailable; result will not be cached");
                None
            }
        };

        let span = info_span!(
            "analysis",
            hash = hash.as_deref().map(short_hash).unwrap_or("-"),
            language
        );
        let _enter = span.enter();

        if let Some(mut cached) = hash.as_deref().and_then(|h| self.cache.get(h)) {
            cached.from_cache = true;
            cached.analysis_time_seconds = started.elapsed().as_secs_f64();
            self.stats.record_cache_hit();
            debug!("served from cache");
            return Ok(cached);
        }

        let prepared = self.ingestor.prepare(source).inspect_err(|e| {
            self.stats.record_error();
            warn!(source = %source.describe(), error = %e, "ingestion failed");
        })?;
        let audio = Arc::clone(&prepared.buffer);

        let text = run_guarded("text", || {
            let transcript = self.transcriber.transcribe(&audio, language);
            Ok(self.text.analyze(transcript.as_deref(), language))
        });
        let audio_result = run_guarded("audio", || Ok(self.audio.analyze(&audio)));
        let ai = run_guarded("ai", || Ok(self.classifier.classify(&audio)));

        let mut result = self.fusion.decide(text, audio_result, ai);
        result.analysis_time_seconds = started.elapsed().as_secs_f64();
        result.content_hash = hash.clone();

        self.stats.record(&result);
        if let Some(h) = hash {
            if !self.cache.insert_at(h, result.clone(), generation) {
                debug!("result not cached");
            }
        }

        // Scratch file (if any) is removed only now, after every analyzer ran.
        drop(prepared);

        info!(
            is_voicemail = result.is_voicemail,
            confidence = result.confidence,
            method = ?result.method,
            elapsed_ms = (result.analysis_time_seconds * 1_000.0) as u64,
            "analysis complete"
        );
        Ok(result)
    }
}

/// Run one analyzer; errors and panics become a failed opinion.
fn run_guarded<F>(name: &str, f: F) -> SubAnalysisResult
where
    F: FnOnce() -> Result<SubAnalysisResult>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(analyzer = name, error = %e, "analyzer failed");
            SubAnalysisResult::failed(e.to_string())
        }
        Err(payload) => {
            let msg = queue::panic_message(payload.as_ref());
            error!(analyzer = name, panic = %msg, "analyzer panicked");
            SubAnalysisResult::failed(format!("{name} analyzer panicked: {msg}"))
        }
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Builder for a detector with injected backends.
pub struct DetectorBuilder {
    config: DetectorConfig,
    transcribers: Option<Vec<Arc<dyn Transcriber>>>,
    model: Option<Arc<dyn VoicemailModel>>,
    decoders: Option<Vec<Box<dyn AudioDecoder>>>,
}

impl DetectorBuilder {
    /// Replace the configured transcription backends.
    pub fn transcribers(mut self, transcribers: Vec<Arc<dyn Transcriber>>) -> Self {
        self.transcribers = Some(transcribers);
        self
    }

    /// Start with an in-memory model instead of loading `aiModelPath`.
    pub fn model(mut self, model: Arc<dyn VoicemailModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Replace the decoding strategy order.
    pub fn decoders(mut self, decoders: Vec<Box<dyn AudioDecoder>>) -> Self {
        self.decoders = Some(decoders);
        self
    }

    pub fn build(self) -> VoicemailDetector {
        let mut config = self.config;
        config.normalize();

        let temp_dir = config.resolved_temp_dir();
        let ingestor = match self.decoders {
            Some(decoders) => {
                Ingestor::with_decoders(temp_dir.clone(), config.analysis_sample_rate, decoders)
            }
            None => Ingestor::new(temp_dir.clone(), config.analysis_sample_rate),
        };

        let transcriber = match self.transcribers {
            Some(backends) => TranscriberChain::new(
                backends,
                Duration::from_secs_f64(config.transcription.timeout_secs),
            ),
            None => TranscriberChain::from_config(&config.transcription, &temp_dir),
        };

        let slot = match self.model {
            Some(model) => ModelSlot::with_model(model),
            None => ModelSlot::new(config.ai_model_path.clone()),
        };

        let lexicon =
            PhraseLexicon::with_overrides(&config.default_language, &config.lexicon_overrides);

        info!(
            transcribers = ?transcriber.backend_names(),
            use_ai = config.use_ai,
            cache_capacity = config.cache_capacity,
            sample_rate = ?config.analysis_sample_rate,
            "voicemail detector ready"
        );

        let pipeline = Arc::new(Pipeline {
            ingestor,
            transcriber,
            text: TextAnalyzer::new(lexicon),
            audio: AudioPatternAnalyzer::new(config.beep.clone(), config.silence.clone()),
            classifier: ClassifierAdapter::new(config.use_ai, config.ai_threshold, Arc::new(slot)),
            fusion: FusionPolicy::new(config.ai_threshold),
            cache: ResultCache::new(config.cache_capacity),
            stats: StatsCounters::default(),
            config,
        });

        let worker_pipeline = Arc::clone(&pipeline);
        let queue = JobQueue::new(Arc::new(move |job: &AnalysisJob| {
            worker_pipeline.analyze(&job.source, &job.language)
        }));

        VoicemailDetector { pipeline, queue }
    }
}

/// Multi-signal voicemail detector.
///
/// `Send + Sync`; wrap in an `Arc` to share. Dropping it shuts the queue down
/// after the jobs already queued have run.
pub struct VoicemailDetector {
    pipeline: Arc<Pipeline>,
    queue: JobQueue,
}

impl VoicemailDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: DetectorConfig) -> DetectorBuilder {
        DetectorBuilder {
            config,
            transcribers: None,
            model: None,
            decoders: None,
        }
    }

    /// Normalized configuration in use.
    pub fn config(&self) -> &DetectorConfig {
        &self.pipeline.config
    }

    /// Analyze on the calling thread.
    ///
    /// An empty `language` means the configured default.
    ///
    /// # Errors
    /// - `DetectError::SourceNotFound` for a missing path.
    /// - `DetectError::UnsupportedFormat` when no decoder accepts the input.
    pub fn analyze(&self, source: impl Into<AudioSource>, language: &str) -> Result<DetectionResult> {
        self.pipeline.analyze(&source.into(), language)
    }

    /// Queue an analysis for the background worker.
    ///
    /// # Errors
    /// `DetectError::QueueClosed` after [`VoicemailDetector::shutdown`].
    pub fn submit(
        &self,
        source: impl Into<AudioSource>,
        language: &str,
        callback: Option<JobCallback>,
    ) -> Result<JobTicket> {
        let language = match language.trim() {
            "" => self.pipeline.config.default_language.as_str(),
            lang => lang,
        };
        self.queue.submit(source.into(), language, callback)
    }

    /// Cancel a job that has not started. See [`JobQueue::cancel`].
    pub fn cancel(&self, job_id: &str) -> bool {
        self.queue.cancel(job_id)
    }

    /// Subscribe to every job outcome.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<JobOutcome> {
        self.queue.subscribe()
    }

    /// Jobs queued but not started.
    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> DetectorStats {
        self.pipeline.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.pipeline.stats.reset();
    }

    pub fn cached_results(&self) -> usize {
        self.pipeline.cache.len()
    }

    pub fn clear_cache(&self) {
        self.pipeline.cache.clear();
    }

    /// Drop the loaded model; the next analysis reloads it from `aiModelPath`.
    pub fn reset_model(&self) {
        self.pipeline.classifier.slot().reset();
    }

    pub fn model_loaded(&self) -> bool {
        self.pipeline.classifier.slot().is_loaded()
    }

    /// Train a new model and swap it in.
    ///
    /// Returns false (keeping the current model) when no sample yields
    /// features or the artifact cannot be written to `output`.
    pub fn train(&self, samples: &[LabeledSample], output: Option<&Path>) -> bool {
        match self.train_with_report(samples, output) {
            Ok(report) => {
                info!(
                    used = report.samples_used,
                    accuracy = ?report.holdout_accuracy,
                    "model replaced"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "training failed; keeping current model");
                false
            }
        }
    }

    /// Like [`VoicemailDetector::train`] but reports why it failed.
    pub fn train_with_report(
        &self,
        samples: &[LabeledSample],
        output: Option<&Path>,
    ) -> Result<TrainingReport> {
        let (model, report) =
            training::train(&self.pipeline.ingestor, samples, output, FitOptions::default())?;
        self.pipeline.classifier.slot().replace(Arc::new(model));
        // Cached verdicts were produced by the previous model.
        self.pipeline.cache.clear();
        Ok(report)
    }

    /// Stop accepting jobs, finish the queued ones and join the worker.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

impl std::fmt::Debug for VoicemailDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicemailDetector")
            .field("transcriber", &self.pipeline.transcriber)
            .field("cache", &self.pipeline.cache)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::DetectionMethod;
    use crate::transcribe::StubTranscriber;

    fn wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut w = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                w.write_sample((s * 32_767.0) as i16).unwrap();
            }
            w.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn detector(transcript: &str, dir: &Path) -> VoicemailDetector {
        let config = DetectorConfig {
            temp_dir: Some(dir.to_path_buf()),
            ..DetectorConfig::default()
        };
        let stub: Arc<dyn Transcriber> = Arc::new(StubTranscriber::new("stub").with_response(transcript));
        VoicemailDetector::builder(config).transcribers(vec![stub]).build()
    }

    #[test]
    fn guard_turns_panics_into_failed_opinions() {
        let r = run_guarded("audio", || panic!("bad math"));
        assert!(!r.is_voicemail_signal);
        assert_eq!(r.confidence, 0.0);
        assert!(r.error.as_deref().unwrap().contains("bad math"));

        let r = run_guarded("text", || Err(DetectError::Model("nope".into())));
        assert!(r.error.as_deref().unwrap().contains("nope"));
    }

    #[test]
    fn strong_transcript_decides_by_text() {
        let dir = tempfile::tempdir().unwrap();
        let d = detector(
            "Hi, I'm not available. Please leave a message after the tone.",
            dir.path(),
        );
        let r = d.analyze(wav(&[0.0; 8_000], 16_000), "en-US").unwrap();
        assert!(r.is_voicemail);
        assert_eq!(r.method, DetectionMethod::Text);
        assert!(r.transcript.is_some());
        assert_eq!(r.content_hash.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn empty_language_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let d = detector("please leave a message", dir.path());
        let r = d.analyze(wav(&[0.0; 8_000], 16_000), "  ").unwrap();
        match &r.sub_results.text.evidence {
            crate::analysis::Evidence::Text(t) => assert_eq!(t.language, "pt-BR"),
            other => panic!("unexpected evidence {other:?}"),
        }
    }

    #[test]
    fn ingestion_failure_is_counted_and_returned() {
        let dir = tempfile::tempdir().unwrap();
        let d = detector("", dir.path());
        assert!(matches!(
            d.analyze(b"definitely not audio".to_vec(), "en-US"),
            Err(DetectError::UnsupportedFormat(_))
        ));
        assert_eq!(d.stats().errors, 1);
        assert_eq!(d.stats().total_analyzed, 0);
    }

    #[test]
    fn disabled_ai_reports_disabled_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let config = DetectorConfig {
            use_ai: false,
            temp_dir: Some(dir.path().to_path_buf()),
            ..DetectorConfig::default()
        };
        let d = VoicemailDetector::builder(config).transcribers(Vec::new()).build();
        let r = d.analyze(wav(&[0.0; 4_000], 8_000), "").unwrap();
        assert_eq!(r.sub_results.ai.evidence, crate::analysis::Evidence::Disabled);
        assert!(!r.is_voicemail);
    }
}
