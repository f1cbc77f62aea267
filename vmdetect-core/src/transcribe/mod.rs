//! Speech-to-text adapter.
//!
//! `Transcriber` decouples the text analyzer from any specific backend
//! (cloud API, offline whisper.cpp binary, stub). A [`TranscriberChain`] tries
//! backends in order and returns the first non-empty transcript.
//!
//! Every attempt runs on its own thread and is abandoned after the configured
//! timeout, so a hung backend can delay an analysis but never stall it.

pub mod command;
pub mod stub;

#[cfg(feature = "cloud-stt")]
pub mod openai;

pub use command::WhisperCommandTranscriber;
pub use stub::StubTranscriber;

#[cfg(feature = "cloud-stt")]
pub use openai::OpenAiTranscriber;

use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, warn};

use crate::analysis::text::primary_subtag;
use crate::audio::AudioBuffer;
use crate::engine::config::TranscriptionConfig;
use crate::error::{DetectError, Result};

/// Contract for speech-to-text backends.
pub trait Transcriber: Send + Sync + 'static {
    /// Short backend identifier for logs and errors.
    fn name(&self) -> &str;

    /// Transcribe a normalized mono recording.
    ///
    /// `language` is a full tag such as `pt-BR`; backends that only take the
    /// primary subtag should reduce it with [`backend_language`].
    fn transcribe(&self, audio: &AudioBuffer, language: &str) -> Result<String>;
}

/// Ordered list of backends with a per-attempt timeout.
#[derive(Clone)]
pub struct TranscriberChain {
    backends: Vec<Arc<dyn Transcriber>>,
    timeout: Duration,
}

impl TranscriberChain {
    pub fn new(backends: Vec<Arc<dyn Transcriber>>, timeout: Duration) -> Self {
        Self { backends, timeout }
    }

    /// Backends enabled by `config`: cloud first (when a key is set), then
    /// the offline command (when a binary is set).
    pub fn from_config(config: &TranscriptionConfig, temp_dir: &Path) -> Self {
        let timeout = Duration::from_secs_f64(config.timeout_secs);
        let mut backends: Vec<Arc<dyn Transcriber>> = Vec::new();

        #[cfg(feature = "cloud-stt")]
        {
            if let Some(key) = config.openai_api_key.as_deref() {
                backends.push(Arc::new(OpenAiTranscriber::new(
                    key,
                    &config.openai_model,
                    &config.openai_endpoint,
                    timeout,
                )));
            }
        }

        if let Some(command) = config.whisper_command.as_ref() {
            backends.push(Arc::new(WhisperCommandTranscriber::new(
                command.clone(),
                config.whisper_model.clone(),
                temp_dir.to_path_buf(),
                timeout,
            )));
        }

        if backends.is_empty() {
            debug!("no transcription backend configured; text analysis will see no transcript");
        }

        Self::new(backends, timeout)
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// First non-empty transcript, or `None` when every backend failed,
    /// timed out or heard nothing.
    pub fn transcribe(&self, audio: &Arc<AudioBuffer>, language: &str) -> Option<String> {
        for backend in &self.backends {
            let started = Instant::now();
            match self.attempt(backend, audio, language) {
                Ok(text) => {
                    let text = text.trim();
                    if text.is_empty() {
                        debug!(backend = backend.name(), "empty transcript, trying next backend");
                        continue;
                    }
                    debug!(
                        backend = backend.name(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        chars = text.len(),
                        "transcript received"
                    );
                    return Some(text.to_string());
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "transcription backend failed");
                }
            }
        }
        None
    }

    fn attempt(
        &self,
        backend: &Arc<dyn Transcriber>,
        audio: &Arc<AudioBuffer>,
        language: &str,
    ) -> Result<String> {
        let name = backend.name().to_string();
        let (tx, rx) = crossbeam_channel::bounded::<Result<String>>(1);

        let worker_backend = Arc::clone(backend);
        let worker_audio = Arc::clone(audio);
        let worker_language = language.to_string();
        let worker_name = name.clone();

        thread::Builder::new()
            .name(format!("vmdetect-stt-{name}"))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    worker_backend.transcribe(&worker_audio, &worker_language)
                }))
                .unwrap_or_else(|_| {
                    Err(DetectError::Transcription {
                        backend: worker_name,
                        message: "backend panicked".into(),
                    })
                });
                // Receiver is gone after a timeout.
                let _ = tx.send(outcome);
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(DetectError::Timeout {
                what: format!("transcription backend '{name}'"),
                secs: self.timeout.as_secs_f64(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(DetectError::Transcription {
                backend: name,
                message: "worker exited without a result".into(),
            }),
        }
    }
}

impl std::fmt::Debug for TranscriberChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriberChain")
            .field("backends", &self.backend_names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// `pt-BR` → `pt`, the form most speech backends accept.
pub fn backend_language(language: &str) -> String {
    primary_subtag(language).to_ascii_lowercase()
}

/// Encode a buffer as a 16-bit PCM mono WAV file in memory.
pub fn encode_wav_pcm16(audio: &AudioBuffer) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + audio.samples.len() * 2));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| DetectError::Other(e.into()))?;
        for &s in &audio.samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer
                .write_sample(v)
                .map_err(|e| DetectError::Other(e.into()))?;
        }
        writer.finalize().map_err(|e| DetectError::Other(e.into()))?;
    }
    Ok(cursor.into_inner())
}
