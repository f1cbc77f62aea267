//! `StubTranscriber`: fixed-text backend for development and tests.
//!
//! Returns a canned transcript without looking at the audio. Can be told to
//! fail, panic or stall so the chain's degradation paths can be exercised.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::audio::AudioBuffer;
use crate::error::{DetectError, Result};
use crate::transcribe::Transcriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Respond,
    Fail,
    Panic,
}

#[derive(Debug)]
pub struct StubTranscriber {
    name: String,
    response: String,
    mode: Mode,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubTranscriber {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            response: String::new(),
            mode: Mode::Respond,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.mode = Mode::Fail;
        self
    }

    pub fn with_panic(mut self) -> Self {
        self.mode = Mode::Panic;
        self
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `transcribe` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for StubTranscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn transcribe(&self, audio: &AudioBuffer, language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(
            backend = %self.name,
            samples = audio.samples.len(),
            language,
            "stub transcription"
        );

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        match self.mode {
            Mode::Respond => Ok(self.response.clone()),
            Mode::Fail => Err(DetectError::Transcription {
                backend: self.name.clone(),
                message: "stub failure".into(),
            }),
            Mode::Panic => panic!("stub transcriber '{}' panicked", self.name),
        }
    }
}
