//! OpenAI-compatible cloud transcription.
//!
//! Uploads the recording as a 16-bit PCM WAV (multipart `file` field) and
//! reads the `text` field of the JSON response.

use std::time::Duration;

use reqwest::blocking::multipart;
use tracing::debug;

use crate::audio::AudioBuffer;
use crate::error::{DetectError, Result};
use crate::transcribe::{backend_language, encode_wav_pcm16, Transcriber};

const NAME: &str = "openai";

pub struct OpenAiTranscriber {
    api_key: String,
    model: String,
    endpoint: String,
    timeout: Duration,
}

impl OpenAiTranscriber {
    pub fn new(api_key: &str, model: &str, endpoint: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint: endpoint.to_string(),
            timeout,
        }
    }

    fn fail(message: impl Into<String>) -> DetectError {
        DetectError::Transcription {
            backend: NAME.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Debug for OpenAiTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiTranscriber")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Transcriber for OpenAiTranscriber {
    fn name(&self) -> &str {
        NAME
    }

    fn transcribe(&self, audio: &AudioBuffer, language: &str) -> Result<String> {
        if audio.is_empty() {
            return Ok(String::new());
        }

        let wav = encode_wav_pcm16(audio)?;
        let file_part = multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Self::fail(format!("multipart file part: {e}")))?;
        let form = multipart::Form::new()
            .text("model", self.model.clone())
            .text("language", backend_language(language))
            .text("response_format", "json")
            .part("file", file_part);

        // Built per call: the blocking client must not be created on an async runtime thread.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Self::fail(format!("client build: {e}")))?;

        let response = client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    DetectError::Timeout {
                        what: "openai transcription request".into(),
                        secs: self.timeout.as_secs_f64(),
                    }
                } else {
                    Self::fail(format!("request: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::fail(format!("non-success status {status}")));
        }

        let payload: serde_json::Value = response
            .json()
            .map_err(|e| Self::fail(format!("json parse: {e}")))?;
        let text = payload
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Self::fail("response has no 'text' field"))?
            .trim()
            .to_string();

        debug!(chars = text.len(), "cloud transcript received");
        Ok(text)
    }
}
