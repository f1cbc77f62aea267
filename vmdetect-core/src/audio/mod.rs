//! Audio ingestion and normalization.
//!
//! # Contract
//!
//! Whatever the telephony layer hands us (a recording on disk or an in-memory
//! byte stream) becomes one [`AudioBuffer`]: mono f32 samples at a uniform
//! analysis rate. Analyzers never see codecs, channel layouts or rates.
//!
//! Byte buffers are persisted to a scratch file first so every decoding
//! strategy can work from a path. The scratch file lives inside the returned
//! [`PreparedAudio`] guard and is removed when the guard drops, on every exit
//! path.

pub mod decode;
pub mod resample;

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{DetectError, Result};
use decode::{default_decoders, AudioDecoder, DecodedAudio};

/// A decoded, normalized recording. Immutable once produced.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration_seconds = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f64 / sample_rate as f64
        };
        Self {
            samples,
            sample_rate,
            duration_seconds,
        }
    }

    /// Returns true if the buffer contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Where a recording comes from.
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// An existing file on disk.
    Path(PathBuf),
    /// Raw encoded bytes (e.g. a WAV body streamed from the VoIP layer).
    Bytes(Vec<u8>),
}

impl AudioSource {
    /// Short human-readable label for logs.
    pub fn describe(&self) -> String {
        match self {
            AudioSource::Path(p) => p.display().to_string(),
            AudioSource::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }
}

impl From<PathBuf> for AudioSource {
    fn from(path: PathBuf) -> Self {
        AudioSource::Path(path)
    }
}

impl From<&Path> for AudioSource {
    fn from(path: &Path) -> Self {
        AudioSource::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for AudioSource {
    fn from(bytes: Vec<u8>) -> Self {
        AudioSource::Bytes(bytes)
    }
}

/// SHA-256 of the raw input bytes, hex encoded.
///
/// Identical content hashes identically whether it arrives as a path or as
/// bytes, so the result cache is shared across both submission styles.
pub fn content_hash(source: &AudioSource) -> Result<String> {
    let mut hasher = Sha256::new();
    match source {
        AudioSource::Path(path) => {
            let mut file = File::open(path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DetectError::SourceNotFound { path: path.clone() },
                _ => DetectError::Io(e),
            })?;
            std::io::copy(&mut file, &mut hasher)?;
        }
        AudioSource::Bytes(bytes) => hasher.update(bytes),
    }
    Ok(hex_digest(&hasher.finalize()))
}

fn hex_digest(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Normalized audio plus the scratch file (if any) it was decoded from.
///
/// Keep this alive until every analyzer is done; dropping it deletes the
/// scratch file.
pub struct PreparedAudio {
    pub buffer: Arc<AudioBuffer>,
    /// Name of the decoding strategy that succeeded.
    pub decoder: &'static str,
    scratch: Option<NamedTempFile>,
}

impl PreparedAudio {
    /// Path of the scratch copy, when the source was a byte buffer.
    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|f| f.path())
    }
}

impl std::fmt::Debug for PreparedAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedAudio")
            .field("decoder", &self.decoder)
            .field("samples", &self.buffer.samples.len())
            .field("sample_rate", &self.buffer.sample_rate)
            .field("scratch", &self.scratch_path())
            .finish()
    }
}

/// Turns an [`AudioSource`] into an [`AudioBuffer`].
pub struct Ingestor {
    temp_dir: PathBuf,
    /// `None` keeps the decoded rate.
    target_sample_rate: Option<u32>,
    decoders: Vec<Box<dyn AudioDecoder>>,
}

impl Ingestor {
    pub fn new(temp_dir: PathBuf, target_sample_rate: Option<u32>) -> Self {
        Self::with_decoders(temp_dir, target_sample_rate, default_decoders())
    }

    /// Build with an explicit strategy order.
    pub fn with_decoders(
        temp_dir: PathBuf,
        target_sample_rate: Option<u32>,
        decoders: Vec<Box<dyn AudioDecoder>>,
    ) -> Self {
        Self {
            temp_dir,
            target_sample_rate,
            decoders,
        }
    }

    /// Decode `source` into a normalized buffer.
    ///
    /// # Errors
    /// - `DetectError::SourceNotFound` if a path does not exist.
    /// - `DetectError::UnsupportedFormat` if every decoding strategy fails or
    ///   the input holds no samples.
    pub fn normalize(&self, source: &AudioSource) -> Result<AudioBuffer> {
        let prepared = self.prepare(source)?;
        Ok(prepared.buffer.as_ref().clone())
    }

    /// Like [`Ingestor::normalize`], but hands back the scratch-file guard.
    pub fn prepare(&self, source: &AudioSource) -> Result<PreparedAudio> {
        let (path, scratch) = match source {
            AudioSource::Path(path) => {
                if !path.is_file() {
                    return Err(DetectError::SourceNotFound { path: path.clone() });
                }
                (path.clone(), None)
            }
            AudioSource::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Err(DetectError::UnsupportedFormat("empty byte buffer".into()));
                }
                let scratch = self.persist_scratch(bytes)?;
                (scratch.path().to_path_buf(), Some(scratch))
            }
        };

        let (decoded, decoder) = self.decode_with_fallback(&path)?;
        let buffer = self.to_mono_buffer(decoded)?;

        debug!(
            decoder,
            samples = buffer.samples.len(),
            sample_rate = buffer.sample_rate,
            duration_secs = buffer.duration_seconds,
            "audio normalized"
        );

        Ok(PreparedAudio {
            buffer: Arc::new(buffer),
            decoder,
            scratch,
        })
    }

    fn persist_scratch(&self, bytes: &[u8]) -> Result<NamedTempFile> {
        std::fs::create_dir_all(&self.temp_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("vmdetect-")
            .suffix(".audio")
            .tempfile_in(&self.temp_dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(file)
    }

    fn decode_with_fallback(&self, path: &Path) -> Result<(DecodedAudio, &'static str)> {
        let mut failures = Vec::with_capacity(self.decoders.len());

        for decoder in &self.decoders {
            match decoder.decode(path) {
                Ok(decoded) if !decoded.samples.is_empty() && decoded.channels > 0 => {
                    return Ok((decoded, decoder.name()));
                }
                Ok(_) => failures.push(format!("{}: no samples", decoder.name())),
                Err(e) => {
                    debug!(decoder = decoder.name(), "decode attempt failed: {e}");
                    failures.push(format!("{}: {e}", decoder.name()));
                }
            }
        }

        warn!(path = %path.display(), "all decoding strategies failed");
        Err(DetectError::UnsupportedFormat(if failures.is_empty() {
            "no decoders configured".into()
        } else {
            failures.join("; ")
        }))
    }

    fn to_mono_buffer(&self, decoded: DecodedAudio) -> Result<AudioBuffer> {
        let mono = downmix(&decoded.samples, decoded.channels);

        let (samples, sample_rate) = match self.target_sample_rate {
            Some(target) if target != decoded.sample_rate => {
                debug!(
                    from = decoded.sample_rate,
                    to = target,
                    "resampling for analysis"
                );
                (resample::resample_all(&mono, decoded.sample_rate, target)?, target)
            }
            _ => (mono, decoded.sample_rate),
        };

        if samples.is_empty() || sample_rate == 0 {
            return Err(DetectError::UnsupportedFormat("no samples decoded".into()));
        }

        Ok(AudioBuffer::new(samples, sample_rate))
    }
}

/// Average interleaved channels into one.
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels.max(1) as usize;
    if ch == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}
