//! Decoding strategies.
//!
//! Ingestion never depends on a single codec library succeeding: it walks an
//! ordered list of [`AudioDecoder`]s and keeps the first one that parses the
//! file. `hound` handles the common PCM/float WAV case cheaply; `symphonia`
//! probes everything else (MP3, FLAC, OGG/Vorbis, AAC in MP4, μ-law WAV, ...).

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::warn;

use crate::error::{DetectError, Result};

/// Interleaved samples exactly as decoded, before downmix/resample.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// One decoding strategy.
pub trait AudioDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode the whole file at `path`.
    ///
    /// # Errors
    /// Returns `DetectError::UnsupportedFormat` when this strategy cannot
    /// parse the input; ingestion then moves on to the next strategy.
    fn decode(&self, path: &Path) -> Result<DecodedAudio>;
}

/// The built-in strategy order: WAV first, generic probe second.
pub fn default_decoders() -> Vec<Box<dyn AudioDecoder>> {
    vec![Box::new(WavDecoder), Box::new(SymphoniaDecoder)]
}

// ── hound ────────────────────────────────────────────────────────────────────

/// RIFF/WAVE reader for integer PCM and IEEE float payloads.
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn name(&self) -> &'static str {
        "hound-wav"
    }

    fn decode(&self, path: &Path) -> Result<DecodedAudio> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| DetectError::UnsupportedFormat(format!("wav: {e}")))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| DetectError::UnsupportedFormat(format!("wav: {e}")))?,
            hound::SampleFormat::Int => {
                let bits = spec.bits_per_sample.clamp(1, 32);
                let scale = (1i64 << (bits - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| DetectError::UnsupportedFormat(format!("wav: {e}")))?
            }
        };

        Ok(DecodedAudio {
            samples,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }
}

// ── symphonia ────────────────────────────────────────────────────────────────

/// Container/codec probe covering everything symphonia's default registry knows.
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn decode(&self, path: &Path) -> Result<DecodedAudio> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DetectError::UnsupportedFormat(format!("probe: {e}")))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DetectError::UnsupportedFormat("no audio track found".into()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| DetectError::UnsupportedFormat("unknown sample rate".into()))?;
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(1);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DetectError::UnsupportedFormat(format!("codec: {e}")))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    warn!("error reading packet: {e}");
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("error decoding packet: {e}");
                    continue;
                }
            };

            if sample_buf.is_none() {
                let spec = *decoded.spec();
                channels = spec.channels.count() as u16;
                sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }

            if let Some(ref mut buf) = sample_buf {
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
        }

        Ok(DecodedAudio {
            samples,
            sample_rate,
            channels,
        })
    }
}
