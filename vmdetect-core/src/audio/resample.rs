//! Whole-buffer sample-rate conversion on a rubato `FastFixedIn` resampler.
//!
//! Call recordings arrive at whatever rate the telephony layer captured
//! (8 kHz narrowband, 16 kHz wideband, 44.1/48 kHz from softphones). The
//! analyzers are tuned for one rate, so ingestion converts every buffer once.
//!
//! Output is aligned with the input: the resampler's delay is trimmed from the
//! front and the result is exactly `round(len * target / source)` frames.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

use crate::error::{DetectError, Result};

/// Input frames handed to rubato per call.
pub const DEFAULT_CHUNK: usize = 1024;

pub struct RateConverter {
    /// `None` when both rates match.
    resampler: Option<FastFixedIn<f32>>,
    ratio: f64,
    chunk_size: usize,
}

impl RateConverter {
    /// # Errors
    /// `DetectError::UnsupportedFormat` for a zero rate or a rubato init failure.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 || chunk_size == 0 {
            return Err(DetectError::UnsupportedFormat(format!(
                "invalid sample rate conversion {source_rate} -> {target_rate}"
            )));
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = if source_rate == target_rate {
            None
        } else {
            let r = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
                .map_err(|e| DetectError::UnsupportedFormat(format!("resampler init: {e}")))?;
            debug!(source_rate, target_rate, chunk_size, "resampler ready");
            Some(r)
        };

        Ok(Self {
            resampler,
            ratio,
            chunk_size,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Convert a complete mono buffer. The converter is reset afterwards and
    /// can be reused for the next buffer.
    pub fn convert(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(samples.to_vec());
        };

        let expected = (samples.len() as f64 * self.ratio).round() as usize;
        let delay = resampler.output_delay();
        let mut scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];
        let mut out = Vec::with_capacity(expected + delay + scratch[0].len());

        let fail =
            |e: rubato::ResampleError| DetectError::UnsupportedFormat(format!("resampling: {e}"));

        let mut chunks = samples.chunks_exact(self.chunk_size);
        for chunk in &mut chunks {
            let (_, produced) = resampler
                .process_into_buffer(&[chunk], &mut scratch, None)
                .map_err(fail)?;
            out.extend_from_slice(&scratch[0][..produced]);
        }

        let rest = chunks.remainder();
        if !rest.is_empty() {
            let (_, produced) = resampler
                .process_partial_into_buffer(Some(&[rest][..]), &mut scratch, None)
                .map_err(fail)?;
            out.extend_from_slice(&scratch[0][..produced]);
        }

        // Drain the delay line.
        while out.len() < expected + delay {
            let (_, produced) = resampler
                .process_partial_into_buffer(None::<&[&[f32]]>, &mut scratch, None)
                .map_err(fail)?;
            if produced == 0 {
                break;
            }
            out.extend_from_slice(&scratch[0][..produced]);
        }
        resampler.reset();

        let mut aligned = out.split_off(delay.min(out.len()));
        aligned.resize(expected, 0.0);
        Ok(aligned)
    }
}

/// Resample a complete buffer in one call.
pub fn resample_all(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    RateConverter::new(source_rate, target_rate, DEFAULT_CHUNK)?.convert(samples)
}
