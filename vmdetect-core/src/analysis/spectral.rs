//! Spectral and envelope primitives shared by the pattern detectors.

use std::ops::Range;

use rustfft::{num_complex::Complex, FftPlanner};

/// Short-time power spectrum.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// Bin centre frequencies (Hz), length `nperseg / 2 + 1`.
    pub freqs: Vec<f32>,
    /// Segment centre times (s), one per frame.
    pub times: Vec<f32>,
    /// `power[frame][bin]`.
    pub power: Vec<Vec<f32>>,
    /// Seconds between consecutive frames.
    pub frame_step: f32,
}

impl Spectrogram {
    /// Compute a Hann-windowed power spectrogram.
    ///
    /// Segments of `nperseg` samples overlap by `nperseg / 8`. Inputs shorter
    /// than one segment are zero-padded into a single frame.
    pub fn compute(samples: &[f32], sample_rate: u32, nperseg: usize) -> Self {
        let nperseg = nperseg.max(16);
        let hop = nperseg - nperseg / 8;
        let sr = sample_rate.max(1) as f32;
        let n_bins = nperseg / 2 + 1;

        let freqs = (0..n_bins)
            .map(|k| k as f32 * sr / nperseg as f32)
            .collect();

        let window = hann_window(nperseg);
        let win_energy: f32 = window.iter().map(|w| w * w).sum::<f32>().max(1e-12);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(nperseg);

        let n_frames = if samples.len() <= nperseg {
            1
        } else {
            (samples.len() - nperseg) / hop + 1
        };

        let mut power = Vec::with_capacity(n_frames);
        let mut times = Vec::with_capacity(n_frames);
        let mut buf = vec![Complex::new(0.0f32, 0.0); nperseg];

        for frame in 0..n_frames {
            let start = frame * hop;
            for (i, slot) in buf.iter_mut().enumerate() {
                let s = samples.get(start + i).copied().unwrap_or(0.0);
                *slot = Complex::new(s * window[i], 0.0);
            }
            fft.process(&mut buf);

            let row: Vec<f32> = buf[..n_bins]
                .iter()
                .map(|c| c.norm_sqr() / (sr * win_energy))
                .collect();
            power.push(row);
            times.push((start + nperseg / 2) as f32 / sr);
        }

        Self {
            freqs,
            times,
            power,
            frame_step: hop as f32 / sr,
        }
    }

    /// Summed power per frame over bins whose frequency lies in `[lo, hi]`.
    /// Returns `None` when no bin falls inside the band.
    pub fn band_power(&self, lo: f32, hi: f32) -> Option<Vec<f32>> {
        let bins: Vec<usize> = self
            .freqs
            .iter()
            .enumerate()
            .filter(|(_, &f)| f >= lo && f <= hi)
            .map(|(k, _)| k)
            .collect();
        if bins.is_empty() {
            return None;
        }
        Some(
            self.power
                .iter()
                .map(|row| bins.iter().map(|&k| row[k]).sum())
                .collect(),
        )
    }
}

/// Magnitude of the analytic signal (FFT-based Hilbert transform).
pub fn amplitude_envelope(samples: &[f32]) -> Vec<f32> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut buf: Vec<Complex<f32>> = samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
    forward.process(&mut buf);

    // Keep DC (and Nyquist for even n), double positive frequencies, zero the rest.
    let half = n / 2;
    for (k, v) in buf.iter_mut().enumerate() {
        let h = if k == 0 || (n % 2 == 0 && k == half) {
            1.0
        } else if k < (n + 1) / 2 {
            2.0
        } else {
            0.0
        };
        *v *= h;
    }

    inverse.process(&mut buf);
    let scale = 1.0 / n as f32;
    buf.iter().map(|c| c.norm() * scale).collect()
}

/// Contiguous runs of `true` in `mask`, as index ranges.
pub fn contiguous_regions(mask: &[bool]) -> Vec<Range<usize>> {
    let mut regions = Vec::new();
    let mut start: Option<usize> = None;
    for (i, &m) in mask.iter().enumerate() {
        match (m, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                regions.push(s..i);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        regions.push(s..mask.len());
    }
    regions
}

/// RMS of consecutive non-overlapping frames of `frame_len` samples.
/// A trailing partial frame is included.
pub fn frame_rms(samples: &[f32], frame_len: usize) -> Vec<f32> {
    samples
        .chunks(frame_len.max(1))
        .map(|frame| {
            let sum_sq: f32 = frame.iter().map(|s| s * s).sum();
            (sum_sq / frame.len() as f32).sqrt()
        })
        .collect()
}

pub fn hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Population standard deviation.
pub fn std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / values.len() as f32;
    var.sqrt()
}

#[cfg(test)]
pub(crate) mod test_signals {
    //! Deterministic synthetic audio for detector tests.

    use std::f32::consts::PI;

    pub const SR: u32 = 16_000;

    pub fn tone(freq: f32, secs: f32, amp: f32) -> Vec<f32> {
        let n = (secs * SR as f32) as usize;
        (0..n)
            .map(|i| amp * (2.0 * PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    pub fn silence(secs: f32) -> Vec<f32> {
        vec![0.0; (secs * SR as f32) as usize]
    }

    /// Low-level pseudo-random noise (LCG, reproducible).
    pub fn noise(secs: f32, amp: f32, seed: u32) -> Vec<f32> {
        let n = (secs * SR as f32) as usize;
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                amp * ((state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0)
            })
            .collect()
    }

    /// Amplitude-modulated harmonic "voice" at a fixed pitch.
    pub fn voiced(pitch: f32, secs: f32, amp: f32) -> Vec<f32> {
        let n = (secs * SR as f32) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / SR as f32;
                let carrier = (2.0 * PI * pitch * t).sin()
                    + 0.5 * (2.0 * PI * 2.0 * pitch * t).sin()
                    + 0.25 * (2.0 * PI * 3.0 * pitch * t).sin();
                amp * 0.57 * carrier
            })
            .collect()
    }

    pub fn concat(parts: &[Vec<f32>]) -> Vec<f32> {
        parts.iter().flat_map(|p| p.iter().copied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_signals::*;
    use super::*;

    #[test]
    fn contiguous_regions_finds_runs() {
        let mask = [false, true, true, false, true, false, false, true];
        assert_eq!(contiguous_regions(&mask), vec![1..3, 4..5, 7..8]);
        assert!(contiguous_regions(&[false, false]).is_empty());
    }

    #[test]
    fn spectrogram_peaks_at_tone_frequency() {
        let spec = Spectrogram::compute(&tone(1_000.0, 0.5, 0.5), SR, 1024);
        let row = &spec.power[spec.power.len() / 2];
        let (peak_bin, _) = row
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |acc, (k, &p)| if p > acc.1 { (k, p) } else { acc });
        assert!((spec.freqs[peak_bin] - 1_000.0).abs() < 16.0);
        assert!((spec.frame_step - 896.0 / 16_000.0).abs() < 1e-6);
    }

    #[test]
    fn short_input_yields_single_frame() {
        let spec = Spectrogram::compute(&[0.1; 100], SR, 1024);
        assert_eq!(spec.power.len(), 1);
        assert_eq!(spec.times.len(), 1);
    }

    #[test]
    fn band_power_none_when_band_outside_spectrum() {
        let spec = Spectrogram::compute(&tone(440.0, 0.2, 0.5), 2_000, 256);
        assert!(spec.band_power(1_500.0, 1_800.0).is_none());
    }

    #[test]
    fn envelope_of_sine_is_flat() {
        let env = amplitude_envelope(&tone(500.0, 0.5, 0.4));
        let mid = &env[1_000..env.len() - 1_000];
        assert!(mid.iter().all(|v| (v - 0.4).abs() < 0.02));
    }

    #[test]
    fn frame_rms_of_constant_signal() {
        let rms = frame_rms(&[0.5; 1000], 320);
        assert_eq!(rms.len(), 4);
        assert!(rms.iter().all(|r| (r - 0.5).abs() < 1e-6));
    }
}
