//! Model training: labeled recordings → features → fitted artifact.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::features::extract_features;
use super::logistic::{FitOptions, LogisticModel};
use crate::audio::{AudioSource, Ingestor};
use crate::error::{DetectError, Result};

const SPLIT_SEED: u64 = 42;
/// One in five rows (rounded up) is held out.
const HOLDOUT_DIVISOR: usize = 5;

#[derive(Debug, Clone)]
pub struct LabeledSample {
    pub source: AudioSource,
    pub is_voicemail: bool,
}

impl LabeledSample {
    pub fn new(source: impl Into<AudioSource>, is_voicemail: bool) -> Self {
        Self {
            source: source.into(),
            is_voicemail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingReport {
    pub samples_used: usize,
    pub samples_skipped: usize,
    pub train_size: usize,
    pub test_size: usize,
    pub holdout_accuracy: Option<f32>,
    pub saved_to: Option<PathBuf>,
}

/// Extract features, split 80/20 with a fixed seed, fit, evaluate and
/// optionally persist.
///
/// # Errors
/// - `InsufficientData` when no sample yields features.
/// - Any persistence error when `output` is set; the fitted model is then
///   discarded.
pub fn train(
    ingestor: &Ingestor,
    samples: &[LabeledSample],
    output: Option<&Path>,
    opts: FitOptions,
) -> Result<(LogisticModel, TrainingReport)> {
    let mut rows = Vec::with_capacity(samples.len());
    let mut labels = Vec::with_capacity(samples.len());
    let mut skipped = 0usize;

    for sample in samples {
        let features = ingestor
            .prepare(&sample.source)
            .and_then(|prepared| extract_features(&prepared.buffer));
        match features {
            Ok(f) => {
                rows.push(f);
                labels.push(sample.is_voicemail);
            }
            Err(e) => {
                skipped += 1;
                warn!(source = %sample.source.describe(), error = %e, "training sample skipped");
            }
        }
    }

    if rows.is_empty() {
        return Err(DetectError::InsufficientData(format!(
            "none of {} samples produced features",
            samples.len()
        )));
    }

    let (train_idx, test_idx) = split_indices(rows.len());
    let pick = |idx: &[usize]| -> (Vec<Vec<f32>>, Vec<bool>) {
        idx.iter().map(|&i| (rows[i].clone(), labels[i])).unzip()
    };
    let (train_x, train_y) = pick(&train_idx);
    let (test_x, test_y) = pick(&test_idx);

    let mut model = LogisticModel::fit(&train_x, &train_y, opts)?;
    model.holdout_accuracy = model.accuracy(&test_x, &test_y);

    info!(
        used = rows.len(),
        skipped,
        train = train_x.len(),
        test = test_x.len(),
        accuracy = ?model.holdout_accuracy,
        "voicemail model trained"
    );

    if let Some(path) = output {
        model.save(path)?;
    }

    let report = TrainingReport {
        samples_used: rows.len(),
        samples_skipped: skipped,
        train_size: train_x.len(),
        test_size: test_x.len(),
        holdout_accuracy: model.holdout_accuracy,
        saved_to: output.map(Path::to_path_buf),
    };
    Ok((model, report))
}

/// Deterministic shuffled 80/20 split. Fewer than two rows → no test set.
pub fn split_indices(n: usize) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(SPLIT_SEED));
    let test = if n < 2 {
        0
    } else {
        n.div_ceil(HOLDOUT_DIVISOR).min(n - 1)
    };
    let train = idx.split_off(test);
    (train, idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_is_deterministic_and_complete() {
        let (train_a, test_a) = split_indices(10);
        let (train_b, test_b) = split_indices(10);
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!(test_a.len(), 2);
        assert_eq!(train_a.len(), 8);

        let mut all: Vec<usize> = train_a.into_iter().chain(test_a).collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn tiny_sets_keep_one_training_row() {
        assert_eq!(split_indices(1), (vec![0], vec![]));
        let (train, test) = split_indices(2);
        assert_eq!(train.len(), 1);
        assert_eq!(test.len(), 1);
    }

    #[test]
    fn no_usable_samples_is_insufficient_data() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = Ingestor::new(dir.path().to_path_buf(), Some(16_000));
        let samples = vec![
            LabeledSample::new(b"garbage".to_vec(), true),
            LabeledSample::new(dir.path().join("missing.wav"), false),
        ];
        assert!(matches!(
            train(&ingestor, &samples, None, FitOptions::default()),
            Err(DetectError::InsufficientData(_))
        ));
    }
}
