//! Logistic-regression voicemail model, persisted as a JSON artifact.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::features::FEATURE_NAMES;
use super::VoicemailModel;
use crate::error::{DetectError, Result};

const ARTIFACT_VERSION: u32 = 1;

/// Gradient-descent settings for [`LogisticModel::fit`].
#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub learning_rate: f32,
    pub iterations: usize,
    /// L2 penalty on the weights (not the bias).
    pub l2: f32,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            iterations: 800,
            l2: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogisticModel {
    pub version: u32,
    pub feature_names: Vec<String>,
    /// Per-feature standardization.
    pub means: Vec<f32>,
    pub scales: Vec<f32>,
    pub weights: Vec<f32>,
    pub bias: f32,
    pub trained_at: DateTime<Utc>,
    pub training_samples: usize,
    pub holdout_accuracy: Option<f32>,
}

impl LogisticModel {
    /// Fit on standardized features with batch gradient descent.
    ///
    /// # Errors
    /// `InsufficientData` when `features` is empty; `Model` when rows have
    /// inconsistent lengths or do not match the label count.
    pub fn fit(features: &[Vec<f32>], labels: &[bool], opts: FitOptions) -> Result<Self> {
        let Some(first) = features.first() else {
            return Err(DetectError::InsufficientData("no feature rows".into()));
        };
        let dim = first.len();
        if features.len() != labels.len() {
            return Err(DetectError::Model(format!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            )));
        }
        if features.iter().any(|row| row.len() != dim) {
            return Err(DetectError::Model("ragged feature rows".into()));
        }

        let n = features.len() as f32;
        let means: Vec<f32> = (0..dim)
            .map(|j| features.iter().map(|r| r[j]).sum::<f32>() / n)
            .collect();
        let scales: Vec<f32> = (0..dim)
            .map(|j| {
                let var = features
                    .iter()
                    .map(|r| (r[j] - means[j]).powi(2))
                    .sum::<f32>()
                    / n;
                let sd = var.sqrt();
                if sd > 1e-6 {
                    sd
                } else {
                    1.0
                }
            })
            .collect();

        let standardized: Vec<Vec<f32>> = features
            .iter()
            .map(|r| {
                r.iter()
                    .zip(means.iter().zip(&scales))
                    .map(|(x, (m, s))| (x - m) / s)
                    .collect()
            })
            .collect();
        let targets: Vec<f32> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();

        let mut weights = vec![0.0f32; dim];
        let mut bias = 0.0f32;
        let mut grad = vec![0.0f32; dim];

        for _ in 0..opts.iterations {
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_bias = 0.0f32;

            for (row, &y) in standardized.iter().zip(&targets) {
                let err = sigmoid(dot(&weights, row) + bias) - y;
                for (g, x) in grad.iter_mut().zip(row) {
                    *g += err * x;
                }
                grad_bias += err;
            }

            for (w, g) in weights.iter_mut().zip(&grad) {
                *w -= opts.learning_rate * (g / n + opts.l2 * *w);
            }
            bias -= opts.learning_rate * grad_bias / n;
        }

        debug!(dim, rows = features.len(), "logistic model fitted");

        Ok(Self {
            version: ARTIFACT_VERSION,
            feature_names: if dim == FEATURE_NAMES.len() {
                FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
            } else {
                (0..dim).map(|j| format!("f{j}")).collect()
            },
            means,
            scales,
            weights,
            bias,
            trained_at: Utc::now(),
            training_samples: features.len(),
            holdout_accuracy: None,
        })
    }

    /// Share of rows classified correctly at a 0.5 cut-off.
    pub fn accuracy(&self, features: &[Vec<f32>], labels: &[bool]) -> Option<f32> {
        if features.is_empty() {
            return None;
        }
        let correct = features
            .iter()
            .zip(labels)
            .filter(|(row, &label)| {
                self.predict_proba(row)
                    .map(|p| (p > 0.5) == label)
                    .unwrap_or(false)
            })
            .count();
        Some(correct as f32 / features.len() as f32)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        info!(path = %path.display(), "model saved");
        Ok(())
    }

    /// # Errors
    /// `ModelNotFound` when the file is missing; `Json`/`Model` when the
    /// artifact is unreadable or inconsistent.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DetectError::ModelNotFound {
                path: path.to_path_buf(),
            },
            _ => DetectError::Io(e),
        })?;
        let model: Self = serde_json::from_reader(BufReader::new(file))?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        if self.version != ARTIFACT_VERSION {
            return Err(DetectError::Model(format!(
                "unsupported artifact version {}",
                self.version
            )));
        }
        let dim = self.weights.len();
        if self.means.len() != dim || self.scales.len() != dim || self.feature_names.len() != dim {
            return Err(DetectError::Model("artifact dimensions disagree".into()));
        }
        if self.feature_names.iter().map(String::as_str).ne(FEATURE_NAMES) {
            return Err(DetectError::Model(format!(
                "artifact features {:?} do not match this build",
                self.feature_names
            )));
        }
        if self.scales.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(DetectError::Model("artifact has invalid scales".into()));
        }
        Ok(())
    }
}

impl VoicemailModel for LogisticModel {
    fn name(&self) -> &str {
        "logistic-regression"
    }

    fn predict_proba(&self, features: &[f32]) -> Result<f32> {
        if features.len() != self.weights.len() {
            return Err(DetectError::Model(format!(
                "expected {} features, got {}",
                self.weights.len(),
                features.len()
            )));
        }
        let z: f32 = features
            .iter()
            .zip(self.means.iter().zip(&self.scales))
            .zip(&self.weights)
            .map(|((x, (m, s)), w)| w * (x - m) / s)
            .sum::<f32>()
            + self.bias;
        let p = sigmoid(z);
        if p.is_finite() {
            Ok(p)
        } else {
            Err(DetectError::Model("non-finite prediction".into()))
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}
