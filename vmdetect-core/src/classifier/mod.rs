//! Optional machine-learned voicemail classifier.
//!
//! The classifier is a third, optional opinion. Missing artifacts, load
//! failures and prediction errors all degrade to a zero-confidence negative
//! result; this module never fails an analysis.

pub mod features;
pub mod logistic;
pub mod training;

pub use features::{extract_features, FEATURE_COUNT, FEATURE_NAMES};
pub use logistic::{FitOptions, LogisticModel};
pub use training::{LabeledSample, TrainingReport};

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::analysis::{AiEvidence, Evidence, SubAnalysisResult};
use crate::audio::AudioBuffer;
use crate::error::Result;

/// Contract for trained voicemail models.
pub trait VoicemailModel: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Probability in [0, 1] that the features describe a voicemail greeting.
    fn predict_proba(&self, features: &[f32]) -> Result<f32>;
}

enum SlotState {
    Unloaded,
    Loaded(Arc<dyn VoicemailModel>),
    /// Load was attempted and there is no usable model.
    Missing,
}

/// Lazily loaded model, initialised at most once until reset or replaced.
pub struct ModelSlot {
    path: Option<PathBuf>,
    state: Mutex<SlotState>,
}

impl ModelSlot {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            state: Mutex::new(SlotState::Unloaded),
        }
    }

    /// Slot pre-filled with an in-memory model.
    pub fn with_model(model: Arc<dyn VoicemailModel>) -> Self {
        Self {
            path: None,
            state: Mutex::new(SlotState::Loaded(model)),
        }
    }

    /// The model, loading it on first use.
    pub fn get(&self) -> Option<Arc<dyn VoicemailModel>> {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Unloaded) {
            *state = self.load();
        }
        match &*state {
            SlotState::Loaded(model) => Some(Arc::clone(model)),
            _ => None,
        }
    }

    fn load(&self) -> SlotState {
        let Some(path) = self.path.as_deref() else {
            debug!("no model path configured");
            return SlotState::Missing;
        };
        match LogisticModel::load(path) {
            Ok(model) => {
                info!(path = %path.display(), "voicemail model loaded");
                SlotState::Loaded(Arc::new(model))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "voicemail model unavailable");
                SlotState::Missing
            }
        }
    }

    /// Forget the current model; the next `get` loads again.
    pub fn reset(&self) {
        *self.state.lock() = SlotState::Unloaded;
    }

    pub fn replace(&self, model: Arc<dyn VoicemailModel>) {
        *self.state.lock() = SlotState::Loaded(model);
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Loaded(_))
    }
}

impl std::fmt::Debug for ModelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSlot")
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Turns a model probability into a [`SubAnalysisResult`].
#[derive(Debug, Clone)]
pub struct ClassifierAdapter {
    enabled: bool,
    threshold: f32,
    slot: Arc<ModelSlot>,
}

impl ClassifierAdapter {
    pub fn new(enabled: bool, threshold: f32, slot: Arc<ModelSlot>) -> Self {
        Self {
            enabled,
            threshold,
            slot,
        }
    }

    pub fn slot(&self) -> &Arc<ModelSlot> {
        &self.slot
    }

    pub fn classify(&self, audio: &AudioBuffer) -> SubAnalysisResult {
        if !self.enabled {
            return SubAnalysisResult::disabled();
        }

        let evidence = |raw_score, model: Option<&str>, features: Vec<f32>| {
            Evidence::Ai(AiEvidence {
                raw_score,
                model: model.map(str::to_string),
                features,
            })
        };

        let features = match extract_features(audio) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "classifier features unavailable");
                return SubAnalysisResult {
                    error: Some(e.to_string()),
                    ..SubAnalysisResult::negative(evidence(None, None, Vec::new()))
                };
            }
        };

        let Some(model) = self.slot.get() else {
            return SubAnalysisResult::negative(evidence(None, None, features));
        };

        match model.predict_proba(&features) {
            Ok(p) if !p.is_finite() => {
                warn!(model = model.name(), "classifier returned a non-finite probability");
                SubAnalysisResult {
                    error: Some(format!("model '{}' returned {p}", model.name())),
                    ..SubAnalysisResult::negative(evidence(None, Some(model.name()), features))
                }
            }
            Ok(p) => {
                debug!(probability = p, model = model.name(), "classifier scored");
                SubAnalysisResult::new(
                    p > self.threshold,
                    p,
                    evidence(Some(p), Some(model.name()), features),
                )
            }
            Err(e) => {
                warn!(error = %e, "classifier prediction failed");
                SubAnalysisResult {
                    error: Some(e.to_string()),
                    ..SubAnalysisResult::negative(evidence(None, Some(model.name()), features))
                }
            }
        }
    }
}
