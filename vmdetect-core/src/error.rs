use thiserror::Error;

/// All errors produced by vmdetect-core.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("audio source not found: {path}")]
    SourceNotFound { path: std::path::PathBuf },

    #[error("transcription backend '{backend}' failed: {message}")]
    Transcription { backend: String, message: String },

    #[error("'{what}' timed out after {secs:.1}s")]
    Timeout { what: String, secs: f64 },

    #[error("model error: {0}")]
    Model(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("feature extraction failed: {0}")]
    FeatureExtraction(String),

    #[error("insufficient training data: {0}")]
    InsufficientData(String),

    #[error("analysis queue is shut down")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DetectError>;
