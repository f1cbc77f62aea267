//! # vmdetect-core
//!
//! Voicemail / answering-machine detection for recorded call audio.
//!
//! ## Architecture
//!
//! ```text
//! path | bytes → Ingestor (WAV, then symphonia probe) → mono f32 @ analysis rate
//!                                  │
//!        ┌─────────────────────────┼──────────────────────────┐
//!  TranscriberChain → TextAnalyzer │                 ClassifierAdapter
//!                          AudioPatternAnalyzer        (ModelSlot)
//!        └─────────────────────────┼──────────────────────────┘
//!                                  │
//!                             FusionPolicy → DetectionResult
//!                                  │
//!                  ResultCache · StatsCounters · JobQueue broadcast
//! ```
//!
//! Synchronous callers use [`VoicemailDetector::analyze`]. Batch callers
//! use [`VoicemailDetector::submit`], which runs jobs one at a time in FIFO
//! order on a dedicated worker thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod analysis;
pub mod audio;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod report;
pub mod transcribe;

// Convenience re-exports for downstream crates
pub use analysis::{Evidence, SubAnalysisResult};
pub use audio::{AudioBuffer, AudioSource};
pub use classifier::{LabeledSample, LogisticModel, TrainingReport, VoicemailModel};
pub use engine::{DetectorBuilder, DetectorConfig, TranscriptionConfig, VoicemailDetector};
pub use error::{DetectError, Result};
pub use report::{
    DetectionMethod, DetectionResult, DetectorStats, JobOutcome, JobStatus, JobTicket,
};
pub use transcribe::{StubTranscriber, Transcriber};
