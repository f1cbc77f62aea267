//! Result and job types handed back to callers.
//!
//! Everything here serializes with camelCase fields and lowercase enum tags so
//! hosts can forward it as JSON unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::SubAnalysisResult;

// ---------------------------------------------------------------------------
// Detection results
// ---------------------------------------------------------------------------

/// Which rule produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Text,
    Audio,
    Ai,
    Combined,
    None,
}

/// The three analyzer opinions behind a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubResults {
    pub text: SubAnalysisResult,
    pub audio: SubAnalysisResult,
    pub ai: SubAnalysisResult,
}

impl SubResults {
    /// All three analyzers failed with the same message.
    pub fn failed(error: &str) -> Self {
        Self {
            text: SubAnalysisResult::failed(error),
            audio: SubAnalysisResult::failed(error),
            ai: SubAnalysisResult::failed(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub is_voicemail: bool,
    /// In [0.0, 1.0].
    pub confidence: f32,
    pub method: DetectionMethod,
    pub transcript: Option<String>,
    pub sub_results: SubResults,
    pub analysis_time_seconds: f64,
    pub from_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// SHA-256 of the input bytes, when it could be computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl DetectionResult {
    /// Negative verdict for an analysis that could not run.
    pub fn failure(error: impl Into<String>, analysis_time_seconds: f64) -> Self {
        let error = error.into();
        Self {
            is_voicemail: false,
            confidence: 0.0,
            method: DetectionMethod::None,
            transcript: None,
            sub_results: SubResults::failed(&error),
            analysis_time_seconds,
            from_cache: false,
            error: Some(error),
            content_hash: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue types
// ---------------------------------------------------------------------------

/// Returned by `submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTicket {
    pub job_id: String,
    /// 1-based position among queued (not yet started) jobs.
    pub queue_position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Error,
    Cancelled,
}

/// Delivered to the job callback and to outcome subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub result: DetectionResult,
    /// Seconds between submission and the worker picking the job up.
    pub queue_wait_seconds: f64,
    pub queued_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorStats {
    pub total_analyzed: usize,
    pub voicemail_detected: usize,
    pub text_decisions: usize,
    pub audio_decisions: usize,
    pub ai_decisions: usize,
    pub combined_decisions: usize,
    pub cache_hits: usize,
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serializes_with_camel_case_and_lowercase_method() {
        let mut result = DetectionResult::failure("boom", 0.25);
        result.method = DetectionMethod::Combined;

        let json = serde_json::to_value(&result).expect("serialize result");
        assert_eq!(json["isVoicemail"], false);
        assert_eq!(json["method"], "combined");
        assert_eq!(json["analysisTimeSeconds"], 0.25);
        assert_eq!(json["error"], "boom");
        assert_eq!(json["subResults"]["text"]["evidence"]["kind"], "failed");
        assert!(json.get("contentHash").is_none());
    }

    #[test]
    fn outcome_status_is_lowercase() {
        let outcome = JobOutcome {
            job_id: "job_1".into(),
            status: JobStatus::Cancelled,
            result: DetectionResult::failure("cancelled", 0.0),
            queue_wait_seconds: 0.0,
            queued_at: Utc::now(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "cancelled");
        assert_eq!(json["jobId"], "job_1");

        let back: JobOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back.status, JobStatus::Cancelled);
    }
}
