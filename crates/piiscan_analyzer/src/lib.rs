//! Analyzer contract for PII Scan.
//!
//! The scheduler treats PII detection as opaque: it hands a path and settings
//! to a [`FileAnalyzer`] and gets back an [`AnalysisReport`]. Implementations
//! must never panic across the boundary for ordinary failures - a file that
//! cannot be analyzed is a failed report, not a crash.
//!
//! [`RegexAnalyzer`] is the built-in implementation; deployments with a
//! heavyweight NLP detector plug it in behind the same trait.

mod regex_analyzer;

pub use regex_analyzer::RegexAnalyzer;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings passed into every analysis call.
///
/// Enumerated fields only; unknown keys are rejected at deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzerSettings {
    /// Minimum confidence score for a detection to be reported, in [0, 1].
    pub threshold: f64,
    /// Per-file upper bound in bytes. Larger files are rejected.
    pub file_size_limit: u64,
    /// Transient tag for diagnostics; set by the scheduler per submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<u64>,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            file_size_limit: 100 * 1024 * 1024,
            worker_id: None,
        }
    }
}

/// A single PII detection. Offsets are byte positions in the extracted text,
/// with `start_pos < end_pos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntity {
    pub entity_type: String,
    pub text: String,
    pub score: f64,
    pub start_pos: usize,
    pub end_pos: usize,
}

/// Outcome of analyzing one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub success: bool,
    pub entities: Vec<DetectedEntity>,
    pub metadata: serde_json::Value,
    pub error_message: Option<String>,
    /// Analyzer-measured seconds, if it tracks its own timing. The scheduler
    /// records its own measurement regardless.
    pub processing_time: Option<f64>,
}

impl AnalysisReport {
    /// Successful report with detections and extraction metadata.
    pub fn success(entities: Vec<DetectedEntity>, metadata: serde_json::Value) -> Self {
        Self {
            success: true,
            entities,
            metadata,
            error_message: None,
            processing_time: None,
        }
    }

    /// Failed report carrying an error message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            entities: Vec::new(),
            metadata: serde_json::Value::Null,
            error_message: Some(message.into()),
            processing_time: None,
        }
    }
}

/// The external analyzer boundary: text extraction and PII detection for a
/// single file. Called from worker threads; implementations must be
/// thread-safe and blocking I/O is expected.
pub trait FileAnalyzer: Send + Sync {
    fn analyze(&self, path: &Path, settings: &AnalyzerSettings) -> AnalysisReport;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_reject_unknown_keys() {
        let err = serde_json::from_str::<AnalyzerSettings>(
            r#"{"threshold": 0.5, "file_size_limit": 1024, "ocr": true}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = AnalyzerSettings::default();
        assert_eq!(settings.threshold, 0.7);
        assert_eq!(settings.file_size_limit, 100 * 1024 * 1024);
        assert!(settings.worker_id.is_none());
    }

    #[test]
    fn test_failure_report_shape() {
        let report = AnalysisReport::failure("no such file");
        assert!(!report.success);
        assert!(report.entities.is_empty());
        assert_eq!(report.error_message.as_deref(), Some("no such file"));
    }
}
