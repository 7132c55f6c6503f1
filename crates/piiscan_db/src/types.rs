//! Row types and status enums for the result store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Status enums
// ============================================================================

/// Status of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Interrupted,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a discovered file within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Row types
// ============================================================================

/// An analysis job (one run against a directory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: i64,
    pub directory: String,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub total_files: i64,
    pub processed_files: i64,
    pub error_files: i64,
}

/// A file record tracked by a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: i64,
    pub job_id: i64,
    pub file_path: String,
    pub file_type: String,
    pub size_bytes: i64,
    pub status: FileStatus,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_time_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// A detected PII entity persisted with its file's completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: i64,
    pub file_id: i64,
    pub entity_type: String,
    pub text: String,
    pub score: f64,
    pub start_pos: i64,
    pub end_pos: i64,
}

/// Entity data to persist on completion (no id yet).
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub entity_type: String,
    pub text: String,
    pub score: f64,
    pub start_pos: i64,
    pub end_pos: i64,
}

/// A file found by the discovery pass, ready for registration.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: String,
    /// Lowercased extension without the leading dot.
    pub file_type: String,
    pub size_bytes: i64,
}

/// A pending file handed to the scheduler (claim not yet attempted).
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub file_id: i64,
    pub file_path: String,
}

/// Per-status file counts for a job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FileStatistics {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub error: i64,
}
