//! Built-in regex-based PII detector.
//!
//! Extraction is plain text: the file is read whole and interpreted as UTF-8
//! (lossy). Binary payloads are rejected rather than scanned. Each pattern
//! carries a fixed confidence score; detections below the caller's threshold
//! are dropped.

use crate::{AnalysisReport, AnalyzerSettings, DetectedEntity, FileAnalyzer};
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Bytes sniffed for NUL to classify a file as binary.
const BINARY_SNIFF_LEN: usize = 8192;

struct Pattern {
    entity_type: &'static str,
    regex: Regex,
    score: f64,
}

/// Regex PII detector covering the common structured identifiers.
pub struct RegexAnalyzer {
    patterns: Vec<Pattern>,
}

impl RegexAnalyzer {
    pub fn new() -> Self {
        let table: &[(&str, &str, f64)] = &[
            ("US_SSN", r"\b\d{3}-\d{2}-\d{4}\b", 0.85),
            (
                "EMAIL_ADDRESS",
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
                0.99,
            ),
            (
                "CREDIT_CARD",
                r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
                0.8,
            ),
            ("PHONE_NUMBER", r"\b\d{3}[-.]\d{3}[-.]\d{4}\b", 0.75),
            (
                "IP_ADDRESS",
                r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
                0.6,
            ),
        ];

        let patterns = table
            .iter()
            .map(|&(entity_type, pattern, score)| Pattern {
                entity_type,
                // Patterns are literals vetted by the test suite.
                regex: Regex::new(pattern).expect("invalid built-in pattern"),
                score,
            })
            .collect();

        Self { patterns }
    }

    fn detect(&self, text: &str, threshold: f64) -> Vec<DetectedEntity> {
        let mut entities = Vec::new();
        for pattern in &self.patterns {
            if pattern.score < threshold {
                continue;
            }
            for m in pattern.regex.find_iter(text) {
                entities.push(DetectedEntity {
                    entity_type: pattern.entity_type.to_string(),
                    text: m.as_str().to_string(),
                    score: pattern.score,
                    start_pos: m.start(),
                    end_pos: m.end(),
                });
            }
        }
        entities.sort_by_key(|e| (e.start_pos, e.end_pos));
        entities
    }
}

impl Default for RegexAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl FileAnalyzer for RegexAnalyzer {
    fn analyze(&self, path: &Path, settings: &AnalyzerSettings) -> AnalysisReport {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) => return AnalysisReport::failure(format!("Cannot stat file: {}", e)),
        };

        if meta.len() > settings.file_size_limit {
            return AnalysisReport::failure(format!(
                "File exceeds size limit ({} > {} bytes)",
                meta.len(),
                settings.file_size_limit
            ));
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => return AnalysisReport::failure(format!("Cannot read file: {}", e)),
        };

        let sniff_len = bytes.len().min(BINARY_SNIFF_LEN);
        if bytes[..sniff_len].contains(&0) {
            return AnalysisReport::failure("Binary content is not supported by the regex analyzer");
        }

        let text = String::from_utf8_lossy(&bytes);
        let entities = self.detect(&text, settings.threshold);
        debug!(path = %path.display(), count = entities.len(), "regex analysis done");

        let metadata = serde_json::json!({
            "extraction": "plain_text",
            "file_size": meta.len(),
            "text_length": text.len(),
        });
        AnalysisReport::success(entities, metadata)
    }
}
