//! Service configuration, sourced from flags or `PII_*` environment
//! variables.

use clap::Parser;
use piiscan_analyzer::AnalyzerSettings;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
pub struct Config {
    /// Result store location.
    #[arg(long, env = "PII_DB_PATH", default_value = "/app/db/pii_results.db")]
    pub db_path: PathBuf,

    /// Directory tree to scan.
    #[arg(long, env = "PII_DATA_PATH", default_value = "/data")]
    pub data_path: PathBuf,

    /// Initial worker count. Auto-sized from the hardware when omitted.
    #[arg(long, env = "PII_WORKERS")]
    pub workers: Option<usize>,

    /// Initial batch size.
    #[arg(long, env = "PII_BATCH_SIZE", default_value_t = 50)]
    pub batch_size: usize,

    /// Minimum confidence for a detection to be reported, in [0, 1].
    #[arg(long, env = "PII_THRESHOLD", default_value_t = 0.7)]
    pub threshold: f64,

    /// Per-file size limit in MiB.
    #[arg(long, env = "PII_FILE_SIZE_LIMIT", default_value_t = 100)]
    pub file_size_limit: u64,

    /// Control API bind address.
    #[arg(long, env = "PII_BIND", default_value = "127.0.0.1:8080")]
    pub bind: String,
}

impl Config {
    pub fn file_size_limit_bytes(&self) -> u64 {
        self.file_size_limit * 1024 * 1024
    }

    /// Settings handed to the analyzer on every submission.
    pub fn analyzer_settings(&self) -> AnalyzerSettings {
        AnalyzerSettings {
            threshold: self.threshold,
            file_size_limit: self.file_size_limit_bytes(),
            worker_id: None,
        }
    }
}
