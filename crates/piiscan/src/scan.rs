//! Discovery pass: walk a directory tree and register candidate files.
//!
//! The walk itself is blocking and runs on a blocking thread; registration
//! happens in bounded batches so a huge tree never turns into one giant
//! transaction. Entries that cannot be read are skipped with a warning, not
//! fatal.

use piiscan_db::{DbError, DiscoveredFile, PiiDb};
use piiscan_scheduler::StopSignal;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions accepted for analysis (lowercased, without the dot).
pub const ACCEPTED_EXTENSIONS: &[&str] = &[
    "txt", "pdf", "docx", "doc", "rtf", "xlsx", "xls", "csv", "tsv", "pptx", "ppt", "json", "xml",
    "html", "htm", "md", "log", "eml", "msg",
];

/// Files registered per store round-trip.
const REGISTER_BATCH: usize = 500;

/// Progress callback cadence during the walk.
const PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("store failure: {0}")]
    Store(#[from] DbError),

    #[error("walk task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy)]
pub struct ScanOutcome {
    /// Candidate files found (accepted extension, within the size limit).
    pub scanned: u64,
    /// Rows actually inserted (duplicates skipped).
    pub added: u64,
}

/// Walk `root`, filter by extension and size, and register everything found
/// under `job_id`. The stop signal aborts between entries and between
/// registration batches.
pub async fn scan_directory(
    db: &PiiDb,
    job_id: i64,
    root: &Path,
    extensions: &[&str],
    size_limit: u64,
    stop: &StopSignal,
    progress: impl Fn(u64) + Send + Sync + 'static,
) -> Result<ScanOutcome, ScanError> {
    let root = root.to_path_buf();
    let extensions: Vec<String> = extensions.iter().map(|s| s.to_string()).collect();
    let stop_walk = stop.clone();

    let (discovered, scanned) = tokio::task::spawn_blocking(move || {
        let mut found: Vec<DiscoveredFile> = Vec::new();
        let mut scanned = 0u64;

        for entry in WalkDir::new(&root).follow_links(false) {
            if stop_walk.is_raised() {
                info!("scan aborted by stop signal");
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let ext = ext.to_lowercase();
            if !extensions.iter().any(|accepted| *accepted == ext) {
                continue;
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!(path = %entry.path().display(), "skipping unstattable file: {e}");
                    continue;
                }
            };
            if size > size_limit {
                debug!(path = %entry.path().display(), size, "skipping oversized file");
                continue;
            }

            scanned += 1;
            found.push(DiscoveredFile {
                path: entry.path().to_string_lossy().into_owned(),
                file_type: ext,
                size_bytes: size as i64,
            });

            if scanned % PROGRESS_EVERY == 0 {
                progress(scanned);
            }
        }

        progress(scanned);
        (found, scanned)
    })
    .await?;

    let mut added = 0u64;
    for chunk in discovered.chunks(REGISTER_BATCH) {
        if stop.is_raised() {
            break;
        }
        added += db.register_files(job_id, chunk).await?;
    }

    info!(job_id, scanned, added, "scan complete");
    Ok(ScanOutcome { scanned, added })
}
