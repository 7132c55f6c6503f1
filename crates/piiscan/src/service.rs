//! Analysis lifecycle service.
//!
//! One service value, held by the API layer, drives at most one run at a
//! time: a discovery pass populates pending rows, then the adaptive
//! scheduler drains them. In-memory state sits behind a single mutex; the
//! store stays the authority for file counts. Stops are cooperative and
//! drain at batch boundaries.

use crate::config::Config;
use crate::scan;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use piiscan_analyzer::FileAnalyzer;
use piiscan_db::{DbError, JobStatus, PiiDb};
use piiscan_scheduler::{
    initial_worker_count, Disposition, LoadSampler, ProgressEvent, Scheduler, SchedulerConfig,
    StopSignal, MAX_CONSECUTIVE_ERRORS,
};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Coarse operator-visible state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Idle,
    Scanning,
    Processing,
    Stopping,
    Completed,
    Error,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Processing => "processing",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Scanning | Self::Processing | Self::Stopping)
    }
}

/// Reply shape for the mutating control operations.
#[derive(Debug, Serialize)]
pub struct ActionReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub state: ServiceState,
}

impl ActionReply {
    fn ok(message: impl Into<String>, state: ServiceState) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            state,
        }
    }

    fn failed(error: impl Into<String>, state: ServiceState) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            state,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ProgressCounters {
    files_scanned: u64,
    files_discovered: u64,
    files_completed: u64,
    files_errored: u64,
}

struct Inner {
    state: ServiceState,
    job_id: Option<i64>,
    error_message: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    progress: ProgressCounters,
    stop: StopSignal,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: ServiceState::Idle,
            job_id: None,
            error_message: None,
            start_time: None,
            end_time: None,
            progress: ProgressCounters::default(),
            stop: StopSignal::new(),
        }
    }
}

struct Shared {
    config: Config,
    analyzer: Arc<dyn FileAnalyzer>,
    inner: Mutex<Inner>,
    /// Open store handle; `None` until first use and after `clear`.
    db: tokio::sync::Mutex<Option<Arc<PiiDb>>>,
}

/// Lifecycle controller for analysis runs. Clone is cheap; all clones share
/// the same state.
#[derive(Clone)]
pub struct AnalysisService {
    shared: Arc<Shared>,
}

impl AnalysisService {
    pub fn new(config: Config, analyzer: Arc<dyn FileAnalyzer>) -> Self {
        info!(
            db_path = %config.db_path.display(),
            data_path = %config.data_path.display(),
            batch_size = config.batch_size,
            threshold = config.threshold,
            "analysis service initialized"
        );
        Self {
            shared: Arc::new(Shared {
                config,
                analyzer,
                inner: Mutex::new(Inner::default()),
                db: tokio::sync::Mutex::new(None),
            }),
        }
    }

    fn config(&self) -> &Config {
        &self.shared.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().expect("service state mutex poisoned")
    }

    /// Open the store lazily, keeping one shared handle.
    async fn db_handle(&self) -> Result<Arc<PiiDb>, DbError> {
        let mut guard = self.shared.db.lock().await;
        if let Some(db) = guard.as_ref() {
            return Ok(db.clone());
        }
        if let Some(parent) = self.config().db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Arc::new(PiiDb::open(&self.config().db_path).await?);
        *guard = Some(db.clone());
        Ok(db)
    }

    /// The store handle if one is already open; never opens a new one.
    async fn open_db_handle(&self) -> Option<Arc<PiiDb>> {
        self.shared.db.lock().await.clone()
    }

    /// Start a new analysis run. Returns immediately; the run proceeds on a
    /// background task.
    pub async fn start(&self) -> ActionReply {
        // Guard and transition under one lock so concurrent starts cannot
        // both pass.
        let stop = {
            let mut inner = self.lock();
            if inner.state.is_running() {
                return ActionReply::failed("Analysis is already running", inner.state);
            }
            if !self.config().data_path.is_dir() {
                return ActionReply::failed(
                    format!(
                        "Data path does not exist: {}",
                        self.config().data_path.display()
                    ),
                    inner.state,
                );
            }

            inner.state = ServiceState::Scanning;
            inner.job_id = None;
            inner.error_message = None;
            inner.progress = ProgressCounters::default();
            inner.start_time = Some(Utc::now());
            inner.end_time = None;
            inner.stop = StopSignal::new();
            inner.stop.clone()
        };

        let db = match self.db_handle().await {
            Ok(db) => db,
            Err(e) => {
                error!("cannot open result store: {e}");
                let mut inner = self.lock();
                inner.state = ServiceState::Error;
                inner.error_message = Some(e.to_string());
                inner.end_time = Some(Utc::now());
                return ActionReply::failed(e.to_string(), inner.state);
            }
        };

        let service = self.clone();
        tokio::spawn(async move {
            service.run_analysis(db, stop).await;
        });

        ActionReply::ok("Analysis started", ServiceState::Scanning)
    }

    /// Request a stop. Applies at batch boundaries; in-flight work drains.
    pub fn stop(&self) -> ActionReply {
        let mut inner = self.lock();
        if !inner.state.is_running() {
            return ActionReply::failed("No analysis is running", inner.state);
        }

        info!("stop requested");
        inner.state = ServiceState::Stopping;
        inner.stop.raise();
        ActionReply::ok(
            "Stop requested. Analysis will stop after the current batch completes.",
            inner.state,
        )
    }

    /// Delete the result store and reset in-memory state. Refused while a run
    /// is active.
    pub async fn clear(&self) -> ActionReply {
        let mut db_guard = self.shared.db.lock().await;
        {
            let inner = self.lock();
            if inner.state.is_running() {
                return ActionReply::failed(
                    "Cannot clear results while analysis is running",
                    inner.state,
                );
            }
        }

        if let Some(db) = db_guard.take() {
            db.close().await;
        }

        let base = self.config().db_path.display().to_string();
        for suffix in ["", "-wal", "-shm"] {
            let path = PathBuf::from(format!("{base}{suffix}"));
            match std::fs::remove_file(&path) {
                Ok(()) => info!(path = %path.display(), "removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return ActionReply::failed(
                        format!("Failed to remove {}: {}", path.display(), e),
                        self.lock().state,
                    )
                }
            }
        }

        *self.lock() = Inner::default();
        ActionReply::ok("Results cleared", ServiceState::Idle)
    }

    /// Current state, timing, progress and the store's file breakdown.
    pub async fn status(&self) -> serde_json::Value {
        let (state, job_id, error, start_time, end_time, progress) = {
            let inner = self.lock();
            (
                inner.state,
                inner.job_id,
                inner.error_message.clone(),
                inner.start_time,
                inner.end_time,
                inner.progress,
            )
        };

        let mut status = json!({
            "state": state.as_str(),
            "job_id": job_id,
            "is_running": state.is_running(),
            "can_start": !state.is_running(),
            "can_stop": state.is_running(),
            "data_path": self.config().data_path.display().to_string(),
            "db_path": self.config().db_path.display().to_string(),
            "error": error,
        });

        if let Some(start) = start_time {
            status["start_time"] = json!(start.to_rfc3339());
            let end = end_time.unwrap_or_else(Utc::now);
            if let Some(end_time) = end_time {
                status["end_time"] = json!(end_time.to_rfc3339());
            }
            status["duration_seconds"] = json!((end - start).num_milliseconds() as f64 / 1000.0);
        }

        status["progress"] = json!({
            "files_scanned": progress.files_scanned,
            "files_discovered": progress.files_discovered,
            "files_completed": progress.files_completed,
            "files_errored": progress.files_errored,
        });

        if let (Some(db), Some(job_id)) = (self.open_db_handle().await, job_id) {
            match db.file_statistics(job_id).await {
                Ok(stats) => {
                    let done = stats.completed + stats.error;
                    let percent = if stats.total > 0 {
                        (done as f64 / stats.total as f64 * 1000.0).round() / 10.0
                    } else {
                        0.0
                    };
                    status["files"] = json!({
                        "total": stats.total,
                        "pending": stats.pending,
                        "processing": stats.processing,
                        "completed": stats.completed,
                        "error": stats.error,
                        "progress_percent": percent,
                    });
                }
                Err(e) => warn!("cannot read file statistics: {e}"),
            }
        }

        status
    }

    /// JSON snapshot of the most recent job.
    pub async fn export_json(&self) -> serde_json::Value {
        let already_open = self.open_db_handle().await.is_some();
        if !already_open && !self.config().db_path.exists() {
            return json!({"success": false, "error": "No results to export"});
        }

        let db = match self.db_handle().await {
            Ok(db) => db,
            Err(e) => return json!({"success": false, "error": e.to_string()}),
        };

        match db.latest_job().await {
            Ok(Some(job)) => match db.export_job(job.job_id).await {
                Ok(data) => json!({"success": true, "job_id": job.job_id, "data": data}),
                Err(e) => json!({"success": false, "error": e.to_string()}),
            },
            Ok(None) => json!({"success": false, "error": "No jobs found"}),
            Err(e) => json!({"success": false, "error": e.to_string()}),
        }
    }

    /// Background run routine. Errors land in the `error` state with the
    /// message captured for `status`.
    async fn run_analysis(&self, db: Arc<PiiDb>, stop: StopSignal) {
        if let Err(e) = self.run_inner(&db, &stop).await {
            error!("analysis run failed: {e:#}");
            let job_id = {
                let mut inner = self.lock();
                inner.state = ServiceState::Error;
                inner.error_message = Some(format!("{e:#}"));
                inner.end_time = Some(Utc::now());
                inner.job_id
            };
            if let Some(job_id) = job_id {
                if let Err(e) = db.update_job_status(job_id, JobStatus::Error).await {
                    warn!("cannot record job error status: {e}");
                }
            }
        }
    }

    async fn run_inner(&self, db: &Arc<PiiDb>, stop: &StopSignal) -> Result<()> {
        let data_path = self.config().data_path.clone();
        info!(path = %data_path.display(), "starting analysis");

        let job_id = db
            .create_job(&data_path.to_string_lossy())
            .await
            .context("failed to create job")?;
        self.lock().job_id = Some(job_id);
        info!(job_id, "job created");

        // Discovery pass.
        let service = self.clone();
        let stop_cb = stop.clone();
        let outcome = scan::scan_directory(
            db,
            job_id,
            &data_path,
            scan::ACCEPTED_EXTENSIONS,
            self.config().file_size_limit_bytes(),
            stop,
            move |scanned| {
                if stop_cb.is_raised() {
                    return;
                }
                service.lock().progress.files_scanned = scanned;
            },
        )
        .await
        .context("discovery pass failed")?;

        if stop.is_raised() {
            info!("analysis stopped during scan");
            let mut inner = self.lock();
            inner.state = ServiceState::Idle;
            inner.end_time = Some(Utc::now());
            return Ok(());
        }

        self.lock().progress.files_discovered = outcome.added;

        let stats = db
            .file_statistics(job_id)
            .await
            .context("failed to read statistics")?;
        if stats.pending == 0 {
            info!("no files to process");
            db.update_job_status(job_id, JobStatus::Completed)
                .await
                .context("failed to update job status")?;
            let mut inner = self.lock();
            inner.state = ServiceState::Completed;
            inner.end_time = Some(Utc::now());
            return Ok(());
        }

        self.lock().state = ServiceState::Processing;
        db.update_job_status(job_id, JobStatus::Running)
            .await
            .context("failed to update job status")?;

        let workers = match self.config().workers {
            Some(workers) => workers,
            None => {
                let profile = tokio::task::spawn_blocking(LoadSampler::machine_profile)
                    .await
                    .ok();
                initial_worker_count(profile)
            }
        };

        // Progress events land in the service counters; target adjustments
        // are logged because they only apply to subsequent batches.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = self.clone();
        let consumer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ProgressEvent::FileCompleted { .. } => {
                        service.lock().progress.files_completed += 1;
                    }
                    ProgressEvent::FileError { .. } => {
                        service.lock().progress.files_errored += 1;
                    }
                    ProgressEvent::WorkersAdjusted { from, to } => {
                        info!(from, to, "worker target changed; applies to subsequent batches");
                    }
                    ProgressEvent::BatchAdjusted { from, to } => {
                        info!(from, to, "batch size changed; applies to subsequent batches");
                    }
                }
            }
        });

        info!(
            job_id,
            workers,
            batch_size = self.config().batch_size,
            "starting processing"
        );
        let scheduler = Scheduler::new(
            db.clone(),
            job_id,
            self.shared.analyzer.clone(),
            SchedulerConfig {
                workers,
                batch_size: self.config().batch_size,
                ..SchedulerConfig::default()
            },
            self.config().analyzer_settings(),
            stop.clone(),
            Some(tx),
        );
        let outcome = scheduler.run().await.context("scheduler failed")?;
        let _ = consumer.await;

        match outcome.disposition {
            Disposition::Stopped => {
                db.update_job_status(job_id, JobStatus::Interrupted)
                    .await
                    .context("failed to update job status")?;
                self.lock().state = ServiceState::Idle;
                info!(job_id, "analysis stopped by user");
            }
            Disposition::Drained => {
                db.update_job_status(job_id, JobStatus::Completed)
                    .await
                    .context("failed to update job status")?;
                self.lock().state = ServiceState::Completed;
                info!(
                    job_id,
                    processed = outcome.processed,
                    errors = outcome.errors,
                    "analysis completed"
                );
            }
            Disposition::CircuitBroken => {
                db.update_job_status(job_id, JobStatus::Interrupted)
                    .await
                    .context("failed to update job status")?;
                let mut inner = self.lock();
                inner.state = ServiceState::Idle;
                inner.error_message = Some(format!(
                    "Stopped after {} consecutive errors",
                    MAX_CONSECUTIVE_ERRORS
                ));
                warn!(job_id, "analysis interrupted by circuit breaker");
            }
        }

        self.lock().end_time = Some(Utc::now());
        Ok(())
    }
}
