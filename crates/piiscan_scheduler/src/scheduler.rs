//! Batch scheduler: claim, dispatch, drain, adapt.
//!
//! One batch at a time: claim up to the current batch size from the store,
//! submit every won claim to the worker pool, then drain completions in
//! arrival order. Worker and batch targets written by the adaptation cycle
//! take effect at the next batch boundary; in-flight work is never rebalanced
//! or aborted.

use crate::scaling;
use crate::stop::StopSignal;
use crate::sysload::LoadSampler;
use piiscan_analyzer::{AnalysisReport, AnalyzerSettings, FileAnalyzer};
use piiscan_db::{DbError, NewEntity, PendingFile, PiiDb};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// How often the control loop re-samples system load.
pub const SCALING_INTERVAL: Duration = Duration::from_secs(30);

/// Hard per-file deadline.
pub const WORKER_TIMEOUT: Duration = Duration::from_secs(180);

/// Consecutive failures that trip the circuit breaker.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 50;

/// Scheduler errors. Store failures are not recoverable at this level and
/// surface to the service.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store failure: {0}")]
    Store(#[from] DbError),
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// No pending files remain.
    Drained,
    /// Stop signal observed; remaining files stay pending.
    Stopped,
    /// Too many consecutive errors.
    CircuitBroken,
}

/// Final accounting for a run.
#[derive(Debug, Clone)]
pub struct SchedulerOutcome {
    pub disposition: Disposition,
    pub processed: u64,
    pub errors: u64,
    pub elapsed: Duration,
}

/// Event stream consumed by the service for operator-visible progress.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    FileCompleted {
        file_id: i64,
        file_path: String,
        entity_count: usize,
    },
    FileError {
        file_id: i64,
        file_path: String,
        message: String,
    },
    /// Worker target changed; applies to subsequent batches only.
    WorkersAdjusted { from: usize, to: usize },
    /// Batch target changed; applies to subsequent batches only.
    BatchAdjusted { from: usize, to: usize },
}

/// Initial targets and knobs for one run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub batch_size: usize,
    /// Per-item deadline. Production value is [`WORKER_TIMEOUT`].
    pub worker_timeout: Duration,
    /// Load-driven re-targeting. Disabled pins the initial targets.
    pub adaptive: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: scaling::FALLBACK_WORKERS,
            batch_size: 50,
            worker_timeout: WORKER_TIMEOUT,
            adaptive: true,
        }
    }
}

/// Result of one worker invocation, before persistence.
enum WorkerReport {
    Finished {
        file: PendingFile,
        report: AnalysisReport,
        elapsed: Duration,
    },
    TimedOut {
        file: PendingFile,
        deadline: Duration,
    },
    Crashed {
        file: PendingFile,
        message: String,
    },
}

/// Job-scoped adaptive scheduler.
pub struct Scheduler {
    db: Arc<PiiDb>,
    job_id: i64,
    analyzer: Arc<dyn FileAnalyzer>,
    settings: AnalyzerSettings,
    stop: StopSignal,
    progress: Option<UnboundedSender<ProgressEvent>>,
    workers: usize,
    batch_size: usize,
    worker_timeout: Duration,
    adaptive: bool,
}

impl Scheduler {
    pub fn new(
        db: Arc<PiiDb>,
        job_id: i64,
        analyzer: Arc<dyn FileAnalyzer>,
        config: SchedulerConfig,
        settings: AnalyzerSettings,
        stop: StopSignal,
        progress: Option<UnboundedSender<ProgressEvent>>,
    ) -> Self {
        Self {
            db,
            job_id,
            analyzer,
            settings,
            stop,
            progress,
            workers: config.workers.max(1),
            batch_size: config.batch_size.max(1),
            worker_timeout: config.worker_timeout,
            adaptive: config.adaptive,
        }
    }

    /// Run until the job has no pending files, the stop signal is raised, or
    /// the circuit breaker trips.
    pub async fn run(mut self) -> Result<SchedulerOutcome, SchedulerError> {
        let started = Instant::now();
        let mut last_adapt = Instant::now();
        let mut processed: u64 = 0;
        let mut errors: u64 = 0;
        let mut consecutive_errors: u32 = 0;

        info!(
            job_id = self.job_id,
            workers = self.workers,
            batch_size = self.batch_size,
            "scheduler starting"
        );

        let disposition = loop {
            if self.stop.is_raised() {
                info!(job_id = self.job_id, "stop requested; not starting another batch");
                break Disposition::Stopped;
            }

            if self.adaptive && last_adapt.elapsed() >= SCALING_INTERVAL {
                self.adapt().await;
                last_adapt = Instant::now();
            }

            let pending = self
                .db
                .pending_files(self.job_id, self.batch_size as i64)
                .await?;
            if pending.is_empty() {
                break Disposition::Drained;
            }

            let (batch_ok, batch_failed, tripped) =
                self.run_batch(pending, &mut consecutive_errors).await?;
            processed += batch_ok;
            errors += batch_failed;

            if tripped {
                error!(
                    job_id = self.job_id,
                    consecutive = consecutive_errors,
                    "too many consecutive errors, ending run"
                );
                break Disposition::CircuitBroken;
            }
        };

        let elapsed = started.elapsed();
        let rate = if elapsed.as_secs_f64() > 0.0 {
            processed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        info!(
            job_id = self.job_id,
            ?disposition,
            processed,
            errors,
            elapsed_secs = elapsed.as_secs_f64(),
            files_per_sec = rate,
            "scheduler finished"
        );

        Ok(SchedulerOutcome {
            disposition,
            processed,
            errors,
            elapsed,
        })
    }

    /// Claim and submit one batch, then drain every completion. Returns
    /// (succeeded, failed, circuit_tripped).
    async fn run_batch(
        &mut self,
        pending: Vec<PendingFile>,
        consecutive_errors: &mut u32,
    ) -> Result<(u64, u64, bool), SchedulerError> {
        let batch_started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut in_flight: JoinSet<WorkerReport> = JoinSet::new();
        let mut submitted = 0usize;

        for (slot, file) in pending.into_iter().enumerate() {
            if !self.db.mark_file_processing(file.file_id).await? {
                // Lost the claim race; another owner has this row.
                debug!(file_id = file.file_id, "claim lost, skipping");
                continue;
            }

            let mut settings = self.settings.clone();
            settings.worker_id = Some(slot as u64);

            submitted += 1;
            in_flight.spawn(Self::dispatch(
                semaphore.clone(),
                self.analyzer.clone(),
                settings,
                file,
                self.worker_timeout,
            ));
        }
        debug!(job_id = self.job_id, submitted, "batch submitted");

        let mut ok = 0u64;
        let mut failed = 0u64;
        let mut tripped = false;

        while let Some(joined) = in_flight.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    // The dispatch wrapper contains analyzer panics, so this
                    // only fires on runtime shutdown.
                    error!("worker task lost: {e}");
                    continue;
                }
            };

            if self.record(report, consecutive_errors).await? {
                ok += 1;
            } else {
                failed += 1;
            }

            if *consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                tripped = true;
            }
        }

        info!(
            job_id = self.job_id,
            submitted,
            ok,
            failed,
            elapsed_secs = batch_started.elapsed().as_secs_f64(),
            "batch finished"
        );
        Ok((ok, failed, tripped))
    }

    /// One worker invocation: bounded by the pool semaphore, isolated on a
    /// blocking thread, raced against the per-item deadline. A timed-out
    /// thread is left to finish in the background; its result is discarded.
    async fn dispatch(
        semaphore: Arc<Semaphore>,
        analyzer: Arc<dyn FileAnalyzer>,
        settings: AnalyzerSettings,
        file: PendingFile,
        deadline: Duration,
    ) -> WorkerReport {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return WorkerReport::Crashed {
                    file,
                    message: "worker pool closed".to_string(),
                }
            }
        };

        let path = file.file_path.clone();
        let started = Instant::now();
        let handle =
            tokio::task::spawn_blocking(move || analyzer.analyze(Path::new(&path), &settings));

        match tokio::time::timeout(deadline, handle).await {
            Err(_) => WorkerReport::TimedOut { file, deadline },
            Ok(Err(join_err)) => WorkerReport::Crashed {
                file,
                message: panic_message(join_err),
            },
            Ok(Ok(report)) => WorkerReport::Finished {
                file,
                report,
                elapsed: started.elapsed(),
            },
        }
    }

    /// Persist one worker outcome and emit its progress event. Returns true
    /// for a committed completion.
    async fn record(
        &self,
        report: WorkerReport,
        consecutive_errors: &mut u32,
    ) -> Result<bool, SchedulerError> {
        match report {
            WorkerReport::Finished { file, report, elapsed } if report.success => {
                let entities: Vec<NewEntity> = report
                    .entities
                    .iter()
                    .map(|e| NewEntity {
                        entity_type: e.entity_type.clone(),
                        text: e.text.clone(),
                        score: e.score,
                        start_pos: e.start_pos as i64,
                        end_pos: e.end_pos as i64,
                    })
                    .collect();

                let committed = self
                    .db
                    .complete_file(
                        file.file_id,
                        self.job_id,
                        elapsed.as_secs_f64(),
                        &entities,
                        &report.metadata,
                    )
                    .await?;

                if committed {
                    *consecutive_errors = 0;
                    debug!(
                        file_id = file.file_id,
                        entities = entities.len(),
                        elapsed_secs = elapsed.as_secs_f64(),
                        "file completed"
                    );
                    self.emit(ProgressEvent::FileCompleted {
                        file_id: file.file_id,
                        file_path: file.file_path,
                        entity_count: entities.len(),
                    });
                    return Ok(true);
                }

                // The row was reset out from under the worker. Surfacing this
                // as an error is the contract; a silent success would hide a
                // lost result.
                warn!(
                    file_id = file.file_id,
                    "completion rejected: row is no longer processing"
                );
                *consecutive_errors += 1;
                self.emit(ProgressEvent::FileError {
                    file_id: file.file_id,
                    file_path: file.file_path,
                    message: "completion rejected: file was reset during processing".to_string(),
                });
                Ok(false)
            }
            WorkerReport::Finished { file, report, .. } => {
                let message = report
                    .error_message
                    .unwrap_or_else(|| "Unknown error".to_string());
                warn!(file_id = file.file_id, path = %file.file_path, %message, "file failed");
                self.fail_file(file, message, consecutive_errors).await?;
                Ok(false)
            }
            WorkerReport::TimedOut { file, deadline } => {
                let message = format!("Processing timeout ({}s)", deadline.as_secs());
                error!(file_id = file.file_id, path = %file.file_path, "worker timed out");
                self.fail_file(file, message, consecutive_errors).await?;
                Ok(false)
            }
            WorkerReport::Crashed { file, message } => {
                error!(file_id = file.file_id, path = %file.file_path, %message, "worker crashed");
                self.fail_file(
                    file,
                    format!("Worker exception: {message}"),
                    consecutive_errors,
                )
                .await?;
                Ok(false)
            }
        }
    }

    async fn fail_file(
        &self,
        file: PendingFile,
        message: String,
        consecutive_errors: &mut u32,
    ) -> Result<(), SchedulerError> {
        if !self
            .db
            .mark_file_error(file.file_id, self.job_id, &message)
            .await?
        {
            warn!(
                file_id = file.file_id,
                "error transition rejected: row is no longer processing"
            );
        }
        *consecutive_errors += 1;
        self.emit(ProgressEvent::FileError {
            file_id: file.file_id,
            file_path: file.file_path,
            message,
        });
        Ok(())
    }

    /// One adaptation cycle. Sampling blocks for the CPU interval, so it runs
    /// off the control task.
    async fn adapt(&mut self) {
        let load = match tokio::task::spawn_blocking(LoadSampler::snapshot).await {
            Ok(load) => load,
            Err(e) => {
                warn!("load sampling failed: {e}");
                return;
            }
        };

        info!(
            cpu_percent = load.cpu_percent,
            memory_percent = load.memory_percent,
            load_factor = load.load_factor,
            degraded = load.degraded,
            workers = self.workers,
            batch_size = self.batch_size,
            "system utilization (target CPU {:.0}%)",
            scaling::TARGET_CPU
        );

        let adj = scaling::adjust(&load, self.workers, self.batch_size);
        if adj.workers != self.workers {
            info!(
                from = self.workers,
                to = adj.workers,
                "adjusting worker target for next batch"
            );
            self.emit(ProgressEvent::WorkersAdjusted {
                from: self.workers,
                to: adj.workers,
            });
            self.workers = adj.workers;
        }
        if adj.batch_size != self.batch_size {
            info!(
                from = self.batch_size,
                to = adj.batch_size,
                "adjusting batch size for next batch"
            );
            self.emit(ProgressEvent::BatchAdjusted {
                from: self.batch_size,
                to: adj.batch_size,
            });
            self.batch_size = adj.batch_size;
        }
    }

    fn emit(&self, event: ProgressEvent) {
        // Stop suppresses further events; late completions still persist.
        if self.stop.is_raised() {
            return;
        }
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "worker panicked".to_string()
            }
        }
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piiscan_analyzer::DetectedEntity;
    use piiscan_db::{DiscoveredFile, FileStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct OkAnalyzer;

    impl FileAnalyzer for OkAnalyzer {
        fn analyze(&self, _path: &Path, _settings: &AnalyzerSettings) -> AnalysisReport {
            AnalysisReport::success(
                vec![DetectedEntity {
                    entity_type: "US_SSN".to_string(),
                    text: "123-45-6789".to_string(),
                    score: 0.99,
                    start_pos: 0,
                    end_pos: 11,
                }],
                serde_json::json!({"extraction": "test"}),
            )
        }
    }

    struct FailingAnalyzer;

    impl FileAnalyzer for FailingAnalyzer {
        fn analyze(&self, _path: &Path, _settings: &AnalyzerSettings) -> AnalysisReport {
            AnalysisReport::failure("synthetic failure")
        }
    }

    /// Fails every third call (non-consecutive failures).
    struct EveryThirdFails {
        calls: AtomicUsize,
    }

    impl FileAnalyzer for EveryThirdFails {
        fn analyze(&self, _path: &Path, _settings: &AnalyzerSettings) -> AnalysisReport {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n % 3 == 0 {
                AnalysisReport::failure("synthetic failure")
            } else {
                AnalysisReport::success(Vec::new(), serde_json::Value::Null)
            }
        }
    }

    struct SleepyAnalyzer {
        delay: Duration,
    }

    impl FileAnalyzer for SleepyAnalyzer {
        fn analyze(&self, _path: &Path, _settings: &AnalyzerSettings) -> AnalysisReport {
            std::thread::sleep(self.delay);
            AnalysisReport::success(Vec::new(), serde_json::Value::Null)
        }
    }

    struct PanickyAnalyzer;

    impl FileAnalyzer for PanickyAnalyzer {
        fn analyze(&self, _path: &Path, _settings: &AnalyzerSettings) -> AnalysisReport {
            panic!("synthetic panic");
        }
    }

    /// Succeeds always, raising the stop signal after `after` calls.
    struct StopAfter {
        stop: StopSignal,
        after: usize,
        calls: AtomicUsize,
    }

    impl FileAnalyzer for StopAfter {
        fn analyze(&self, _path: &Path, _settings: &AnalyzerSettings) -> AnalysisReport {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
                self.stop.raise();
            }
            AnalysisReport::success(Vec::new(), serde_json::Value::Null)
        }
    }

    async fn store_with_job(n: usize) -> (tempfile::TempDir, Arc<PiiDb>, i64) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(PiiDb::open(&dir.path().join("store.db")).await.unwrap());
        let job_id = db.create_job("/scratch").await.unwrap();
        let files: Vec<DiscoveredFile> = (0..n)
            .map(|i| DiscoveredFile {
                path: format!("/scratch/f{i:04}.txt"),
                file_type: "txt".to_string(),
                size_bytes: 1,
            })
            .collect();
        db.register_files(job_id, &files).await.unwrap();
        (dir, db, job_id)
    }

    fn config(workers: usize, batch_size: usize) -> SchedulerConfig {
        SchedulerConfig {
            workers,
            batch_size,
            worker_timeout: WORKER_TIMEOUT,
            adaptive: false,
        }
    }

    fn scheduler(
        db: &Arc<PiiDb>,
        job_id: i64,
        analyzer: Arc<dyn FileAnalyzer>,
        config: SchedulerConfig,
        stop: StopSignal,
        progress: Option<UnboundedSender<ProgressEvent>>,
    ) -> Scheduler {
        Scheduler::new(
            db.clone(),
            job_id,
            analyzer,
            config,
            AnalyzerSettings::default(),
            stop,
            progress,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drains_all_files() {
        let (_dir, db, job_id) = store_with_job(10).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = scheduler(&db, job_id, Arc::new(OkAnalyzer), config(4, 4), StopSignal::new(), Some(tx))
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.disposition, Disposition::Drained);
        assert_eq!(outcome.processed, 10);
        assert_eq!(outcome.errors, 0);

        let stats = db.file_statistics(job_id).await.unwrap();
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.pending, 0);

        let job = db.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.processed_files, 10);

        // Every completion persisted its entity and emitted an event.
        let entities = db.entities_for_file(1).await.unwrap();
        assert_eq!(entities.len(), 1);
        let mut completed_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ProgressEvent::FileCompleted { .. }) {
                completed_events += 1;
            }
        }
        assert_eq!(completed_events, 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mixed_outcomes_do_not_trip_breaker() {
        let (_dir, db, job_id) = store_with_job(100).await;
        let analyzer = Arc::new(EveryThirdFails {
            calls: AtomicUsize::new(0),
        });

        let outcome = scheduler(&db, job_id, analyzer, config(8, 30), StopSignal::new(), None)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.disposition, Disposition::Drained);
        assert_eq!(outcome.processed, 67);
        assert_eq!(outcome.errors, 33);

        let stats = db.file_statistics(job_id).await.unwrap();
        assert_eq!(stats.completed, 67);
        assert_eq!(stats.error, 33);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_circuit_breaker_leaves_remainder_pending() {
        let (_dir, db, job_id) = store_with_job(60).await;

        let outcome = scheduler(&db, job_id, Arc::new(FailingAnalyzer), config(8, 50), StopSignal::new(), None)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.disposition, Disposition::CircuitBroken);
        assert_eq!(outcome.errors, 50);
        assert_eq!(outcome.processed, 0);

        let stats = db.file_statistics(job_id).await.unwrap();
        assert_eq!(stats.error, 50);
        assert_eq!(stats.pending, 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_is_recorded_and_run_continues() {
        let (_dir, db, job_id) = store_with_job(3).await;
        let mut cfg = config(3, 3);
        cfg.worker_timeout = Duration::from_millis(100);
        let analyzer = Arc::new(SleepyAnalyzer {
            delay: Duration::from_secs(2),
        });

        let outcome = scheduler(&db, job_id, analyzer, cfg, StopSignal::new(), None)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.disposition, Disposition::Drained);
        assert_eq!(outcome.errors, 3);

        let file = db.get_file(1).await.unwrap().unwrap();
        assert_eq!(file.status, FileStatus::Error);
        assert!(file.error_message.unwrap().contains("timeout"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_analyzer_panic_is_contained() {
        let (_dir, db, job_id) = store_with_job(2).await;

        let outcome = scheduler(&db, job_id, Arc::new(PanickyAnalyzer), config(2, 2), StopSignal::new(), None)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.disposition, Disposition::Drained);
        assert_eq!(outcome.errors, 2);

        let file = db.get_file(1).await.unwrap().unwrap();
        assert_eq!(file.status, FileStatus::Error);
        assert!(file.error_message.unwrap().contains("synthetic panic"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_graceful_stop_drains_batch_then_exits() {
        let (_dir, db, job_id) = store_with_job(30).await;
        let stop = StopSignal::new();
        let analyzer = Arc::new(StopAfter {
            stop: stop.clone(),
            after: 5,
            calls: AtomicUsize::new(0),
        });

        let outcome = scheduler(&db, job_id, analyzer, config(2, 10), stop, None)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.disposition, Disposition::Stopped);
        // The draining batch completes in full; later batches never start.
        assert_eq!(outcome.processed, 10);

        let stats = db.file_statistics(job_id).await.unwrap();
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.pending, 20);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rows_claimed_elsewhere_are_skipped() {
        let (_dir, db, job_id) = store_with_job(5).await;
        // Another owner holds file 1.
        assert!(db.mark_file_processing(1).await.unwrap());

        let outcome = scheduler(&db, job_id, Arc::new(OkAnalyzer), config(2, 5), StopSignal::new(), None)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.disposition, Disposition::Drained);
        assert_eq!(outcome.processed, 4);

        let stats = db.file_statistics(job_id).await.unwrap();
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.completed, 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_counters_are_monotone_during_run() {
        let (_dir, db, job_id) = store_with_job(40).await;
        let analyzer = Arc::new(EveryThirdFails {
            calls: AtomicUsize::new(0),
        });

        let run = tokio::spawn(
            scheduler(&db, job_id, analyzer, config(4, 10), StopSignal::new(), None).run(),
        );

        let mut last_completed = 0;
        let mut last_errors = 0;
        while !run.is_finished() {
            let stats = db.file_statistics(job_id).await.unwrap();
            assert!(stats.completed >= last_completed, "completed went backwards");
            assert!(stats.error >= last_errors, "errors went backwards");
            last_completed = stats.completed;
            last_errors = stats.error;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        run.await.unwrap().unwrap();

        let stats = db.file_statistics(job_id).await.unwrap();
        assert_eq!(stats.completed + stats.error, 40);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_pass_completes_remainder() {
        // A stopped run leaves pending rows; a fresh pass over the same job
        // picks them up and drains the job.
        let (_dir, db, job_id) = store_with_job(30).await;
        let stop = StopSignal::new();
        let analyzer = Arc::new(StopAfter {
            stop: stop.clone(),
            after: 5,
            calls: AtomicUsize::new(0),
        });
        scheduler(&db, job_id, analyzer, config(2, 10), stop, None)
            .run()
            .await
            .unwrap();

        let outcome = scheduler(&db, job_id, Arc::new(OkAnalyzer), config(4, 10), StopSignal::new(), None)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.disposition, Disposition::Drained);
        let stats = db.file_statistics(job_id).await.unwrap();
        assert_eq!(stats.completed, 30);
        assert_eq!(stats.pending, 0);
    }
}
