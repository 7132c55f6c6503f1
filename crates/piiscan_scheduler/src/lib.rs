//! Adaptive work-execution core for PII Scan.
//!
//! The scheduler claims pending files from the result store in bounded
//! batches, fans them out to an isolated worker pool with per-item deadlines,
//! persists outcomes, and periodically re-targets its concurrency and batch
//! size from observed system load. Stops are cooperative: in-flight work
//! drains, no new batch starts.

mod scaling;
mod scheduler;
mod stop;
mod sysload;

pub use scaling::{
    adjust, initial_worker_count, Adjustment, BATCH_STEP, CRITICAL_LOAD_FACTOR, FALLBACK_WORKERS,
    MAX_BATCH, MAX_CPU, MAX_LOAD_FACTOR, MIN_BATCH, MIN_CPU, MIN_WORKERS, TARGET_CPU,
    WORKER_EMERGENCY, WORKER_STEP,
};
pub use scheduler::{
    Disposition, ProgressEvent, Scheduler, SchedulerConfig, SchedulerError, SchedulerOutcome,
    MAX_CONSECUTIVE_ERRORS, SCALING_INTERVAL, WORKER_TIMEOUT,
};
pub use stop::StopSignal;
pub use sysload::{LoadSampler, MachineProfile, SystemLoad};
