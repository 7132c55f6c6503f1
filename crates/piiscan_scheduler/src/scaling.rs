//! Adaptive control law and initial worker sizing.
//!
//! Both are pure functions over a load snapshot so the scheduler's behavior
//! can be verified without running a scheduler.

use crate::sysload::{MachineProfile, SystemLoad};

/// Target CPU utilization (percent); the band below/above steers growth.
pub const TARGET_CPU: f64 = 70.0;
/// Below this CPU utilization the pool may grow.
pub const MIN_CPU: f64 = 60.0;
/// Above this CPU utilization the pool shrinks.
pub const MAX_CPU: f64 = 80.0;

/// Maximum acceptable load average as a factor of CPU count.
pub const MAX_LOAD_FACTOR: f64 = 1.5;
/// Load factor that triggers emergency reduction.
pub const CRITICAL_LOAD_FACTOR: f64 = 2.0;
/// Load factor headroom required before growing.
const LOW_LOAD_FACTOR: f64 = 0.8;

/// Memory ceiling (percent) for growth.
const MEMORY_GROWTH_LIMIT: f64 = 80.0;
/// Memory level (percent) treated as pressure.
const MEMORY_PRESSURE_LIMIT: f64 = 90.0;

/// Normal worker adjustment step.
pub const WORKER_STEP: usize = 10;
/// Larger reduction applied when the system is overloaded.
pub const WORKER_EMERGENCY: usize = 20;
/// Batch size adjustment step.
pub const BATCH_STEP: usize = 10;
pub const MIN_BATCH: usize = 20;
pub const MAX_BATCH: usize = 50;
pub const MIN_WORKERS: usize = 8;

/// Worker count used when hardware probing fails.
pub const FALLBACK_WORKERS: usize = 16;

/// New worker and batch targets produced by one adaptation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjustment {
    pub workers: usize,
    pub batch_size: usize,
}

/// Apply the priority-ordered control law to one load snapshot. First
/// matching rule wins; targets take effect at the next batch boundary.
pub fn adjust(load: &SystemLoad, workers: usize, batch_size: usize) -> Adjustment {
    if load.load_factor > CRITICAL_LOAD_FACTOR {
        let reduction = WORKER_EMERGENCY.max(workers / 3);
        return Adjustment {
            workers: workers.saturating_sub(reduction).max(MIN_WORKERS),
            batch_size: MIN_BATCH,
        };
    }

    if load.load_factor > MAX_LOAD_FACTOR {
        let reduction = (2 * WORKER_STEP).max(workers / 5);
        return Adjustment {
            workers: workers.saturating_sub(reduction).max(MIN_WORKERS),
            batch_size,
        };
    }

    if load.cpu_percent < MIN_CPU
        && load.memory_percent < MEMORY_GROWTH_LIMIT
        && load.load_factor < LOW_LOAD_FACTOR
    {
        return Adjustment {
            workers: workers + WORKER_STEP,
            batch_size: (batch_size + BATCH_STEP).min(MAX_BATCH),
        };
    }

    if load.cpu_percent > MAX_CPU || load.memory_percent > MEMORY_PRESSURE_LIMIT {
        return Adjustment {
            workers: workers.saturating_sub(WORKER_STEP).max(MIN_WORKERS),
            batch_size: batch_size.saturating_sub(BATCH_STEP).max(MIN_BATCH),
        };
    }

    Adjustment { workers, batch_size }
}

/// Initial worker count derived from logical CPU count and total RAM.
///
/// Tiered: very large hosts cap at 64 and leave headroom for context
/// switching; mid-size hosts assume roughly 1 GB per worker.
pub fn initial_worker_count(profile: Option<MachineProfile>) -> usize {
    let Some(profile) = profile else {
        return FALLBACK_WORKERS;
    };

    let cpus = profile.logical_cpus;
    let memory_gb = profile.total_memory_gb;

    let workers = if cpus >= 96 {
        let by_cpu = (cpus as f64 * 0.5) as usize;
        let by_memory = (memory_gb * 0.7) as usize;
        by_cpu.min(by_memory).min(64)
    } else if cpus >= 32 {
        let by_cpu = (cpus as f64 * 0.75) as usize;
        let by_memory = (memory_gb * 0.6) as usize;
        24.min(by_cpu).min(by_memory)
    } else if cpus >= 8 {
        let by_cpu = ((cpus as f64 * 0.8) as usize).max(4);
        let by_memory = (memory_gb * 0.6) as usize;
        by_cpu.min(by_memory)
    } else {
        let by_cpu = ((cpus as f64 * 0.9) as usize).max(2);
        let by_memory = (memory_gb * 0.6) as usize;
        by_cpu.min(by_memory)
    };

    workers.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(cpu: f64, memory: f64, load_factor: f64) -> SystemLoad {
        SystemLoad {
            cpu_percent: cpu,
            memory_percent: memory,
            load_avg_1min: load_factor * 8.0,
            cpu_count: 8,
            load_factor,
            degraded: false,
        }
    }

    #[test]
    fn test_critical_load_emergency_reduction() {
        let adj = adjust(&load(50.0, 50.0, 2.5), 64, 50);
        // Reduction is max(WORKER_EMERGENCY, 64/3) = 21.
        assert_eq!(adj.workers, 43);
        assert_eq!(adj.batch_size, MIN_BATCH);
    }

    #[test]
    fn test_high_load_standard_reduction() {
        let adj = adjust(&load(50.0, 50.0, 1.7), 100, 40);
        // Reduction is max(20, 100/5) = 20; batch untouched.
        assert_eq!(adj.workers, 80);
        assert_eq!(adj.batch_size, 40);
    }

    #[test]
    fn test_idle_system_grows() {
        let adj = adjust(&load(40.0, 50.0, 0.3), 16, 20);
        assert_eq!(adj.workers, 26);
        assert_eq!(adj.batch_size, 30);
    }

    #[test]
    fn test_growth_capped_at_max_batch() {
        let adj = adjust(&load(40.0, 50.0, 0.3), 16, MAX_BATCH);
        assert_eq!(adj.batch_size, MAX_BATCH);
    }

    #[test]
    fn test_cpu_pressure_shrinks() {
        let adj = adjust(&load(85.0, 50.0, 1.0), 30, 50);
        assert_eq!(adj.workers, 20);
        assert_eq!(adj.batch_size, 40);
    }

    #[test]
    fn test_memory_pressure_shrinks() {
        let adj = adjust(&load(70.0, 95.0, 1.0), 30, 30);
        assert_eq!(adj.workers, 20);
        assert_eq!(adj.batch_size, MIN_BATCH);
    }

    #[test]
    fn test_steady_state_unchanged() {
        let adj = adjust(&load(70.0, 60.0, 1.0), 24, 30);
        assert_eq!(adj.workers, 24);
        assert_eq!(adj.batch_size, 30);
    }

    #[test]
    fn test_never_below_min_workers() {
        let adj = adjust(&load(85.0, 95.0, 2.5), MIN_WORKERS, MIN_BATCH);
        assert_eq!(adj.workers, MIN_WORKERS);
        assert_eq!(adj.batch_size, MIN_BATCH);
    }

    #[test]
    fn test_sustained_critical_load_reaches_floor_within_bound() {
        // From any start, workers must hit MIN_WORKERS within
        // ceil((initial - MIN_WORKERS) / WORKER_EMERGENCY) cycles and stay.
        let overload = load(50.0, 50.0, 2.5);
        for initial in [10usize, 24, 64, 128] {
            let bound = (initial - MIN_WORKERS).div_ceil(WORKER_EMERGENCY).max(1);
            let mut workers = initial;
            let mut batch = MAX_BATCH;
            let mut cycles = 0;
            while workers > MIN_WORKERS {
                let adj = adjust(&overload, workers, batch);
                assert!(adj.workers < workers, "must shrink under critical load");
                workers = adj.workers;
                batch = adj.batch_size;
                cycles += 1;
                assert!(cycles <= bound, "took {} cycles from {}, bound {}", cycles, initial, bound);
            }
            let adj = adjust(&overload, workers, batch);
            assert_eq!(adj.workers, MIN_WORKERS, "must stay at the floor");
        }
    }

    #[test]
    fn test_initial_sizing_tiers() {
        let profile = |cpus, mem| Some(MachineProfile { logical_cpus: cpus, total_memory_gb: mem });

        // 128 cores, 256 GB: min(64, 179, 64) = 64.
        assert_eq!(initial_worker_count(profile(128, 256.0)), 64);
        // 96 cores, 40 GB: memory-bound at 28.
        assert_eq!(initial_worker_count(profile(96, 40.0)), 28);
        // 32 cores, 64 GB: capped at 24.
        assert_eq!(initial_worker_count(profile(32, 64.0)), 24);
        // 16 cores, 16 GB: min(max(4, 12), 9) = 9.
        assert_eq!(initial_worker_count(profile(16, 16.0)), 9);
        // 4 cores, 8 GB: min(max(2, 3), 4) = 3.
        assert_eq!(initial_worker_count(profile(4, 8.0)), 3);
        // Probe failure falls back.
        assert_eq!(initial_worker_count(None), FALLBACK_WORKERS);
    }
}
