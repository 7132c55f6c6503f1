//! System load sampling for the adaptive control loop.
//!
//! Wraps `sysinfo`. CPU usage needs two refreshes with a delay in between, so
//! [`LoadSampler::snapshot`] blocks for the sampling interval - call it from
//! a blocking context, not the scheduler's control task.

use serde::Serialize;
use std::time::Duration;
use sysinfo::System;
use tracing::debug;

/// Delay between the two CPU refreshes of one snapshot.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Point-in-time utilization snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemLoad {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub load_avg_1min: f64,
    pub cpu_count: usize,
    /// 1-minute load average divided by logical CPU count.
    pub load_factor: f64,
    /// True when the platform has no load average and `load_factor` was
    /// approximated from CPU usage.
    pub degraded: bool,
}

/// Hardware profile used for initial worker sizing.
#[derive(Debug, Clone, Copy)]
pub struct MachineProfile {
    pub logical_cpus: usize,
    pub total_memory_gb: f64,
}

/// Samples CPU, memory and load average on demand.
pub struct LoadSampler;

impl LoadSampler {
    /// Take a utilization snapshot. Blocks for the CPU sampling interval
    /// (0.5 s).
    pub fn snapshot() -> SystemLoad {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        std::thread::sleep(CPU_SAMPLE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu_percent = f64::from(sys.global_cpu_usage());
        let total_memory = sys.total_memory();
        let memory_percent = if total_memory > 0 {
            sys.used_memory() as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };
        let cpu_count = sys.cpus().len().max(1);

        let (load_avg_1min, load_factor, degraded) = if cfg!(target_os = "windows") {
            // No load average on this platform; fall back to CPU usage.
            (0.0, cpu_percent / 100.0, true)
        } else {
            let one = System::load_average().one;
            (one, one / cpu_count as f64, false)
        };

        let load = SystemLoad {
            cpu_percent,
            memory_percent,
            load_avg_1min,
            cpu_count,
            load_factor,
            degraded,
        };
        debug!(?load, "sampled system load");
        load
    }

    /// Logical CPU count and total memory, for initial worker sizing.
    pub fn machine_profile() -> MachineProfile {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_usage();

        MachineProfile {
            logical_cpus: sys.cpus().len().max(1),
            total_memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
        }
    }
}
