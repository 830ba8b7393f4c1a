use std::time::Duration;

use typed_builder::TypedBuilder;

/// Upper bound on the warmup phase regardless of run length.
const MAX_WARMUP_MS: u64 = 10_000;

/// Driver configuration. Immutable after construction; the driver reads no
/// environment variables and parses no command line.
#[derive(Debug, Clone, TypedBuilder)]
pub struct DriverConfig {
    /// Number of parallel worker tasks.
    #[builder(default = num_cpus::get())]
    pub concurrency: usize,
    /// Intended steady-state arrival rate, measured in *items* per second
    /// (not iterations). Zero short-circuits the run.
    pub target_items_per_second: f64,
    /// Overall test duration, warmup included.
    pub duration: Duration,
    /// In-queue TTL for scheduled arrivals, and the latency credited to
    /// arrivals that miss it. Defaults to the worker cycle time.
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
    /// Skip the warmup phase entirely.
    #[builder(default = false)]
    pub skip_warmup: bool,
}

impl DriverConfig {
    pub(crate) fn warmup_ms(&self) -> u64 {
        if self.skip_warmup {
            0
        } else {
            (self.duration.as_millis() as u64 / 10).min(MAX_WARMUP_MS)
        }
    }

    /// Derive the timing plan for a run. Only valid for a positive target
    /// rate; the driver short-circuits before calling this otherwise.
    pub(crate) fn plan(&self, items_per_iteration: u32) -> TimingPlan {
        let concurrency = self.concurrency.max(1);
        let items_per_iteration = items_per_iteration.max(1) as u64;
        let iteration_rate = self.target_items_per_second / items_per_iteration as f64;

        let iteration_interval_us = (1_000_000.0 / iteration_rate).round().max(1.0) as u64;
        let worker_cycle_ms = 1_000.0 * concurrency as f64 / iteration_rate;
        let duration_ms = self.duration.as_millis() as u64;
        let warmup_ms = self.warmup_ms();
        let timeout_us = match self.timeout {
            Some(timeout) => (timeout.as_micros() as u64).max(1),
            None => (worker_cycle_ms * 1_000.0).round().max(1.0) as u64,
        };

        TimingPlan {
            concurrency,
            items_per_iteration,
            iteration_interval_us,
            worker_cycle_ms,
            warmup_ms,
            duration_ms,
            measurement_start_us: warmup_ms * 1_000,
            end_us: duration_ms * 1_000,
            timeout_us,
            queue_capacity: 2 * concurrency,
        }
    }
}

/// Derived timing constants for one run. All `_us` fields are microsecond
/// offsets relative to the run clock epoch.
#[derive(Debug, Clone)]
pub(crate) struct TimingPlan {
    pub concurrency: usize,
    pub items_per_iteration: u64,
    pub iteration_interval_us: u64,
    pub worker_cycle_ms: f64,
    pub warmup_ms: u64,
    pub duration_ms: u64,
    pub measurement_start_us: u64,
    pub end_us: u64,
    pub timeout_us: u64,
    pub queue_capacity: usize,
}
