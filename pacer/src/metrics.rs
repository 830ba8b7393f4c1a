use crate::histogram::LatencyHistogram;

/// Per-task run metrics.
///
/// The scheduler and every worker own one of these and record into it without
/// any synchronization; the driver merges them once all tasks have finished.
/// `merge` is associative and commutative, so merge order does not matter.
#[derive(Debug, Default)]
pub(crate) struct RunMetrics {
    pub completed_iterations: u64,
    pub missed_iterations: u64,
    pub error_iterations: u64,
    pub total_items: u64,

    /// Time spent inside `perform_iteration` for successful measured
    /// iterations, in microseconds.
    pub run_time_us: u64,
    /// Time spent waiting for an intended arrival that was still in the
    /// future, in microseconds.
    pub backoff_time_us: u64,
    /// Accumulated lateness of arrivals claimed after their intended time,
    /// in microseconds.
    pub behind_schedule_us: u64,

    /// Intended-arrival to completion; the coordinated-omission-corrected
    /// figure.
    pub request_latency: LatencyHistogram,
    /// Actual-start to completion.
    pub service_time: LatencyHistogram,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: &RunMetrics) {
        self.completed_iterations += other.completed_iterations;
        self.missed_iterations += other.missed_iterations;
        self.error_iterations += other.error_iterations;
        self.total_items += other.total_items;
        self.run_time_us += other.run_time_us;
        self.backoff_time_us += other.backoff_time_us;
        self.behind_schedule_us += other.behind_schedule_us;
        self.request_latency.merge(&other.request_latency);
        self.service_time.merge(&other.service_time);
    }
}
