use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{DriverConfig, TimingPlan};
use crate::histogram::LatencyHistogram;
use crate::metrics::RunMetrics;

/// Final run report. Field names are part of the contract and stable.
///
/// Per-task metrics keep raw counters and histograms; everything derived
/// (ratios, throughput, millisecond percentile blocks) is computed here,
/// once, when the report is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub configuration: Configuration,
    pub test_run_data: Value,
    pub completed_iterations: u64,
    pub missed_iterations: u64,
    pub error_iterations: u64,
    pub failed_iterations_ratio: f64,
    pub worker_cycle_time_millis: f64,
    pub total_requests_completed: u64,
    /// Achieved throughput in items per second over the measurement window.
    pub throughput_overall: f64,
    pub iterations_per_second_per_worker: f64,
    pub target_arrival_rate_ratio: f64,
    pub request_latency_stats_millis: LatencyStatsMillis,
    pub service_time_stats_millis: LatencyStatsMillis,
    pub worker_utilization: WorkerUtilization,
}

/// Echo of the effective driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Target arrival rate in items per second.
    pub target_arrival_rate: f64,
    pub concurrency: usize,
    pub overall_duration_millis: u64,
    pub warmup_millis: u64,
    pub request_timeout_millis: f64,
}

/// Percentile block in milliseconds. All zeros when nothing was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyStatsMillis {
    pub avg: f64,
    pub p0: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p99_9: f64,
    pub p100: f64,
}

impl LatencyStatsMillis {
    fn from_histogram(histogram: &LatencyHistogram) -> Self {
        if histogram.is_empty() {
            return Self::zeroed();
        }
        let millis = |micros: u64| micros as f64 / 1_000.0;
        Self {
            avg: histogram.mean() / 1_000.0,
            p0: millis(histogram.min()),
            p25: millis(histogram.value_at_quantile(0.25)),
            p50: millis(histogram.value_at_quantile(0.50)),
            p75: millis(histogram.value_at_quantile(0.75)),
            p90: millis(histogram.value_at_quantile(0.90)),
            p95: millis(histogram.value_at_quantile(0.95)),
            p99: millis(histogram.value_at_quantile(0.99)),
            p99_9: millis(histogram.value_at_quantile(0.999)),
            p100: millis(histogram.max()),
        }
    }

    fn zeroed() -> Self {
        Self {
            avg: 0.0,
            p0: 0.0,
            p25: 0.0,
            p50: 0.0,
            p75: 0.0,
            p90: 0.0,
            p95: 0.0,
            p99: 0.0,
            p99_9: 0.0,
            p100: 0.0,
        }
    }
}

/// Worker-utilization bookkeeping for the whole pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerUtilization {
    pub run_time_millis: f64,
    pub backoff_time_millis: f64,
    pub behind_schedule_time_millis: f64,
    /// run / (run + backoff); a worker cannot be in both states at once.
    pub utilization: f64,
}

impl Report {
    pub(crate) fn build(
        config: &DriverConfig,
        plan: &TimingPlan,
        metrics: &RunMetrics,
        test_run_data: Value,
    ) -> Self {
        let counted =
            metrics.completed_iterations + metrics.error_iterations + metrics.missed_iterations;
        let failed = metrics.error_iterations + metrics.missed_iterations;
        let failed_iterations_ratio = if counted == 0 {
            0.0
        } else {
            failed as f64 / counted as f64
        };

        let measurement_secs = (plan.end_us.saturating_sub(plan.measurement_start_us)) as f64 / 1e6;
        let throughput_overall = if measurement_secs > 0.0 {
            metrics.total_items as f64 / measurement_secs
        } else {
            0.0
        };
        let iterations_per_second_per_worker = if measurement_secs > 0.0 {
            metrics.completed_iterations as f64 / measurement_secs / plan.concurrency as f64
        } else {
            0.0
        };
        let target_arrival_rate_ratio = if config.target_items_per_second > 0.0 {
            throughput_overall / config.target_items_per_second
        } else {
            0.0
        };

        let run_ms = metrics.run_time_us as f64 / 1_000.0;
        let backoff_ms = metrics.backoff_time_us as f64 / 1_000.0;
        let utilization = if metrics.run_time_us + metrics.backoff_time_us == 0 {
            0.0
        } else {
            run_ms / (run_ms + backoff_ms)
        };

        Self {
            configuration: Configuration {
                target_arrival_rate: config.target_items_per_second,
                concurrency: plan.concurrency,
                overall_duration_millis: plan.duration_ms,
                warmup_millis: plan.warmup_ms,
                request_timeout_millis: plan.timeout_us as f64 / 1_000.0,
            },
            test_run_data,
            completed_iterations: metrics.completed_iterations,
            missed_iterations: metrics.missed_iterations,
            error_iterations: metrics.error_iterations,
            failed_iterations_ratio,
            worker_cycle_time_millis: plan.worker_cycle_ms,
            total_requests_completed: metrics.total_items,
            throughput_overall,
            iterations_per_second_per_worker,
            target_arrival_rate_ratio,
            request_latency_stats_millis: LatencyStatsMillis::from_histogram(
                &metrics.request_latency,
            ),
            service_time_stats_millis: LatencyStatsMillis::from_histogram(&metrics.service_time),
            worker_utilization: WorkerUtilization {
                run_time_millis: run_ms,
                backoff_time_millis: backoff_ms,
                behind_schedule_time_millis: metrics.behind_schedule_us as f64 / 1_000.0,
                utilization,
            },
        }
    }

    /// Report for a run that never scheduled anything (zero target rate).
    pub(crate) fn empty(config: &DriverConfig, test_run_data: Value) -> Self {
        Self {
            configuration: Configuration {
                target_arrival_rate: config.target_items_per_second,
                concurrency: config.concurrency.max(1),
                overall_duration_millis: config.duration.as_millis() as u64,
                warmup_millis: config.warmup_ms(),
                request_timeout_millis: config
                    .timeout
                    .map(|t| t.as_secs_f64() * 1_000.0)
                    .unwrap_or(0.0),
            },
            test_run_data,
            completed_iterations: 0,
            missed_iterations: 0,
            error_iterations: 0,
            failed_iterations_ratio: 0.0,
            worker_cycle_time_millis: 0.0,
            total_requests_completed: 0,
            throughput_overall: 0.0,
            iterations_per_second_per_worker: 0.0,
            target_arrival_rate_ratio: 0.0,
            request_latency_stats_millis: LatencyStatsMillis::zeroed(),
            service_time_stats_millis: LatencyStatsMillis::zeroed(),
            worker_utilization: WorkerUtilization {
                run_time_millis: 0.0,
                backoff_time_millis: 0.0,
                behind_schedule_time_millis: 0.0,
                utilization: 0.0,
            },
        }
    }
}
