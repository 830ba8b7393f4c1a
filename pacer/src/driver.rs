//! Driver — open-loop orchestration of a workload run.
//!
//! The driver issues work at a configured arrival rate using a bounded pool
//! of concurrent workers. Pacing and capacity are deliberately separate: a
//! scheduler task produces intended-arrival timestamps into a shared queue,
//! and `concurrency` worker tasks claim them and call the workload.
//!
//! # High-level flow
//! 1. Run the workload's one-shot `setup`; its failure aborts the run.
//! 2. Spawn the arrival scheduler and N workers, then release them together
//!    through a start gate.
//! 3. Each worker repeatedly:
//!    - prunes expired arrivals from the queue head (recording misses),
//!    - claims the next intended arrival, waiting out any lead time,
//!    - calls `perform_iteration` and times it with the monotonic clock,
//!    - records request latency from the *intended* arrival and service time
//!      from the actual start into worker-local metrics.
//! 4. The scheduler stops enqueueing at the end of the run; workers drain
//!    what remains, then all per-task metrics are merged and `teardown` runs.
//!
//! # Why two latency figures
//! `service_time` (start → completion) reflects the server; `request_latency`
//! (intended arrival → completion) reflects the user. When the system under
//! test cannot keep up, a closed-loop driver silently stops issuing requests
//! and its measured tail collapses — the coordinated-omission bias. Timing
//! from the intended arrival, and charging the timeout value to every arrival
//! that expired unclaimed, keeps the tail honest. Under overload the two
//! distributions diverge sharply; the report publishes both.
//!
//! # Accounting rules
//! - Warmup iterations run end to end but update no counters or histograms,
//!   and their failures are swallowed.
//! - Iteration failures during measurement count as errors and still record
//!   both latencies; they never propagate out of the worker loop.
//! - Waiting for a future arrival is backoff time; claiming a late arrival
//!   accrues its lateness as behind-schedule time. A worker is never in both
//!   states at once.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::metrics::RunMetrics;
use crate::report::Report;
use crate::scheduler::{pop_next, prune_expired, scheduler_task, RunContext};
use crate::workload::Workload;

/// How long an idle worker sleeps before polling the queue again.
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Open-loop load-test driver, generic over any [`Workload`].
pub struct Driver<W> {
    config: DriverConfig,
    workload: Arc<W>,
}

impl<W: Workload> Driver<W> {
    pub fn new(config: DriverConfig, workload: W) -> Self {
        Self {
            config,
            workload: Arc::new(workload),
        }
    }

    /// Run the workload to completion and produce the report.
    ///
    /// The only failing exits are workload `setup` and `teardown`; every
    /// other outcome, including an all-missed or all-errored run, yields a
    /// report.
    pub async fn run(&self) -> Result<Report, DriverError> {
        self.workload.setup().await.map_err(DriverError::Setup)?;

        if self.config.target_items_per_second <= 0.0 {
            tracing::info!("target arrival rate is zero, skipping the measurement phase");
            self.workload
                .teardown()
                .await
                .map_err(DriverError::Teardown)?;
            return Ok(Report::empty(&self.config, self.workload.test_run_data()));
        }

        let items_per_iteration = self.workload.items_per_iteration().max(1);
        let plan = Arc::new(self.config.plan(items_per_iteration));
        let (ctx, start_tx) = RunContext::new(Arc::clone(&plan));

        tracing::info!(
            concurrency = plan.concurrency,
            target_items_per_second = self.config.target_items_per_second,
            duration_ms = plan.duration_ms,
            warmup_ms = plan.warmup_ms,
            "spawning arrival scheduler and workers"
        );
        let scheduler = tokio::spawn(scheduler_task(ctx.clone()));
        let workers: Vec<_> = (0..plan.concurrency)
            .map(|index| tokio::spawn(worker_task(ctx.clone(), Arc::clone(&self.workload), index)))
            .collect();

        start_tx.send(true).ok();

        let mut merged = RunMetrics::new();
        match scheduler.await {
            Ok(metrics) => merged.merge(&metrics),
            // Keep whatever the rest of the run measured instead of crashing.
            Err(err) => tracing::error!("arrival scheduler panicked: {err}"),
        }
        for (index, joined) in join_all(workers).await.into_iter().enumerate() {
            match joined {
                Ok(metrics) => merged.merge(&metrics),
                Err(err) => tracing::error!(worker = index, "worker panicked: {err}"),
            }
        }

        self.workload
            .teardown()
            .await
            .map_err(DriverError::Teardown)?;

        tracing::info!(
            completed = merged.completed_iterations,
            missed = merged.missed_iterations,
            errors = merged.error_iterations,
            "run finished"
        );
        Ok(Report::build(
            &self.config,
            &plan,
            &merged,
            self.workload.test_run_data(),
        ))
    }
}

/// One cooperative worker: claim, align, iterate, record.
async fn worker_task<W: Workload>(
    mut ctx: RunContext,
    workload: Arc<W>,
    index: usize,
) -> RunMetrics {
    let mut metrics = RunMetrics::new();
    if ctx.start.wait_for(|started| *started).await.is_err() {
        return metrics;
    }
    tracing::debug!(worker = index, "worker started");

    let plan = Arc::clone(&ctx.plan);
    loop {
        let now = ctx.clock.now_micros();
        prune_expired(&ctx, now, &mut metrics);

        let Some(arrival) = pop_next(&ctx) else {
            if now >= plan.end_us {
                break;
            }
            ctx.clock.sleep(IDLE_POLL).await;
            continue;
        };

        // Align with the intended arrival: wait out any lead time, or accrue
        // the lateness as schedule debt.
        let request_start = if arrival > now {
            let reached = ctx.clock.wait_until_micros(arrival).await;
            metrics.backoff_time_us += reached - now;
            reached
        } else {
            metrics.behind_schedule_us += now - arrival;
            now
        };

        let result = workload.perform_iteration().await;
        let completion = ctx.clock.now_micros();

        if arrival < plan.measurement_start_us {
            if let Err(err) = result {
                tracing::debug!(worker = index, "warmup iteration failed: {err}");
            }
            continue;
        }

        metrics.request_latency.record(completion - arrival);
        metrics
            .service_time
            .record(completion.saturating_sub(request_start));
        match result {
            Ok(()) => {
                metrics.completed_iterations += 1;
                metrics.total_items += plan.items_per_iteration;
                metrics.run_time_us += completion.saturating_sub(request_start);
            }
            Err(err) => {
                metrics.error_iterations += 1;
                tracing::debug!(worker = index, "iteration failed: {err}");
            }
        }
    }

    tracing::debug!(worker = index, "worker finished");
    metrics
}
