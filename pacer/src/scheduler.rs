//! Arrival scheduler — open-loop pacing via a bounded queue of intended
//! start timestamps.
//!
//! The queue represents requests that *should have been issued*. The
//! scheduler is the sole producer: it keeps the queue topped up to
//! `2 × concurrency` entries spaced `iteration_interval` apart, and expires
//! entries whose deadline passed before any worker claimed them. Workers
//! compete as consumers and time each iteration from the *intended* arrival,
//! not from when they actually began — that is the coordinated-omission
//! correction. Pruning at the head keeps the queue bounded when workers
//! cannot drain it, and every pruned measurement-phase arrival is recorded
//! as a miss at the timeout value.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::clock::Clock;
use crate::config::TimingPlan;
use crate::metrics::RunMetrics;

/// Shared state for the scheduler and all worker tasks. Cloning yields an
/// independent start-gate receiver over the same queue and plan.
#[derive(Clone)]
pub(crate) struct RunContext {
    pub clock: Clock,
    pub plan: Arc<TimingPlan>,
    pub queue: Arc<Mutex<VecDeque<u64>>>,
    pub start: watch::Receiver<bool>,
}

impl RunContext {
    pub fn new(plan: Arc<TimingPlan>) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let capacity = plan.queue_capacity;
        (
            Self {
                clock: Clock::new(),
                plan,
                queue: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
                start: rx,
            },
            tx,
        )
    }
}

/// Expire arrivals from the queue head whose in-queue TTL has passed.
///
/// Used identically by the scheduler and every worker. Only arrivals at or
/// after the measurement cutoff count as missed; warmup arrivals vanish
/// without trace. Each miss is credited the timeout value as its request
/// latency.
pub(crate) fn prune_expired(ctx: &RunContext, now: u64, metrics: &mut RunMetrics) {
    let cutoff = now.saturating_sub(ctx.plan.timeout_us);
    let mut missed = 0u64;
    {
        let mut queue = ctx.queue.lock().expect("arrival queue poisoned");
        while let Some(&front) = queue.front() {
            if front >= cutoff {
                break;
            }
            queue.pop_front();
            if front >= ctx.plan.measurement_start_us {
                missed += 1;
            }
        }
    }
    for _ in 0..missed {
        metrics.missed_iterations += 1;
        metrics.request_latency.record(ctx.plan.timeout_us);
    }
}

/// Claim the next intended arrival, if any.
pub(crate) fn pop_next(ctx: &RunContext) -> Option<u64> {
    ctx.queue.lock().expect("arrival queue poisoned").pop_front()
}

/// The scheduler task: prune, top up, sleep half an interval, repeat.
///
/// After `end_us` it stops enqueueing and returns its local metrics (the
/// misses it pruned itself); workers keep draining whatever remains.
pub(crate) async fn scheduler_task(mut ctx: RunContext) -> RunMetrics {
    let mut metrics = RunMetrics::new();
    if ctx.start.wait_for(|started| *started).await.is_err() {
        return metrics;
    }
    tracing::debug!("arrival scheduler started");

    let plan = Arc::clone(&ctx.plan);
    let half_tick = Duration::from_micros((plan.iteration_interval_us / 2).max(1));
    let mut next_arrival: u64 = 0;

    loop {
        let now = ctx.clock.now_micros();
        if now >= plan.end_us {
            break;
        }

        prune_expired(&ctx, now, &mut metrics);

        {
            let mut queue = ctx.queue.lock().expect("arrival queue poisoned");
            while queue.len() < plan.queue_capacity && next_arrival < plan.end_us {
                queue.push_back(next_arrival);
                next_arrival += plan.iteration_interval_us;
            }
        }

        ctx.clock.sleep(half_tick).await;
    }

    tracing::debug!(
        missed = metrics.missed_iterations,
        "arrival scheduler reached end of run"
    );
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_plan() -> TimingPlan {
        crate::config::DriverConfig::builder()
            .concurrency(2)
            .target_items_per_second(100.0)
            .duration(Duration::from_secs(1))
            .timeout(Duration::from_millis(50))
            .build()
            .plan(1)
    }

    #[tokio::test]
    async fn prune_counts_only_measurement_phase_arrivals() {
        let (ctx, _tx) = RunContext::new(Arc::new(test_plan()));
        // warmup cutoff is 100ms; one warmup arrival, two measured ones
        {
            let mut queue = ctx.queue.lock().unwrap();
            queue.push_back(20_000);
            queue.push_back(110_000);
            queue.push_back(120_000);
        }

        let mut metrics = RunMetrics::new();
        // TTL is 50ms, so at t=200ms everything up to 150ms has expired
        prune_expired(&ctx, 200_000, &mut metrics);

        assert_eq!(metrics.missed_iterations, 2);
        assert_eq!(metrics.request_latency.len(), 2);
        assert_eq!(metrics.request_latency.min(), 50_000);
        assert!(ctx.queue.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn prune_leaves_live_arrivals_alone() {
        let (ctx, _tx) = RunContext::new(Arc::new(test_plan()));
        {
            let mut queue = ctx.queue.lock().unwrap();
            queue.push_back(180_000);
            queue.push_back(190_000);
        }

        let mut metrics = RunMetrics::new();
        prune_expired(&ctx, 200_000, &mut metrics);

        assert_eq!(metrics.missed_iterations, 0);
        assert_eq!(ctx.queue.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_bounds_the_queue_and_spaces_arrivals() {
        let (ctx, tx) = RunContext::new(Arc::new(test_plan()));
        let handle = tokio::spawn(scheduler_task(ctx.clone()));
        tx.send(true).ok();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let queue: Vec<u64> = ctx.queue.lock().unwrap().iter().copied().collect();
        assert!(!queue.is_empty());
        assert!(queue.len() <= ctx.plan.queue_capacity);
        for pair in queue.windows(2) {
            assert_eq!(pair[1] - pair[0], ctx.plan.iteration_interval_us);
        }

        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_stops_enqueueing_at_end_time() {
        let (ctx, tx) = RunContext::new(Arc::new(test_plan()));
        let handle = tokio::spawn(scheduler_task(ctx.clone()));
        tx.send(true).ok();

        let metrics = handle.await.unwrap();

        // Nothing consumed the queue, so every measured arrival either sits
        // in the final backlog or was pruned as missed.
        assert!(ctx.clock.now_micros() >= ctx.plan.end_us);
        let backlog = ctx.queue.lock().unwrap().len();
        assert!(backlog <= ctx.plan.queue_capacity);
        assert!(metrics.missed_iterations > 0);
    }
}
