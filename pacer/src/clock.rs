use std::time::Duration;

use tokio::time::Instant;

/// Monotonic clock for a single driver run.
///
/// All timestamps are integer microseconds since the clock was created.
/// Elapsed measurements never touch wall-clock time, and because the epoch is
/// a [`tokio::time::Instant`] the whole driver runs correctly under a paused
/// test clock.
#[derive(Debug, Clone)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Microseconds elapsed since the clock was created.
    pub fn now_micros(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Park for at least `duration` when it is a millisecond or longer;
    /// sub-millisecond durations yield to other ready tasks instead.
    pub async fn sleep(&self, duration: Duration) {
        if duration >= Duration::from_millis(1) {
            tokio::time::sleep(duration).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    /// Sleep (and finally yield) until `target` microseconds since the epoch,
    /// returning the now that was actually reached.
    pub async fn wait_until_micros(&self, target: u64) -> u64 {
        let mut now = self.now_micros();
        while now < target {
            self.sleep(Duration::from_micros(target - now)).await;
            now = self.now_micros();
        }
        now
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn now_is_monotonic() {
        let clock = Clock::new();
        let a = clock.now_micros();
        let b = clock.now_micros();
        assert!(b >= a);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_parks_for_millisecond_durations() {
        let clock = Clock::new();
        let before = clock.now_micros();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now_micros() - before >= 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_reaches_target() {
        let clock = Clock::new();
        let reached = clock.wait_until_micros(25_000).await;
        assert!(reached >= 25_000);
        assert!(clock.now_micros() >= 25_000);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_past_target_returns_immediately() {
        let clock = Clock::new();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let reached = clock.wait_until_micros(1_000).await;
        assert!(reached >= 10_000);
    }
}
