use hdrhistogram::Histogram;

/// High-dynamic-range recorder of integer microsecond durations.
///
/// Auto-resizing, 3 significant figures. Zero durations are coerced to 1µs.
/// Not thread-safe; each instance is owned by the task that writes into it
/// and merged into a combined view once that task finishes.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    inner: Histogram<u64>,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            inner: Histogram::new(3).expect("3 significant figures is a valid histogram config"),
        }
    }

    /// Record a duration in microseconds. Zero is recorded as 1µs.
    pub fn record(&mut self, micros: u64) {
        self.inner.record(micros.max(1)).ok();
    }

    pub fn len(&self) -> u64 {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn min(&self) -> u64 {
        self.inner.min()
    }

    pub fn max(&self) -> u64 {
        self.inner.max()
    }

    pub fn mean(&self) -> f64 {
        self.inner.mean()
    }

    /// Value at the given quantile in [0.0, 1.0].
    pub fn value_at_quantile(&self, quantile: f64) -> u64 {
        self.inner.value_at_quantile(quantile)
    }

    /// Fold another recorder into this one.
    pub fn merge(&mut self, other: &LatencyHistogram) {
        self.inner.add(&other.inner).ok();
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_coerced_to_one() {
        let mut h = LatencyHistogram::new();
        h.record(0);
        assert_eq!(h.min(), 1);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn percentiles_are_ordered() {
        let mut h = LatencyHistogram::new();
        for v in 1..=1_000 {
            h.record(v);
        }
        assert!(h.value_at_quantile(0.50) <= h.value_at_quantile(0.99));
        assert!(h.value_at_quantile(0.99) <= h.value_at_quantile(0.999));
        assert!(h.value_at_quantile(0.999) <= h.max());
    }

    #[test]
    fn percentiles_are_insertion_order_independent() {
        let values = [5_u64, 900, 42, 42, 7_000, 1, 333, 42, 12, 900];

        let mut forward = LatencyHistogram::new();
        for &v in &values {
            forward.record(v);
        }
        let mut reverse = LatencyHistogram::new();
        for &v in values.iter().rev() {
            reverse.record(v);
        }

        for q in [0.0, 0.25, 0.5, 0.75, 0.9, 0.95, 0.99, 0.999, 1.0] {
            assert_eq!(forward.value_at_quantile(q), reverse.value_at_quantile(q));
        }
        assert_eq!(forward.mean(), reverse.mean());
    }

    #[test]
    fn merge_combines_counts() {
        let mut a = LatencyHistogram::new();
        let mut b = LatencyHistogram::new();
        a.record(10);
        b.record(20);
        b.record(30);
        a.merge(&b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.min(), 10);
    }
}
