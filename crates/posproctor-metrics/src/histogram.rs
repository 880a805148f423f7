//! Fixed-bucket histogram.

/// Upper bounds (seconds) for per-target query latency.
pub const QUERY_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Upper bounds (seconds) for whole-cycle duration.
pub const CYCLE_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

/// Cumulative-on-render histogram. Never reset.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    bounds: &'static [f64],
    /// Per-bucket (non-cumulative) counts; one extra slot for `+Inf`.
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    pub fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            counts: vec![0; bounds.len() + 1],
            sum: 0.0,
            count: 0,
        }
    }

    pub fn observe(&mut self, value: f64) {
        let slot = self
            .bounds
            .iter()
            .position(|b| value <= *b)
            .unwrap_or(self.bounds.len());
        self.counts[slot] += 1;
        self.sum += value;
        self.count += 1;
    }

    /// `(upper bound, cumulative count)` pairs, ending with `+Inf`.
    pub fn cumulative(&self) -> impl Iterator<Item = (Option<f64>, u64)> + '_ {
        let bounds = self.bounds.iter().map(|b| Some(*b)).chain(std::iter::once(None));
        bounds.zip(self.counts.iter().scan(0u64, |acc, c| {
            *acc += c;
            Some(*acc)
        }))
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observations_land_in_first_fitting_bucket() {
        let mut h = Histogram::new(&[1.0, 5.0]);
        h.observe(0.5);
        h.observe(1.0);
        h.observe(3.0);
        h.observe(9.0);

        let buckets: Vec<_> = h.cumulative().collect();
        assert_eq!(buckets, vec![(Some(1.0), 2), (Some(5.0), 3), (None, 4)]);
        assert_eq!(h.count(), 4);
        assert!((h.sum() - 13.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_histogram_has_zero_buckets() {
        let h = Histogram::new(CYCLE_BUCKETS);
        assert!(h.cumulative().all(|(_, c)| c == 0));
        assert_eq!(h.cumulative().count(), CYCLE_BUCKETS.len() + 1);
    }
}
