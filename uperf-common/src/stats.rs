//! Latency accumulators and per-run results.

use core::{fmt, time::Duration};

use rkyv::Archive;
use serde::{Deserialize, Serialize};

/// Running min/avg/max over a stream of nanosecond latency samples.
///
/// An empty accumulator has `min == u64::MAX` and `max == 0`, which makes
/// merging with it a no-op.
#[derive(
    Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct StatAccumulator {
    count: u64,
    sum: u64,
    min: u64,
    max: u64,
}

impl Default for StatAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatAccumulator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: 0,
            sum: 0,
            min: u64::MAX,
            max: 0,
        }
    }

    /// Records one sample, in nanoseconds.
    pub fn add(&mut self, sample_ns: u64) {
        self.count += 1;
        self.sum = self.sum.saturating_add(sample_ns);
        self.min = self.min.min(sample_ns);
        self.max = self.max.max(sample_ns);
    }

    /// Records one sample measured as a `Duration`.
    pub fn add_duration(&mut self, sample: Duration) {
        self.add(u64::try_from(sample.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Folds `other` into `self`.
    pub fn merge(&mut self, other: &Self) {
        self.count += other.count;
        self.sum = self.sum.saturating_add(other.sum);
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Returns the merge of `self` and `other` without modifying either.
    #[must_use]
    pub fn merged(mut self, other: &Self) -> Self {
        self.merge(other);
        self
    }

    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub const fn sum(&self) -> u64 {
        self.sum
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Smallest sample, `None` when empty.
    #[must_use]
    pub const fn min(&self) -> Option<u64> {
        if self.count == 0 {
            None
        } else {
            Some(self.min)
        }
    }

    /// Largest sample, `None` when empty.
    #[must_use]
    pub const fn max(&self) -> Option<u64> {
        if self.count == 0 {
            None
        } else {
            Some(self.max)
        }
    }

    /// Mean sample in nanoseconds; zero when empty.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }

    /// Human-readable summary in microseconds.
    ///
    /// With `details` set the output is `min/avg/max = a/b/c us`, otherwise
    /// only the average is shown.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn describe(&self, details: bool) -> String {
        if self.count == 0 {
            return "n/a".to_string();
        }
        let avg = self.average() / 1000.0;
        if details {
            format!(
                "min/avg/max = {:.2}/{avg:.2}/{:.2} us",
                self.min as f64 / 1000.0,
                self.max as f64 / 1000.0
            )
        } else {
            format!("avg = {avg:.2} us")
        }
    }
}

impl fmt::Display for StatAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(true))
    }
}

/// Outcome of one run on one member.
#[derive(Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Results {
    num_reads: u64,
    num_writes: u64,
    elapsed_ms: u64,
    reads: StatAccumulator,
    writes: StatAccumulator,
}

impl Results {
    #[must_use]
    pub const fn new(
        num_reads: u64,
        num_writes: u64,
        elapsed_ms: u64,
        reads: StatAccumulator,
        writes: StatAccumulator,
    ) -> Self {
        Self {
            num_reads,
            num_writes,
            elapsed_ms,
            reads,
            writes,
        }
    }

    #[must_use]
    pub const fn num_reads(&self) -> u64 {
        self.num_reads
    }

    #[must_use]
    pub const fn num_writes(&self) -> u64 {
        self.num_writes
    }

    #[must_use]
    pub const fn total_requests(&self) -> u64 {
        self.num_reads + self.num_writes
    }

    #[must_use]
    pub const fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    #[must_use]
    pub const fn reads(&self) -> &StatAccumulator {
        &self.reads
    }

    #[must_use]
    pub const fn writes(&self) -> &StatAccumulator {
        &self.writes
    }

    /// Requests per second over the elapsed wall time.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.elapsed_ms == 0 {
            0.0
        } else {
            self.total_requests() as f64 / (self.elapsed_ms as f64 / 1000.0)
        }
    }
}

impl fmt::Display for Results {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2} reqs/sec ({} reads, {} writes in {} ms), reads {}, writes {}",
            self.throughput(),
            self.num_reads,
            self.num_writes,
            self.elapsed_ms,
            self.reads,
            self.writes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc(samples: &[u64]) -> StatAccumulator {
        let mut a = StatAccumulator::new();
        for &s in samples {
            a.add(s);
        }
        a
    }

    #[test]
    fn test_add() {
        let a = acc(&[300, 100, 200]);
        assert_eq!(a.count(), 3);
        assert_eq!(a.sum(), 600);
        assert_eq!(a.min(), Some(100));
        assert_eq!(a.max(), Some(300));
        assert_eq!(a.average(), 200.0);
    }

    #[test]
    fn test_empty() {
        let a = StatAccumulator::new();
        assert!(a.is_empty());
        assert_eq!(a.min(), None);
        assert_eq!(a.max(), None);
        assert_eq!(a.average(), 0.0);
        assert_eq!(a.describe(true), "n/a");
    }

    #[test]
    fn test_merge_commutative_and_associative() {
        let a = acc(&[5, 10, 15]);
        let b = acc(&[1, 1000]);
        let c = acc(&[42]);

        assert_eq!(a.merged(&b), b.merged(&a));
        assert_eq!(a.merged(&b).merged(&c), a.merged(&b.merged(&c)));

        let all = acc(&[5, 10, 15, 1, 1000, 42]);
        assert_eq!(a.merged(&b).merged(&c), all);
    }

    #[test]
    fn test_merge_with_empty_is_noop() {
        let a = acc(&[7, 9]);
        let empty = StatAccumulator::new();
        assert_eq!(a.merged(&empty), a);
        assert_eq!(empty.merged(&a), a);
        assert_eq!(empty.merged(&empty), empty);
    }

    #[test]
    fn test_describe() {
        let a = acc(&[1000, 3000]);
        assert_eq!(a.describe(false), "avg = 2.00 us");
        assert_eq!(a.describe(true), "min/avg/max = 1.00/2.00/3.00 us");
    }

    #[test]
    fn test_results_throughput() {
        let r = Results::new(800, 200, 2000, acc(&[1]), acc(&[2]));
        assert_eq!(r.total_requests(), 1000);
        assert_eq!(r.throughput(), 500.0);
        assert_eq!(r.elapsed(), Duration::from_secs(2));

        let idle = Results::new(0, 0, 0, StatAccumulator::new(), StatAccumulator::new());
        assert_eq!(idle.throughput(), 0.0);
    }
}
