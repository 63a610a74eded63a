//! Latency statistics

use serde::{Deserialize, Serialize};

/// Summary of per-sample inference latencies, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: usize,
    /// Exact sum of all durations
    pub total_ns: u64,
    pub mean_ns: f64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
}

impl LatencyStats {
    /// Compute statistics; all zero for an empty slice
    pub fn from_durations(durations_ns: &[u64]) -> Self {
        if durations_ns.is_empty() {
            return Self::default();
        }

        let mut sorted = durations_ns.to_vec();
        sorted.sort_unstable();

        let total_ns: u64 = sorted.iter().sum();
        Self {
            count: sorted.len(),
            total_ns,
            mean_ns: total_ns as f64 / sorted.len() as f64,
            min_ns: sorted[0],
            max_ns: sorted[sorted.len() - 1],
            p50_ns: nearest_rank(&sorted, 50),
            p95_ns: nearest_rank(&sorted, 95),
            p99_ns: nearest_rank(&sorted, 99),
        }
    }

    /// Mean latency in milliseconds
    pub fn mean_ms(&self) -> f64 {
        self.mean_ns / 1_000_000.0
    }
}

/// Nearest-rank percentile of a sorted, non-empty slice
fn nearest_rank(sorted: &[u64], percentile: usize) -> u64 {
    let rank = (percentile * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty() {
        assert_eq!(LatencyStats::from_durations(&[]), LatencyStats::default());
    }

    #[test]
    fn test_one_to_hundred() {
        let durations: Vec<u64> = (1..=100).rev().collect();
        let stats = LatencyStats::from_durations(&durations);

        assert_eq!(stats.count, 100);
        assert_eq!(stats.total_ns, 5050);
        assert_eq!(stats.mean_ns, 50.5);
        assert_eq!(stats.min_ns, 1);
        assert_eq!(stats.max_ns, 100);
        assert_eq!(stats.p50_ns, 50);
        assert_eq!(stats.p95_ns, 95);
        assert_eq!(stats.p99_ns, 99);
    }

    #[test]
    fn test_single_sample() {
        let stats = LatencyStats::from_durations(&[7]);
        assert_eq!(stats.p50_ns, 7);
        assert_eq!(stats.p99_ns, 7);
        assert_eq!(stats.mean_ms(), 7e-6);
    }

    proptest! {
        #[test]
        fn prop_percentiles_ordered(durations in proptest::collection::vec(0u64..1_000_000_000, 1..256)) {
            let stats = LatencyStats::from_durations(&durations);
            prop_assert_eq!(stats.total_ns, durations.iter().sum::<u64>());
            prop_assert!(stats.min_ns <= stats.p50_ns);
            prop_assert!(stats.p50_ns <= stats.p95_ns);
            prop_assert!(stats.p95_ns <= stats.p99_ns);
            prop_assert!(stats.p99_ns <= stats.max_ns);
        }
    }
}
