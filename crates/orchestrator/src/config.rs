//! Benchmark run configuration

use serde::{Deserialize, Serialize};

/// Pass sizes for one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Untimed inferences before measurement (default: 3)
    pub warmup_runs: usize,
    /// Samples in the measured pass; `None` measures the whole dataset
    pub measured_runs: Option<usize>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            warmup_runs: 3,
            measured_runs: None,
        }
    }
}

impl BenchmarkConfig {
    /// Short run for smoke testing a model
    pub fn quick() -> Self {
        Self {
            warmup_runs: 1,
            measured_runs: Some(100),
        }
    }

    /// Measured sample count for a dataset of `available` samples
    pub fn measured_count(&self, available: usize) -> usize {
        self.measured_runs
            .map_or(available, |n| n.min(available))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measured_count() {
        let config = BenchmarkConfig::default();
        assert_eq!(config.measured_count(50), 50);

        let config = BenchmarkConfig {
            measured_runs: Some(10),
            ..Default::default()
        };
        assert_eq!(config.measured_count(50), 10);
        assert_eq!(config.measured_count(4), 4);
    }
}
