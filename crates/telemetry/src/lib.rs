//! Device Telemetry
//!
//! Samples CPU utilization and battery/energy level on a fixed cadence,
//! independently of whatever workload is being measured.

mod probe;
mod sampler;
mod sink;

pub use probe::{default_probe, DeviceProbe, EnergyUnit, SyntheticProbe, SysfsProbe, SysinfoProbe};
pub use sampler::{energy_delta, SamplerConfig, SamplerState, TelemetrySampler};
pub use sink::{CsvTelemetrySink, TelemetrySink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Telemetry errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Telemetry sampler is already monitoring")]
    AlreadyMonitoring,
    #[error("Telemetry sampler is not monitoring")]
    NotMonitoring,
    #[error("Telemetry write failed: {0}")]
    WriteError(String),
    #[error("Device probe failed: {0}")]
    ProbeError(String),
    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        TelemetryError::WriteError(err.to_string())
    }
}

/// One observation of device state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Session start wall-clock time plus `elapsed`, so it orders like `elapsed`
    pub timestamp: DateTime<Utc>,
    /// Monotonic time since the session started, strictly increasing
    pub elapsed: Duration,
    /// CPU utilization ratio in [0, 1]
    pub cpu_utilization: f64,
    /// Battery/energy level in the probe's unit; last good level when unreadable
    pub energy_level: f64,
    /// False when the energy read failed; such samples are left out of energy deltas
    pub energy_valid: bool,
    /// Set when either reading was out of range or unreadable
    pub flagged: bool,
}

impl TelemetrySample {
    /// Milliseconds since the session started
    pub fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Snapshot produced when a monitoring session stops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfMetrics {
    /// First level minus last level; negative while charging
    pub energy_usage: f64,
    /// Unit of `energy_usage`
    pub energy_unit: EnergyUnit,
    /// Length of the monitoring session
    pub duration: Duration,
    /// Samples in timestamp order
    pub samples: Vec<TelemetrySample>,
}

impl PerfMetrics {
    /// Mean CPU utilization, 0 when no samples were taken
    pub fn average_cpu_utilization(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_utilization).sum::<f64>() / self.samples.len() as f64
    }
}
