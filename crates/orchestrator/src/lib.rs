//! Benchmark Orchestration
//!
//! Drives warm-up, measured and accuracy passes on a worker thread while a
//! telemetry sampler observes the device, then folds both into one result.

mod config;
mod orchestrator;
mod stats;

pub use config::BenchmarkConfig;
pub use orchestrator::{BenchmarkOrchestrator, BenchmarkResult};
pub use stats::LatencyStats;

use dataset::DatasetError;
use inference_engine::InferenceError;
use telemetry::TelemetryError;
use thiserror::Error;

/// Benchmark run errors
#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("Dataset holds no complete samples")]
    EmptyDataset,

    #[error("Measured pass failed after {completed} samples: {source}")]
    MeasurementFailed {
        completed: usize,
        #[source]
        source: InferenceError,
    },

    #[error("Benchmark worker failed: {0}")]
    WorkerFailed(String),
}
