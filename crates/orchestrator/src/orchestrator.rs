//! Benchmark Orchestrator Implementation

use crate::config::BenchmarkConfig;
use crate::stats::LatencyStats;
use crate::BenchmarkError;
use dataset::{LabelTable, Sample, SampleSource};
use inference_engine::{
    AccuracyEvaluator, AccuracyResult, Backend, EngineConfig, InferenceEngine, ModelRuntime,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use telemetry::{EnergyUnit, SamplerState, TelemetrySample, TelemetrySampler};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Aggregated outcome of one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Exact sum of measured inference durations (nanoseconds)
    pub total_inference_time_ns: u64,
    /// Mean CPU utilization ratio over the run, in [0, 1]
    pub average_cpu_usage: f64,
    /// Accuracy percentage in [0, 100]
    pub accuracy: f64,
    pub accuracy_details: AccuracyResult,
    /// First minus last energy reading
    pub energy_usage: f64,
    pub energy_unit: EnergyUnit,
    pub latency: LatencyStats,
    /// Measured durations in execution order
    pub latencies_ns: Vec<u64>,
    /// Backend the model actually ran on
    pub backend: Backend,
    pub telemetry: Vec<TelemetrySample>,
    /// Wall-clock length of the run
    pub wall_time_ms: u64,
}

/// Output of the worker-side passes
struct Measurement {
    latencies_ns: Vec<u64>,
    accuracy: AccuracyResult,
}

/// Runs benchmarks, owning the sampler and each run's engine
pub struct BenchmarkOrchestrator {
    runtime: Arc<dyn ModelRuntime>,
    source: Box<dyn SampleSource>,
    sampler: TelemetrySampler,
    labels: LabelTable,
    live: Option<mpsc::Sender<TelemetrySample>>,
}

impl BenchmarkOrchestrator {
    /// Create an orchestrator
    pub fn new(
        runtime: Arc<dyn ModelRuntime>,
        source: Box<dyn SampleSource>,
        sampler: TelemetrySampler,
        labels: LabelTable,
    ) -> Self {
        Self {
            runtime,
            source,
            sampler,
            labels,
            live: None,
        }
    }

    /// Receive each telemetry sample of subsequent runs as it is taken.
    ///
    /// Samples are dropped rather than queued once `capacity` is reached.
    pub fn subscribe_telemetry(&mut self, capacity: usize) -> mpsc::Receiver<TelemetrySample> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.live = Some(tx);
        rx
    }

    /// Get the telemetry sampler
    pub fn sampler(&self) -> &TelemetrySampler {
        &self.sampler
    }

    /// Run one benchmark.
    ///
    /// `on_progress` receives the measured-pass completion percentage; values
    /// never decrease and the last one is exactly 100.0. The sampler is stopped
    /// and the engine closed on every path once the sampler has started.
    pub async fn run_benchmark<F>(
        &mut self,
        engine_config: &EngineConfig,
        config: &BenchmarkConfig,
        on_progress: F,
    ) -> Result<BenchmarkResult, BenchmarkError>
    where
        F: FnMut(f64) + Send + 'static,
    {
        let started = Instant::now();
        info!(
            "Starting benchmark: model={}, warmup={}, measured={:?}",
            engine_config.model_path.display(),
            config.warmup_runs,
            config.measured_runs
        );

        // A cancelled run can leave the previous session open
        if self.sampler.state() == SamplerState::Monitoring {
            warn!("Telemetry still running from an interrupted run, stopping it");
            self.sampler.stop().await?;
        }

        let engine = InferenceEngine::initialize(self.runtime.as_ref(), engine_config)?;

        let samples = match self.source.load_all() {
            Ok(samples) if samples.is_empty() => {
                close_engine(engine);
                return Err(BenchmarkError::EmptyDataset);
            }
            Ok(samples) => samples,
            Err(e) => {
                close_engine(engine);
                return Err(e.into());
            }
        };
        info!("Loaded {} samples", samples.len());

        if let Err(e) = self.sampler.start(self.live.clone()) {
            close_engine(engine);
            return Err(e.into());
        }

        let evaluator = AccuracyEvaluator::new(self.labels.clone());
        let warmup = config.warmup_runs;
        let measured = config.measured_count(samples.len());

        let worker = tokio::task::spawn_blocking(move || {
            let mut engine = engine;
            let outcome = drive(&mut engine, &samples, &evaluator, warmup, measured, on_progress);
            (engine, outcome)
        });
        let joined = worker.await;

        let perf = self.sampler.stop().await;

        let (backend, outcome) = match joined {
            Ok((engine, outcome)) => {
                let backend = engine.backend();
                close_engine(engine);
                (backend, outcome)
            }
            Err(e) => {
                // The engine was dropped, and so released, while unwinding
                error!("Benchmark worker failed: {}", e);
                return Err(BenchmarkError::WorkerFailed(e.to_string()));
            }
        };

        let measurement = outcome?;
        let perf = perf?;

        let latency = LatencyStats::from_durations(&measurement.latencies_ns);
        let result = BenchmarkResult {
            total_inference_time_ns: latency.total_ns,
            average_cpu_usage: perf.average_cpu_utilization(),
            accuracy: measurement.accuracy.accuracy,
            accuracy_details: measurement.accuracy,
            energy_usage: perf.energy_usage,
            energy_unit: perf.energy_unit,
            latency,
            latencies_ns: measurement.latencies_ns,
            backend,
            telemetry: perf.samples,
            wall_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        info!(
            "Benchmark complete: {} samples on {}, total {:.3} ms, mean {:.3} ms, accuracy {:.2}%, cpu {:.1}%, energy {:.2} {}",
            result.latency.count,
            result.backend,
            result.total_inference_time_ns as f64 / 1_000_000.0,
            result.latency.mean_ms(),
            result.accuracy,
            result.average_cpu_usage * 100.0,
            result.energy_usage,
            result.energy_unit
        );
        Ok(result)
    }
}

/// Close an engine, logging rather than propagating release failures
fn close_engine(mut engine: InferenceEngine) {
    if let Err(e) = engine.close() {
        warn!("{}", e);
    }
}

/// Warm-up, measured and accuracy passes. Runs on the blocking pool.
fn drive<F: FnMut(f64)>(
    engine: &mut InferenceEngine,
    samples: &[Sample],
    evaluator: &AccuracyEvaluator,
    warmup: usize,
    measured: usize,
    mut on_progress: F,
) -> Result<Measurement, BenchmarkError> {
    debug!("Warm-up: {} runs", warmup);
    for i in 0..warmup {
        engine.run_inference(&samples[i % samples.len()])?;
    }

    let mut latencies_ns = Vec::with_capacity(measured);
    for (i, sample) in samples[..measured].iter().enumerate() {
        let result = engine
            .run_inference(sample)
            .map_err(|source| BenchmarkError::MeasurementFailed {
                completed: i,
                source,
            })?;
        latencies_ns.push(result.duration_ns);
        on_progress(progress(i + 1, measured));
    }
    if measured == 0 {
        on_progress(100.0);
    }

    let accuracy = evaluator.evaluate(engine, samples)?;

    Ok(Measurement {
        latencies_ns,
        accuracy,
    })
}

/// Percentage of `total` completed; exactly 100.0 when done == total
fn progress(done: usize, total: usize) -> f64 {
    done as f64 * 100.0 / total as f64
}
