//! Edge Bench
//!
//! Wires the dataset, tract runtime, device probe and orchestrator together
//! for a single benchmark run from the command line.

mod settings;
mod report;

pub use settings::{AppConfig, LoggingConfig, DEFAULT_CONFIG_PATH};
pub use report::RunReport;

use anyhow::Context;
use chrono::Utc;
use dataset::BinaryRecordSource;
use inference_engine::TractRuntime;
use orchestrator::BenchmarkOrchestrator;
use std::str::FromStr;
use std::sync::Arc;
use telemetry::{default_probe, CsvTelemetrySink, TelemetrySampler};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = Level::from_str(&config.level)
        .with_context(|| format!("Invalid log level: {}", config.level))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.context("Failed to set tracing subscriber")
}

/// Tracks which 10% steps of progress have been reported
#[derive(Debug)]
struct ProgressMarks {
    next: f64,
}

impl ProgressMarks {
    fn new() -> Self {
        Self { next: 10.0 }
    }

    /// Whether `percent` reaches a step not yet reported
    fn crossed(&mut self, percent: f64) -> bool {
        if percent < self.next {
            return false;
        }
        while self.next <= percent {
            self.next += 10.0;
        }
        true
    }
}

/// Progress callback logging each 10% step
fn progress_logger() -> impl FnMut(f64) + Send + 'static {
    let mut marks = ProgressMarks::new();
    move |percent| {
        if marks.crossed(percent) {
            info!("Progress: {:.0}%", percent);
        }
    }
}

/// Run one benchmark as configured
pub async fn run(config: AppConfig) -> anyhow::Result<RunReport> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!("Benchmark run {}", run_id);

    let source =
        BinaryRecordSource::new(config.dataset.clone()).context("Invalid dataset configuration")?;
    let labels = source.labels().clone();

    let mut sampler = TelemetrySampler::new(default_probe(&config.sampler), config.sampler.clone());
    if let Some(path) = &config.sampler.telemetry_csv {
        let sink = CsvTelemetrySink::create(path)
            .with_context(|| format!("Failed to create telemetry log {}", path.display()))?;
        sampler = sampler.with_sink(Box::new(sink));
    }

    let mut orchestrator = BenchmarkOrchestrator::new(
        Arc::new(TractRuntime::new()),
        Box::new(source),
        sampler,
        labels,
    );

    let mut live = orchestrator.subscribe_telemetry(config.sampler.live_channel_capacity);
    let display = tokio::spawn(async move {
        while let Some(sample) = live.recv().await {
            debug!(
                "Telemetry t={}ms cpu={:.1}% energy={}{}",
                sample.elapsed_millis(),
                sample.cpu_utilization * 100.0,
                sample.energy_level,
                if sample.flagged { " (flagged)" } else { "" }
            );
        }
    });

    let outcome = orchestrator
        .run_benchmark(&config.engine, &config.benchmark, progress_logger())
        .await;

    // Dropping the orchestrator closes the live channel
    drop(orchestrator);
    let _ = display.await;

    let result = outcome.context("Benchmark failed")?;
    let report = RunReport {
        run_id,
        started_at,
        model: config.engine.model_path.clone(),
        dataset: config.dataset.path.clone(),
        result,
    };

    if let Some(path) = &config.report_path {
        report.write_to(path)?;
    }
    Ok(report)
}
