//! Layered application configuration

use anyhow::Context;
use config::{Config, Environment, File};
use dataset::DatasetConfig;
use inference_engine::EngineConfig;
use orchestrator::BenchmarkConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use telemetry::SamplerConfig;

/// Config file read when no path is given on the command line
pub const DEFAULT_CONFIG_PATH: &str = "edge-bench.toml";

/// Prefix of environment overrides, e.g. `EDGE_BENCH__DATASET__MAX_SAMPLES`
const ENV_PREFIX: &str = "EDGE_BENCH";

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Everything one benchmark invocation needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dataset: DatasetConfig,
    pub engine: EngineConfig,
    pub sampler: SamplerConfig,
    pub benchmark: BenchmarkConfig,
    pub logging: LoggingConfig,
    /// Also write the JSON report here
    pub report_path: Option<PathBuf>,
}

impl AppConfig {
    /// Defaults, then the optional file at `path`, then `EDGE_BENCH__*` variables
    pub fn load(path: &str) -> anyhow::Result<Self> {
        Self::load_with(path, environment())
    }

    fn load_with(path: &str, env: Environment) -> anyhow::Result<Self> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("Failed to load configuration from {}", path))
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
