//! Run report

use anyhow::Context;
use chrono::{DateTime, Utc};
use orchestrator::BenchmarkResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// One benchmark run, as handed to whatever presents or stores it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub model: PathBuf,
    pub dataset: PathBuf,
    pub result: BenchmarkResult,
}

impl RunReport {
    /// Pretty-printed JSON
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run report")
    }

    /// Write the report as JSON, creating parent directories
    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;

        info!("Report written to {}", path.display());
        Ok(())
    }
}
