//! Append-only telemetry persistence

use crate::{TelemetryError, TelemetrySample};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Column header for CSV telemetry logs
const CSV_HEADER: &str = "elapsed_ms,energy,cpu_utilization";

/// Destination for each telemetry sample
pub trait TelemetrySink: Send {
    /// Persist one sample
    fn write(&mut self, sample: &TelemetrySample) -> Result<(), TelemetryError>;

    /// Flush buffered rows
    fn flush(&mut self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Comma-separated telemetry log
pub struct CsvTelemetrySink {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl CsvTelemetrySink {
    /// Create (truncating) a CSV log and write its header
    pub fn create(path: &Path) -> Result<Self, TelemetryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", CSV_HEADER)?;
        writer.flush()?;

        info!("Writing telemetry log to {}", path.display());
        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    /// Get log file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for CsvTelemetrySink {
    fn write(&mut self, sample: &TelemetrySample) -> Result<(), TelemetryError> {
        writeln!(
            self.writer,
            "{},{},{:.4}",
            sample.elapsed_millis(),
            sample.energy_level,
            sample.cpu_utilization
        )?;
        // One row per second; flush so a crash keeps what was observed
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TelemetryError> {
        self.writer.flush()?;
        Ok(())
    }
}
