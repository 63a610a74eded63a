//! Device capability probes
//!
//! Platform-specific reads (cpufreq files, battery supply) sit behind
//! [`DeviceProbe`] so the sampler loop can be driven by a synthetic source.

use crate::sampler::SamplerConfig;
use crate::TelemetryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::{debug, info};

/// Reads device state for the sampler
pub trait DeviceProbe: Send {
    /// Current CPU utilization ratio, nominally in [0, 1]
    fn cpu_utilization(&mut self) -> Result<f64, TelemetryError>;

    /// Current energy/battery level
    fn energy_level(&mut self) -> Result<f64, TelemetryError>;

    /// Unit of [`DeviceProbe::energy_level`]
    fn energy_unit(&self) -> EnergyUnit;
}

/// Unit of the energy/battery reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyUnit {
    /// Battery voltage in millivolts
    Millivolts,
    /// Battery charge in percent
    Percent,
    /// No energy source; levels are reported as 0
    Unavailable,
}

impl fmt::Display for EnergyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnergyUnit::Millivolts => "mV",
            EnergyUnit::Percent => "%",
            EnergyUnit::Unavailable => "n/a",
        })
    }
}

/// Battery reading location
#[derive(Debug, Clone)]
struct EnergySource {
    path: PathBuf,
    unit: EnergyUnit,
}

impl EnergySource {
    /// Find the first battery supply, preferring voltage over capacity
    fn discover(power_supply_root: &Path) -> Option<Self> {
        let mut supplies: Vec<PathBuf> = fs::read_dir(power_supply_root)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        supplies.sort();

        for supply in supplies {
            let is_battery = fs::read_to_string(supply.join("type"))
                .map(|t| t.trim() == "Battery")
                .unwrap_or(false);
            if !is_battery {
                continue;
            }

            let voltage = supply.join("voltage_now");
            if voltage.exists() {
                return Some(Self {
                    path: voltage,
                    unit: EnergyUnit::Millivolts,
                });
            }
            let capacity = supply.join("capacity");
            if capacity.exists() {
                return Some(Self {
                    path: capacity,
                    unit: EnergyUnit::Percent,
                });
            }
        }
        None
    }

    fn read(&self) -> Result<f64, TelemetryError> {
        let raw = read_u64(&self.path)? as f64;
        Ok(match self.unit {
            // voltage_now is reported in microvolts
            EnergyUnit::Millivolts => raw / 1000.0,
            _ => raw,
        })
    }
}

fn read_u64(path: &Path) -> Result<u64, TelemetryError> {
    let text = fs::read_to_string(path)
        .map_err(|e| TelemetryError::ProbeError(format!("{}: {}", path.display(), e)))?;
    text.trim()
        .parse()
        .map_err(|e| TelemetryError::ProbeError(format!("{}: {}", path.display(), e)))
}

fn read_energy(source: &Option<EnergySource>) -> Result<f64, TelemetryError> {
    match source {
        Some(source) => source.read(),
        None => Ok(0.0),
    }
}

fn energy_unit_of(source: &Option<EnergySource>) -> EnergyUnit {
    source.as_ref().map_or(EnergyUnit::Unavailable, |s| s.unit)
}

/// CPU utilization from per-core cpufreq files, battery from the power supply class
pub struct SysfsProbe {
    /// `scaling_cur_freq` file for each core
    cur_freq_files: Vec<PathBuf>,
    /// Highest `cpuinfo_max_freq` across cores
    max_freq: u64,
    energy: Option<EnergySource>,
}

impl SysfsProbe {
    /// Discover cpufreq files, returning `None` when the host has none
    pub fn discover(cpu_root: &Path, power_supply_root: &Path) -> Option<Self> {
        let mut cur_freq_files = Vec::new();
        let mut max_freq = 0u64;

        for entry in fs::read_dir(cpu_root).ok()?.flatten() {
            let name = entry.file_name();
            let is_core = name
                .to_str()
                .and_then(|n| n.strip_prefix("cpu"))
                .map_or(false, |id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()));
            if !is_core {
                continue;
            }

            let cpufreq = entry.path().join("cpufreq");
            let cur = cpufreq.join("scaling_cur_freq");
            if !cur.exists() {
                continue;
            }
            if let Ok(max) = read_u64(&cpufreq.join("cpuinfo_max_freq")) {
                max_freq = max_freq.max(max);
            }
            cur_freq_files.push(cur);
        }

        if cur_freq_files.is_empty() || max_freq == 0 {
            debug!("No cpufreq data under {}", cpu_root.display());
            return None;
        }
        cur_freq_files.sort();

        let energy = EnergySource::discover(power_supply_root);
        info!(
            "Using cpufreq probe: {} cores, max {} kHz, energy unit {}",
            cur_freq_files.len(),
            max_freq,
            energy_unit_of(&energy)
        );

        Some(Self {
            cur_freq_files,
            max_freq,
            energy,
        })
    }
}

impl DeviceProbe for SysfsProbe {
    fn cpu_utilization(&mut self) -> Result<f64, TelemetryError> {
        let mut total = 0.0;
        for file in &self.cur_freq_files {
            total += read_u64(file)? as f64 / self.max_freq as f64;
        }
        Ok(total / self.cur_freq_files.len() as f64)
    }

    fn energy_level(&mut self) -> Result<f64, TelemetryError> {
        read_energy(&self.energy)
    }

    fn energy_unit(&self) -> EnergyUnit {
        energy_unit_of(&self.energy)
    }
}

/// Portable CPU utilization via `sysinfo`
pub struct SysinfoProbe {
    system: System,
    energy: Option<EnergySource>,
}

impl SysinfoProbe {
    /// Create a probe, priming the CPU usage baseline
    pub fn new(power_supply_root: &Path) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self {
            system,
            energy: EnergySource::discover(power_supply_root),
        }
    }
}

impl DeviceProbe for SysinfoProbe {
    fn cpu_utilization(&mut self) -> Result<f64, TelemetryError> {
        self.system.refresh_cpu();
        Ok(self.system.global_cpu_info().cpu_usage() as f64 / 100.0)
    }

    fn energy_level(&mut self) -> Result<f64, TelemetryError> {
        read_energy(&self.energy)
    }

    fn energy_unit(&self) -> EnergyUnit {
        energy_unit_of(&self.energy)
    }
}

/// Scripted readings, repeating the last value once exhausted
#[derive(Debug, Clone)]
pub struct SyntheticProbe {
    cpu: Vec<f64>,
    energy: Vec<f64>,
    cpu_pos: usize,
    energy_pos: usize,
}

impl SyntheticProbe {
    /// Create a probe replaying the given sequences
    pub fn new(cpu: Vec<f64>, energy: Vec<f64>) -> Self {
        Self {
            cpu,
            energy,
            cpu_pos: 0,
            energy_pos: 0,
        }
    }

    /// Create a probe returning fixed readings
    pub fn constant(cpu: f64, energy: f64) -> Self {
        Self::new(vec![cpu], vec![energy])
    }

    fn next(values: &[f64], pos: &mut usize) -> Result<f64, TelemetryError> {
        let value = values
            .get(*pos)
            .or_else(|| values.last())
            .copied()
            .ok_or_else(|| TelemetryError::ProbeError("no synthetic readings".into()))?;
        *pos += 1;
        Ok(value)
    }
}

impl DeviceProbe for SyntheticProbe {
    fn cpu_utilization(&mut self) -> Result<f64, TelemetryError> {
        Self::next(&self.cpu, &mut self.cpu_pos)
    }

    fn energy_level(&mut self) -> Result<f64, TelemetryError> {
        Self::next(&self.energy, &mut self.energy_pos)
    }

    fn energy_unit(&self) -> EnergyUnit {
        EnergyUnit::Millivolts
    }
}

/// Best probe for this host: cpufreq when present, `sysinfo` otherwise
pub fn default_probe(config: &SamplerConfig) -> Box<dyn DeviceProbe> {
    match SysfsProbe::discover(&config.cpu_root, &config.power_supply_root) {
        Some(probe) => Box::new(probe),
        None => {
            info!("cpufreq unavailable, using sysinfo CPU usage");
            Box::new(SysinfoProbe::new(&config.power_supply_root))
        }
    }
}
