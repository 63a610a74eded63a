//! Execution backends and fallback ordering

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hardware target a model session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// GPU delegate
    PrimaryAccelerator,
    /// Dedicated neural accelerator (NPU/DSP)
    SecondaryAccelerator,
    /// Plain CPU execution
    Cpu,
}

impl Backend {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::PrimaryAccelerator => "accelerator_primary",
            Backend::SecondaryAccelerator => "accelerator_secondary",
            Backend::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested backend, resolved to an ordered list of candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Let the engine pick, best accelerator first
    #[default]
    Default,
    AcceleratorPrimary,
    AcceleratorSecondary,
    CpuOnly,
}

impl BackendPreference {
    /// Backends to try, in order. Always ends with the CPU.
    pub fn fallback_order(self) -> &'static [Backend] {
        match self {
            BackendPreference::Default | BackendPreference::AcceleratorPrimary => &[
                Backend::PrimaryAccelerator,
                Backend::SecondaryAccelerator,
                Backend::Cpu,
            ],
            BackendPreference::AcceleratorSecondary => {
                &[Backend::SecondaryAccelerator, Backend::Cpu]
            }
            BackendPreference::CpuOnly => &[Backend::Cpu],
        }
    }
}
