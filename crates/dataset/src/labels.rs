//! Class label tables

use crate::DatasetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// Name reported for indices outside the label table
pub const UNKNOWN_LABEL: &str = "Unknown";

const CIFAR10_LABELS: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

/// Ground-truth or predicted class
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// Index resolved through the label table
    Class { index: usize, name: String },
    /// Index outside the label table
    Unknown,
}

impl Label {
    /// Get the display name
    pub fn name(&self) -> &str {
        match self {
            Label::Class { name, .. } => name,
            Label::Unknown => UNKNOWN_LABEL,
        }
    }

    /// Get the class index, if known
    pub fn index(&self) -> Option<usize> {
        match self {
            Label::Class { index, .. } => Some(*index),
            Label::Unknown => None,
        }
    }

    /// Check if the label resolved to a table entry
    pub fn is_known(&self) -> bool {
        matches!(self, Label::Class { .. })
    }

    /// Whether a prediction of `self` is correct for `truth`.
    ///
    /// `Unknown` never matches anything, including another `Unknown`.
    pub fn matches(&self, truth: &Label) -> bool {
        match (self, truth) {
            (Label::Class { index: a, .. }, Label::Class { index: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered class names, indexed by label byte or output position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    /// Create a table from class names
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Built-in CIFAR-10 class names
    pub fn cifar10() -> Self {
        Self::new(CIFAR10_LABELS.iter().map(|s| s.to_string()).collect())
    }

    /// Read one label per line, skipping blank lines
    pub fn from_file(path: &Path) -> Result<Self, DatasetError> {
        let text = std::fs::read_to_string(path).map_err(|e| DatasetError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let names: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() {
            return Err(DatasetError::InvalidConfig(format!(
                "label file {} contains no labels",
                path.display()
            )));
        }

        debug!("Loaded {} labels from {}", names.len(), path.display());
        Ok(Self::new(names))
    }

    /// Read a label file, keeping `fallback` if it cannot be used
    pub fn from_file_or(path: &Path, fallback: LabelTable) -> Self {
        match Self::from_file(path) {
            Ok(table) => table,
            Err(e) => {
                warn!("Could not load labels, using {} built-in labels: {}", fallback.len(), e);
                fallback
            }
        }
    }

    /// Resolve an index, mapping out-of-range values to `Unknown`
    pub fn label(&self, index: usize) -> Label {
        match self.names.get(index) {
            Some(name) => Label::Class {
                index,
                name: name.clone(),
            },
            None => Label::Unknown,
        }
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if the table has no classes
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Class names in index order
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::cifar10()
    }
}
