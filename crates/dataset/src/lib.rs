//! Labeled Dataset Loading
//!
//! Decodes evaluation datasets stored as consecutive fixed-size binary
//! records: one label byte followed by planar R, G, B image bytes.

mod labels;
mod source;

pub use labels::{Label, LabelTable, UNKNOWN_LABEL};
pub use source::{BinaryRecordSource, DatasetConfig, Sample, SampleSource};

use thiserror::Error;

/// Errors while loading a dataset
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Underlying storage could not be read
    #[error("Dataset unavailable at {path}: {reason}")]
    LoadError { path: String, reason: String },

    /// Record geometry or cap is unusable
    #[error("Invalid dataset configuration: {0}")]
    InvalidConfig(String),
}
