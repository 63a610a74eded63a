//! Inference Engine
//!
//! Loads a model artifact onto the best available backend, runs timed
//! single-sample inference and evaluates classification accuracy.

mod backend;
mod engine;
mod evaluator;
mod preprocess;
mod runtime;
mod tract;

pub use backend::{Backend, BackendPreference};
pub use engine::{EngineConfig, Inference, InferenceEngine, InferenceResult};
pub use evaluator::{argmax, AccuracyEvaluator, AccuracyResult};
pub use preprocess::InputLayout;
pub use runtime::{ModelRuntime, ModelSession};
pub use tract::TractRuntime;

use thiserror::Error;

/// Errors during inference
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Model load failed: {0}")]
    ModelLoadError(String),
    #[error("Invalid tensor size: expected {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("Backend {0} is not available on this device")]
    AcceleratorUnavailable(Backend),
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    #[error("Inference engine is closed")]
    EngineClosed,
    #[error("Failed to release model resources: {0}")]
    ReleaseFailed(String),
}
