//! Inference Engine Implementation

use crate::backend::{Backend, BackendPreference};
use crate::preprocess::{fill_input, InputLayout};
use crate::runtime::{ModelRuntime, ModelSession};
use crate::InferenceError;
use dataset::Sample;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Model artifact and backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the model artifact
    pub model_path: PathBuf,
    /// Requested backend
    pub backend: BackendPreference,
    /// Vendor accelerator hint (e.g. "qti-dsp", "mtk-npu", "google-edgetpu")
    pub accelerator_name: Option<String>,
    /// Layout of the model's image input
    pub input_layout: InputLayout,
    /// Full input shape, for models whose input is not fully specified
    pub input_shape: Option<Vec<usize>>,
    /// Divisor applied to raw pixel bytes
    pub normalize_scale: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model.onnx"),
            backend: BackendPreference::Default,
            accelerator_name: None,
            input_layout: InputLayout::Nchw,
            input_shape: None,
            normalize_scale: 255.0,
        }
    }
}

impl EngineConfig {
    /// Create a config for a model path with default settings
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            ..Default::default()
        }
    }

    /// Set the backend preference
    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }
}

/// Result of one inference call
#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// Time spent inside the execution call only (nanoseconds)
    pub duration_ns: u64,
    /// Raw model output
    pub output: Vec<f32>,
}

/// Anything that can run single-sample inference
pub trait Inference {
    /// Run one timed inference
    fn run_inference(&mut self, sample: &Sample) -> Result<InferenceResult, InferenceError>;
}

/// Inference engine owning one loaded model session
pub struct InferenceEngine {
    /// Loaded session, `None` once closed
    session: Option<Box<dyn ModelSession>>,
    /// Backend the session was loaded on
    backend: Backend,
    /// Model path
    model_path: PathBuf,
    /// Input layout
    layout: InputLayout,
    /// Pixel normalization divisor
    scale: f32,
    /// Reused input buffer
    input: Vec<f32>,
}

impl InferenceEngine {
    /// Load the model, walking the backend fallback order.
    ///
    /// An unavailable backend is logged and skipped; failing to load the
    /// model artifact itself is fatal.
    pub fn initialize(
        runtime: &dyn ModelRuntime,
        config: &EngineConfig,
    ) -> Result<Self, InferenceError> {
        info!(
            "Creating inference engine with model: {} (runtime={}, preference={:?})",
            config.model_path.display(),
            runtime.name(),
            config.backend
        );
        if let Some(name) = &config.accelerator_name {
            debug!("Accelerator hint: {}", name);
        }

        for &backend in config.backend.fallback_order() {
            if !runtime.supports(backend) {
                warn!("{}, falling back", InferenceError::AcceleratorUnavailable(backend));
                continue;
            }

            match runtime.load(config, backend) {
                Ok(session) => {
                    info!(
                        "Model loaded on {} (input={} elements)",
                        backend,
                        session.input_len()
                    );
                    return Ok(Self {
                        session: Some(session),
                        backend,
                        model_path: config.model_path.clone(),
                        layout: config.input_layout,
                        scale: config.normalize_scale,
                        input: Vec::new(),
                    });
                }
                Err(InferenceError::AcceleratorUnavailable(b)) => {
                    warn!("Backend {} failed to initialize, falling back", b);
                }
                Err(e) => return Err(e),
            }
        }

        Err(InferenceError::ModelLoadError(format!(
            "no usable backend for {}",
            config.model_path.display()
        )))
    }

    /// Run inference on one sample, timing only the execution call
    pub fn run_inference(&mut self, sample: &Sample) -> Result<InferenceResult, InferenceError> {
        let session = self.session.as_mut().ok_or(InferenceError::EngineClosed)?;

        let expected = session.input_len();
        if sample.pixels().len() != expected {
            return Err(InferenceError::ShapeMismatch {
                expected,
                actual: sample.pixels().len(),
            });
        }

        fill_input(sample.pixels(), self.layout, self.scale, &mut self.input);

        let start = Instant::now();
        let output = session.execute(&self.input)?;
        let elapsed = start.elapsed();

        if let Some(expected) = session.output_len() {
            if output.len() != expected {
                return Err(InferenceError::ShapeMismatch {
                    expected,
                    actual: output.len(),
                });
            }
        }

        Ok(InferenceResult {
            duration_ns: u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
            output,
        })
    }

    /// Release the model session. A second call is a no-op.
    pub fn close(&mut self) -> Result<(), InferenceError> {
        match self.session.take() {
            Some(mut session) => {
                info!("Closing inference engine ({})", self.backend);
                session.release()
            }
            None => Ok(()),
        }
    }

    /// Check if the engine has been closed
    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    /// Backend the model is running on
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Get model path
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

impl Inference for InferenceEngine {
    fn run_inference(&mut self, sample: &Sample) -> Result<InferenceResult, InferenceError> {
        InferenceEngine::run_inference(self, sample)
    }
}

impl Drop for InferenceEngine {
    fn drop(&mut self) {
        if self.session.is_some() {
            debug!("Inference engine dropped while open, releasing");
            if let Err(e) = self.close() {
                warn!("{}", e);
            }
        }
    }
}
