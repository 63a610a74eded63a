//! ONNX runtime backed by tract (CPU only)

use crate::backend::Backend;
use crate::engine::EngineConfig;
use crate::runtime::{ModelRuntime, ModelSession};
use crate::InferenceError;
use tracing::{debug, info};
use tract_onnx::prelude::*;

type Plan = TypedRunnableModel<TypedModel>;

/// tract-onnx model runtime
#[derive(Debug, Default)]
pub struct TractRuntime;

impl TractRuntime {
    /// Create a new runtime
    pub fn new() -> Self {
        Self
    }
}

impl ModelRuntime for TractRuntime {
    fn name(&self) -> &str {
        "tract-onnx"
    }

    fn supports(&self, backend: Backend) -> bool {
        backend == Backend::Cpu
    }

    fn load(
        &self,
        config: &EngineConfig,
        backend: Backend,
    ) -> Result<Box<dyn ModelSession>, InferenceError> {
        if !self.supports(backend) {
            return Err(InferenceError::AcceleratorUnavailable(backend));
        }

        let path = config.model_path.display().to_string();
        let load_err = |e: TractError| InferenceError::ModelLoadError(format!("{}: {}", path, e));

        info!("Loading ONNX model: {}", path);
        let mut model = tract_onnx::onnx()
            .model_for_path(&config.model_path)
            .map_err(load_err)?;

        if let Some(shape) = &config.input_shape {
            debug!("Pinning input shape to {:?}", shape);
            model = model
                .with_input_fact(0, f32::fact(shape.clone()).into())
                .map_err(load_err)?;
        }

        let plan = model
            .into_optimized()
            .and_then(|m| m.into_runnable())
            .map_err(load_err)?;

        let input_shape = plan
            .model()
            .input_fact(0)
            .map_err(load_err)?
            .shape
            .as_concrete()
            .map(|dims| dims.to_vec())
            .ok_or_else(|| {
                InferenceError::ModelLoadError(format!(
                    "{}: input shape is symbolic, set input_shape",
                    path
                ))
            })?;

        let output_len = plan
            .model()
            .output_fact(0)
            .ok()
            .and_then(|fact| fact.shape.as_concrete().map(|dims| dims.iter().product()));

        Ok(Box::new(TractSession {
            plan: Some(plan),
            input_shape,
            output_len,
        }))
    }
}

/// A runnable tract plan
struct TractSession {
    plan: Option<Plan>,
    input_shape: Vec<usize>,
    output_len: Option<usize>,
}

impl ModelSession for TractSession {
    fn input_len(&self) -> usize {
        self.input_shape.iter().product()
    }

    fn output_len(&self) -> Option<usize> {
        self.output_len
    }

    fn execute(&mut self, input: &[f32]) -> Result<Vec<f32>, InferenceError> {
        let plan = self.plan.as_ref().ok_or(InferenceError::EngineClosed)?;
        let failed = |e: TractError| InferenceError::InferenceFailed(e.to_string());

        let tensor = Tensor::from_shape(&self.input_shape, input).map_err(failed)?;
        let outputs = plan.run(tvec!(tensor.into())).map_err(failed)?;
        let output = outputs
            .first()
            .ok_or_else(|| InferenceError::InferenceFailed("model produced no outputs".into()))?
            .to_array_view::<f32>()
            .map_err(failed)?;

        Ok(output.iter().copied().collect())
    }

    fn release(&mut self) -> Result<(), InferenceError> {
        self.plan.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_only_cpu_supported() {
        let runtime = TractRuntime::new();
        assert!(runtime.supports(Backend::Cpu));
        assert!(!runtime.supports(Backend::PrimaryAccelerator));
        assert!(!runtime.supports(Backend::SecondaryAccelerator));
    }

    #[test]
    fn test_missing_model_is_load_error() {
        let runtime = TractRuntime::new();
        let config = EngineConfig {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            ..Default::default()
        };

        let result = runtime.load(&config, Backend::Cpu);
        assert!(matches!(result, Err(InferenceError::ModelLoadError(_))));
    }

    #[test]
    fn test_accelerator_load_rejected() {
        let runtime = TractRuntime::new();
        let result = runtime.load(&EngineConfig::default(), Backend::PrimaryAccelerator);
        assert!(matches!(
            result,
            Err(InferenceError::AcceleratorUnavailable(Backend::PrimaryAccelerator))
        ));
    }
}
