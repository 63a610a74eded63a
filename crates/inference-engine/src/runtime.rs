//! Model runtime seam
//!
//! The numeric internals of a model live behind these traits so the engine
//! can drive any runtime (tract on the CPU, a vendor delegate, or a stub).

use crate::backend::Backend;
use crate::engine::EngineConfig;
use crate::InferenceError;

/// Loads model artifacts into executable sessions
pub trait ModelRuntime: Send + Sync {
    /// Runtime name for logging
    fn name(&self) -> &str;

    /// Whether this device and runtime can execute on `backend`
    fn supports(&self, backend: Backend) -> bool;

    /// Load the configured model onto `backend`.
    ///
    /// Returns `AcceleratorUnavailable` when the backend turns out to be
    /// unusable at load time; any other error is fatal.
    fn load(
        &self,
        config: &EngineConfig,
        backend: Backend,
    ) -> Result<Box<dyn ModelSession>, InferenceError>;
}

/// A loaded model bound to one backend
pub trait ModelSession: Send {
    /// Number of input elements for a single sample
    fn input_len(&self) -> usize;

    /// Number of output elements, when the runtime knows it up front
    fn output_len(&self) -> Option<usize>;

    /// Execute one forward pass
    fn execute(&mut self, input: &[f32]) -> Result<Vec<f32>, InferenceError>;

    /// Release native resources
    fn release(&mut self) -> Result<(), InferenceError>;
}
