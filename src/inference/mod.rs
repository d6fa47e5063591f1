//! Inference backends and the executor that drives them.

mod embedded;
mod executor;
mod in_page;
mod tensor;

pub use embedded::EmbeddedBackend;
pub use executor::InferenceExecutor;
pub use in_page::InPageBackend;
pub use tensor::{PreparedTensor, TensorLease, TensorLedger};

#[cfg(test)]
pub(crate) use executor::tests::FixedModel;

use crate::config::{InferenceDevice, ModelSettings, RuntimeKind};
use crate::error::{PredictError, Result};
use crate::model::ModelArtifact;
use std::sync::Arc;

/// Shared, read-only handle to a loaded model.
pub type ModelHandle = Arc<dyn LoadedModel>;

/// A tensor runtime able to turn model bytes into a runnable model.
pub trait InferenceBackend: Send + Sync {
    /// Short backend name for logs and errors.
    fn name(&self) -> &'static str;

    /// Build a runnable model from a complete artifact.
    fn load(&self, artifact: &ModelArtifact) -> Result<ModelHandle>;
}

/// A model ready to run forward passes.
pub trait LoadedModel: Send + Sync {
    /// Run one forward pass and return the flattened output.
    ///
    /// Implementations must not keep references to `input` or to any
    /// intermediate buffer after returning.
    fn forward(&self, input: &PreparedTensor) -> std::result::Result<Vec<f32>, PredictError>;
}

/// Build the backend for a runtime kind.
pub fn backend_for(runtime: RuntimeKind, settings: &ModelSettings) -> Arc<dyn InferenceBackend> {
    match runtime {
        RuntimeKind::Embedded => Arc::new(EmbeddedBackend::new(
            settings.device,
            settings.intra_threads,
        )),
        RuntimeKind::InPage => Arc::new(InPageBackend::new()),
    }
}

/// Human-readable device name used in startup logs.
pub const fn device_label(device: InferenceDevice) -> &'static str {
    match device {
        InferenceDevice::Auto => "auto",
        InferenceDevice::Cpu => "CPU",
        InferenceDevice::Gpu => "GPU",
    }
}
