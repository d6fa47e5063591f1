//! Native ONNX Runtime backend for the server process.

use super::{InferenceBackend, LoadedModel, ModelHandle, PreparedTensor};
use crate::config::InferenceDevice;
use crate::error::{Error, PredictError, Result};
use crate::model::ModelArtifact;
use ort::session::Session;
use ort::session::builder::SessionBuilder;
use ort::value::Tensor;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const BACKEND_NAME: &str = "onnxruntime";

/// ONNX Runtime backend with device selection.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedBackend {
    device: InferenceDevice,
    intra_threads: usize,
}

impl EmbeddedBackend {
    /// Create a backend for `device`. `intra_threads == 0` keeps the runtime default.
    pub const fn new(device: InferenceDevice, intra_threads: usize) -> Self {
        Self {
            device,
            intra_threads,
        }
    }
}

impl InferenceBackend for EmbeddedBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn load(&self, artifact: &ModelArtifact) -> Result<ModelHandle> {
        let builder = Session::builder().map_err(load_error)?;
        let (mut builder, device_msg) = configure_device(builder, self.device)?;

        if self.intra_threads > 0 {
            builder = builder
                .with_intra_threads(self.intra_threads)
                .map_err(load_error)?;
        }

        let session = builder
            .commit_from_memory(artifact.bytes())
            .map_err(load_error)?;

        info!(
            "Loaded model ({} bytes, {} shard(s)), device: {}",
            artifact.bytes().len(),
            artifact.manifest().shard_paths().len(),
            device_msg
        );

        Ok(Arc::new(OrtModel {
            session: Mutex::new(session),
        }))
    }
}

/// Select execution providers the way the CLI device flag asks for.
///
/// Auto falls back to CPU silently; an explicit GPU request warns.
#[cfg(feature = "cuda")]
fn configure_device(
    builder: SessionBuilder,
    device: InferenceDevice,
) -> Result<(SessionBuilder, &'static str)> {
    use ort::execution_providers::CUDAExecutionProvider;

    match device {
        InferenceDevice::Cpu => {
            info!("Requested device: CPU");
            Ok((builder, "CPU"))
        }
        InferenceDevice::Auto | InferenceDevice::Gpu => {
            match builder.with_execution_providers([CUDAExecutionProvider::default().build()]) {
                Ok(builder) => Ok((builder, "CUDA")),
                Err(e) if device == InferenceDevice::Auto => {
                    debug!("Auto mode: CUDA unavailable ({e}), using CPU");
                    Ok((Session::builder().map_err(load_error)?, "Auto (CPU)"))
                }
                Err(e) => {
                    warn!("GPU requested but CUDA could not be registered ({e}), using CPU");
                    Ok((Session::builder().map_err(load_error)?, "GPU (fallback to CPU)"))
                }
            }
        }
    }
}

#[cfg(not(feature = "cuda"))]
#[allow(clippy::unnecessary_wraps)]
fn configure_device(
    builder: SessionBuilder,
    device: InferenceDevice,
) -> Result<(SessionBuilder, &'static str)> {
    match device {
        InferenceDevice::Cpu => {
            info!("Requested device: CPU");
            Ok((builder, "CPU"))
        }
        InferenceDevice::Auto => {
            debug!("Auto mode: built without GPU support, using CPU");
            Ok((builder, "Auto (CPU)"))
        }
        InferenceDevice::Gpu => {
            warn!("GPU requested but this build has no GPU support, using CPU");
            Ok((builder, "GPU (fallback to CPU)"))
        }
    }
}

fn load_error(e: impl std::fmt::Display) -> Error {
    Error::ModelLoad {
        backend: BACKEND_NAME,
        reason: e.to_string(),
    }
}

/// Loaded ONNX Runtime session.
///
/// `Session::run` needs exclusive access, so calls are serialized here.
struct OrtModel {
    session: Mutex<Session>,
}

impl LoadedModel for OrtModel {
    fn forward(&self, input: &PreparedTensor) -> std::result::Result<Vec<f32>, PredictError> {
        let fault = |e: &dyn std::fmt::Display| PredictError::Inference {
            reason: e.to_string(),
        };

        let value = Tensor::from_array((input.shape(), input.data().to_vec()))
            .map_err(|e| fault(&e))?;

        let mut session = self.session.lock().map_err(|_| PredictError::Inference {
            reason: "inference session poisoned by an earlier panic".to_string(),
        })?;

        let outputs = session
            .run(ort::inputs![value])
            .map_err(|e| fault(&e))?;

        if outputs.len() == 0 {
            return Err(PredictError::Inference {
                reason: "model produced no outputs".to_string(),
            });
        }

        let (_, probabilities) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| fault(&e))?;

        // Copy out so every runtime-owned buffer drops with `outputs`.
        Ok(probabilities.to_vec())
    }
}
