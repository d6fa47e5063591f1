//! Pure-Rust tract backend for in-process execution.
//!
//! Needs no native runtime library, so it runs wherever the crate compiles,
//! including embedded hosts and WebAssembly pages.

use super::{InferenceBackend, LoadedModel, ModelHandle, PreparedTensor};
use crate::constants::input;
use crate::error::{Error, PredictError, Result};
use crate::model::ModelArtifact;
use std::io::Cursor;
use std::sync::Arc;
use tract_onnx::prelude::*;
use tracing::{info, warn};

const BACKEND_NAME: &str = "tract";

/// Tract backend. Prefers the optimized plan and falls back to the plain
/// typed plan when optimization fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct InPageBackend;

impl InPageBackend {
    /// Create the backend.
    pub const fn new() -> Self {
        Self
    }
}

impl InferenceBackend for InPageBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn load(&self, artifact: &ModelArtifact) -> Result<ModelHandle> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut Cursor::new(artifact.bytes()))
            .and_then(|m| {
                let [n, h, w, c] = input::SHAPE;
                m.with_input_fact(
                    0,
                    InferenceFact::dt_shape(f32::datum_type(), tvec!(n, h, w, c)),
                )
            })
            .map_err(load_error)?;

        let plan = match model.clone().into_optimized().and_then(|m| m.into_runnable()) {
            Ok(plan) => {
                info!("Loaded model with optimized tract plan");
                plan
            }
            Err(e) => {
                warn!("Optimized tract plan unavailable ({e}), using default plan");
                model
                    .into_typed()
                    .and_then(|m| m.into_runnable())
                    .map_err(load_error)?
            }
        };

        Ok(Arc::new(TractModel { plan }))
    }
}

fn load_error(e: impl std::fmt::Display) -> Error {
    Error::ModelLoad {
        backend: BACKEND_NAME,
        reason: e.to_string(),
    }
}

struct TractModel {
    plan: TypedRunnableModel<TypedModel>,
}

impl LoadedModel for TractModel {
    fn forward(&self, input: &PreparedTensor) -> std::result::Result<Vec<f32>, PredictError> {
        let fault = |e: TractError| PredictError::Inference {
            reason: e.to_string(),
        };

        let tensor = Tensor::from_shape(&input.shape(), input.data()).map_err(fault)?;
        let outputs = self.plan.run(tvec!(tensor.into())).map_err(fault)?;

        let first = outputs.first().ok_or_else(|| PredictError::Inference {
            reason: "model produced no outputs".to_string(),
        })?;
        let view = first.to_array_view::<f32>().map_err(fault)?;

        Ok(view.iter().copied().collect())
    }
}
