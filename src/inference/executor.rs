//! Forward-pass execution with output validation.

use super::{LoadedModel, PreparedTensor, TensorLedger};
use crate::constants::NUM_CLASSES;
use crate::error::PredictError;
use tracing::debug;

/// Runs a model over a prepared tensor and returns one probability per class.
#[derive(Debug, Clone, Default)]
pub struct InferenceExecutor {
    ledger: TensorLedger,
}

impl InferenceExecutor {
    /// Create an executor that accounts its output buffers in `ledger`.
    pub fn new(ledger: TensorLedger) -> Self {
        Self { ledger }
    }

    /// Run one forward pass.
    ///
    /// Takes ownership of `tensor` so the input is released when this returns,
    /// whatever the outcome. The output buffer is released before returning too.
    pub fn run(
        &self,
        model: &dyn LoadedModel,
        tensor: PreparedTensor,
    ) -> Result<[f32; NUM_CLASSES], PredictError> {
        let output = {
            let _output_lease = self.ledger.lease();
            let raw = model.forward(&tensor)?;
            drop(tensor);
            extract_probabilities(&raw)?
        };

        debug!("Forward pass produced {:?}", output);
        Ok(output)
    }
}

/// Validate a raw model output and copy it into a fixed-size array.
fn extract_probabilities(raw: &[f32]) -> Result<[f32; NUM_CLASSES], PredictError> {
    let probabilities: [f32; NUM_CLASSES] =
        raw.try_into().map_err(|_| PredictError::Inference {
            reason: format!(
                "model returned {} values, expected {NUM_CLASSES}",
                raw.len()
            ),
        })?;

    if let Some(bad) = probabilities.iter().find(|p| !p.is_finite()) {
        return Err(PredictError::Inference {
            reason: format!("model returned a non-finite probability ({bad})"),
        });
    }

    Ok(probabilities)
}
