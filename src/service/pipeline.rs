//! Preprocess, acquire, infer, format.

use crate::error::PredictError;
use crate::inference::{InferenceExecutor, TensorLedger};
use crate::model::ModelCache;
use crate::preprocess::ImagePreprocessor;
use crate::results::{PredictionResponse, format_predictions};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// The orchestration shared by the network and in-page boundaries.
///
/// CPU-bound stages run on the blocking pool. When a timeout is set it
/// bounds preprocessing plus the forward pass; time spent waiting for the
/// model to load does not count.
#[derive(Clone)]
pub struct PredictionPipeline {
    cache: Arc<ModelCache>,
    preprocessor: ImagePreprocessor,
    executor: InferenceExecutor,
    ledger: TensorLedger,
    timeout: Option<Duration>,
}

impl PredictionPipeline {
    /// Create a pipeline without a time budget.
    pub fn new(cache: Arc<ModelCache>) -> Self {
        let ledger = TensorLedger::new();
        Self {
            cache,
            preprocessor: ImagePreprocessor::new(ledger.clone()),
            executor: InferenceExecutor::new(ledger.clone()),
            ledger,
            timeout: None,
        }
    }

    /// Bound preprocessing plus inference by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The shared model cache.
    pub const fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Live tensor accounting for this pipeline.
    pub const fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }

    /// Classify one encoded image.
    pub async fn predict(&self, image: Bytes) -> Result<PredictionResponse, PredictError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);

        let preprocessor = self.preprocessor.clone();
        let tensor = self
            .within(
                deadline,
                tokio::task::spawn_blocking(move || preprocessor.prepare(&image)),
            )
            .await?;
        debug!("Preprocessed image into {:?} tensor", tensor.shape());

        let waiting = Instant::now();
        let model = self.cache.acquire().await?;
        let deadline = deadline.map(|d| d + waiting.elapsed());

        let executor = self.executor.clone();
        let probabilities = self
            .within(
                deadline,
                tokio::task::spawn_blocking(move || executor.run(model.as_ref(), tensor)),
            )
            .await?;

        Ok(PredictionResponse::from(format_predictions(probabilities)))
    }

    async fn within<T>(
        &self,
        deadline: Option<Instant>,
        task: JoinHandle<Result<T, PredictError>>,
    ) -> Result<T, PredictError> {
        let joined = match (deadline, self.timeout) {
            (Some(deadline), Some(after)) => tokio::time::timeout_at(deadline, task)
                .await
                .map_err(|_| PredictError::Timeout { after })?,
            _ => task.await,
        };

        joined.map_err(|e| PredictError::Inference {
            reason: format!("worker task failed: {e}"),
        })?
    }
}
