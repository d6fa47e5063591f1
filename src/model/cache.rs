//! Process-wide memoized model loading.

use super::source::ArtifactSource;
use crate::error::{Error, PredictError};
use crate::inference::{InferenceBackend, ModelHandle};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

type LoadFuture = Shared<BoxFuture<'static, Result<ModelHandle, Arc<Error>>>>;

enum Slot {
    Empty,
    Loading { generation: u64, load: LoadFuture },
    Ready(ModelHandle),
}

/// Loads the model at most once per process.
///
/// Concurrent callers during a load await the same in-flight attempt. A
/// failed attempt is forgotten so the next call retries from scratch.
pub struct ModelCache {
    source: Arc<dyn ArtifactSource>,
    backend: Arc<dyn InferenceBackend>,
    slot: Mutex<Slot>,
    generation: AtomicU64,
    loads: Arc<AtomicUsize>,
}

impl ModelCache {
    /// Create an empty cache. Nothing is loaded until the first acquire.
    pub fn new(source: Arc<dyn ArtifactSource>, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            source,
            backend,
            slot: Mutex::new(Slot::Empty),
            generation: AtomicU64::new(0),
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Return the loaded model, loading it if needed.
    pub async fn acquire(&self) -> Result<ModelHandle, PredictError> {
        let (generation, load) = {
            let mut slot = self.lock_slot()?;
            match &*slot {
                Slot::Ready(handle) => return Ok(Arc::clone(handle)),
                Slot::Loading { generation, load } => (*generation, load.clone()),
                Slot::Empty => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let load = self.start_load();
                    *slot = Slot::Loading {
                        generation,
                        load: load.clone(),
                    };
                    (generation, load)
                }
            }
        };

        let result = load.await;

        let mut slot = self.lock_slot()?;
        let current = matches!(&*slot, Slot::Loading { generation: g, .. } if *g == generation);
        match result {
            Ok(handle) => {
                if current {
                    *slot = Slot::Ready(Arc::clone(&handle));
                }
                Ok(handle)
            }
            Err(e) => {
                if current {
                    *slot = Slot::Empty;
                }
                Err(PredictError::ModelUnavailable {
                    reason: e.to_string(),
                })
            }
        }
    }

    fn start_load(&self) -> LoadFuture {
        let source = Arc::clone(&self.source);
        let backend = Arc::clone(&self.backend);
        let loads = Arc::clone(&self.loads);

        async move {
            loads.fetch_add(1, Ordering::SeqCst);
            info!(
                "Loading model from {} with {} backend",
                source.describe(),
                backend.name()
            );

            let artifact = source.fetch().await.map_err(|e| {
                error!("Model fetch failed: {e}");
                Arc::new(e)
            })?;

            let handle = tokio::task::spawn_blocking(move || backend.load(&artifact))
                .await
                .map_err(|e| {
                    Arc::new(Error::Internal {
                        message: format!("model load task failed: {e}"),
                    })
                })?
                .map_err(|e| {
                    error!("Model load failed: {e}");
                    Arc::new(e)
                })?;

            info!("Model ready");
            Ok(handle)
        }
        .boxed()
        .shared()
    }

    fn lock_slot(&self) -> Result<std::sync::MutexGuard<'_, Slot>, PredictError> {
        self.slot.lock().map_err(|_| PredictError::ModelUnavailable {
            reason: "model cache poisoned by an earlier panic".to_string(),
        })
    }

    /// True once a load has succeeded.
    pub fn is_loaded(&self) -> bool {
        self.slot
            .lock()
            .is_ok_and(|slot| matches!(*slot, Slot::Ready(_)))
    }

    /// True when the model is loaded or its source could supply it.
    pub async fn is_available(&self) -> bool {
        self.is_loaded() || self.source.is_available().await
    }

    /// Number of load attempts started, for diagnostics.
    pub fn load_attempts(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}
