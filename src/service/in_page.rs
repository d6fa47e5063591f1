//! In-process prediction over local files.

use super::PredictionPipeline;
use crate::error::{Error, Result};
use crate::results::PredictionResponse;
use bytes::Bytes;
use std::path::Path;
use tracing::{info, warn};

/// Where an upload is in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    /// Selected, not yet submitted.
    Ready,
    /// Prediction running.
    InFlight,
    /// Prediction finished.
    Success(PredictionResponse),
    /// Prediction failed; holds a short message for display.
    Error(String),
}

/// One selected file and its prediction state.
#[derive(Debug, Clone)]
pub struct UploadItem {
    name: String,
    bytes: Option<Bytes>,
    state: UploadState,
}

impl UploadItem {
    /// Wrap already-read bytes.
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: Some(bytes.into()),
            state: UploadState::Ready,
        }
    }

    /// An item whose bytes could not be obtained. It starts in the error
    /// state and is never submitted.
    pub fn unreadable(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: None,
            state: UploadState::Error(message.into()),
        }
    }

    /// Read a local file.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| Error::InputRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::new(path.display().to_string(), bytes))
    }

    /// Display name, usually the file path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub const fn state(&self) -> &UploadState {
        &self.state
    }

    /// True once a prediction finished either way.
    pub const fn is_settled(&self) -> bool {
        matches!(self.state, UploadState::Success(_) | UploadState::Error(_))
    }
}

/// The current selection. Replacing or clearing discards earlier items.
#[derive(Debug, Default)]
pub struct UploadQueue {
    items: Vec<UploadItem>,
}

impl UploadQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the selection.
    pub fn replace(&mut self, items: Vec<UploadItem>) {
        self.items = items;
    }

    /// Discard the selection.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Items in selection order.
    pub fn items(&self) -> &[UploadItem] {
        &self.items
    }

    /// Number of items that ended in an error.
    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.state, UploadState::Error(_)))
            .count()
    }
}

/// Prediction boundary for callers in the same process. No rate limiting.
#[derive(Clone)]
pub struct InPageService {
    pipeline: PredictionPipeline,
}

impl InPageService {
    /// Create the service.
    pub const fn new(pipeline: PredictionPipeline) -> Self {
        Self { pipeline }
    }

    /// Run one item. Settled items run again, so a failed item can be
    /// retried immediately.
    pub async fn submit(&self, item: &mut UploadItem) {
        let Some(bytes) = item.bytes.clone() else {
            return;
        };
        item.state = UploadState::InFlight;

        item.state = match self.pipeline.predict(bytes).await {
            Ok(response) => {
                info!("{}: predicted {}", item.name, top_label(&response));
                UploadState::Success(response)
            }
            Err(e) => {
                warn!("{}: {e}", item.name);
                UploadState::Error(e.to_string())
            }
        };
    }

    /// Run every item that has not succeeded yet, in order.
    pub async fn process(&self, queue: &mut UploadQueue) {
        for item in &mut queue.items {
            if !matches!(item.state, UploadState::Success(_)) {
                self.submit(item).await;
            }
        }
    }
}

fn top_label(response: &PredictionResponse) -> String {
    crate::results::top_class(&response.results)
        .map_or_else(|| "nothing".to_string(), |l| l.to_string())
}
