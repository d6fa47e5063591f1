//! Prediction orchestration shared by both boundaries.

mod in_page;
mod pipeline;

pub use in_page::{InPageService, UploadItem, UploadQueue, UploadState};
pub use pipeline::PredictionPipeline;
