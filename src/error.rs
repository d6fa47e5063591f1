//! Error types for firesight.

use crate::ratelimit::RateLimitDecision;
use std::time::Duration;

/// Result type alias for firesight operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for firesight.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration directory could not be determined.
    #[error("could not determine configuration directory for this platform")]
    ConfigDirNotFound,

    /// Data directory could not be determined.
    #[error("could not determine data directory for this platform")]
    DataDirNotFound,

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}'")]
    ConfigRead {
        /// Path to the config file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("failed to parse config file '{path}'")]
    ConfigParse {
        /// Path to the config file.
        path: std::path::PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    /// Failed to write configuration file.
    #[error("failed to write config file '{path}'")]
    ConfigWrite {
        /// Path to the config file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize configuration.
    #[error("failed to serialize config")]
    ConfigSerialize {
        /// Underlying serialization error.
        #[source]
        source: toml::ser::Error,
    },

    /// No manifest URL configured and no complete local cache.
    #[error("no model manifest URL configured and the local cache at '{cache_dir}' is incomplete")]
    ManifestUrlMissing {
        /// Cache directory that was checked.
        cache_dir: std::path::PathBuf,
    },

    /// Failed to parse the model manifest.
    #[error("failed to parse model manifest '{origin}'")]
    ManifestParse {
        /// Where the manifest came from (URL or path).
        origin: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Manifest parsed but describes an unusable model.
    #[error("invalid model manifest: {reason}")]
    ManifestInvalid {
        /// Description of the problem.
        reason: String,
    },

    /// A shard URL could not be derived from the manifest URL.
    #[error("cannot resolve shard '{path}' against manifest URL '{base}'")]
    ShardUrl {
        /// Manifest URL.
        base: String,
        /// Relative shard path.
        path: String,
    },

    /// Download failed.
    #[error("failed to download from '{url}'")]
    DownloadFailed {
        /// URL that failed.
        url: String,
        /// Underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Downloaded shard does not match its checksum.
    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Path of the shard on disk.
        path: std::path::PathBuf,
        /// Checksum listed in the manifest.
        expected: String,
        /// Checksum computed from the file.
        actual: String,
    },

    /// Cache directory is locked by another process.
    #[error("model cache is locked by another process: {path}")]
    CacheLocked {
        /// Path to the lock file.
        path: std::path::PathBuf,
    },

    /// Failed to create lock file.
    #[error("failed to create lock file '{path}'")]
    LockCreate {
        /// Path to the lock file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to remove lock file.
    #[error("failed to remove lock file '{path}'")]
    LockRemove {
        /// Path to the lock file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to build an inference session from the model bytes.
    #[error("failed to load model with {backend} backend: {reason}")]
    ModelLoad {
        /// Backend that failed.
        backend: &'static str,
        /// Description of the load failure.
        reason: String,
    },

    /// Rate-limit store round trip failed.
    #[error("rate limit store at '{endpoint}' failed: {reason}")]
    RateLimitStore {
        /// Store endpoint.
        endpoint: String,
        /// Description of the failure.
        reason: String,
    },

    /// The local model cache is missing files.
    #[error("model cache at '{cache_dir}' is incomplete ({missing} file(s) missing or invalid)")]
    CacheIncomplete {
        /// Cache directory that was checked.
        cache_dir: std::path::PathBuf,
        /// Number of missing or invalid files, manifest included.
        missing: usize,
    },

    /// Some files passed to `predict` could not be classified.
    #[error("{failed} of {total} file(s) could not be classified")]
    PredictionsFailed {
        /// Files that ended in an error.
        failed: usize,
        /// Files submitted.
        total: usize,
    },

    /// Failed to read an input image.
    #[error("failed to read image '{path}'")]
    InputRead {
        /// Path to the image.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Interrupted by Ctrl+C.
    #[error("interrupted")]
    Interrupted,

    /// Failed to bind the HTTP listener.
    #[error("failed to bind '{addr}'")]
    Bind {
        /// Address that could not be bound.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Internal error (for unexpected failures).
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

/// Failure of a single prediction, as seen by a caller of either boundary.
///
/// The set is closed: the HTTP layer maps every variant to a status code and
/// an `{"error": ...}` body, and the in-process path shows the message.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PredictError {
    /// Malformed, missing, or oversized upload.
    #[error("{message}")]
    Validation {
        /// HTTP status to report (400 or 413).
        status: u16,
        /// Human-readable description.
        message: String,
    },

    /// Upload bytes are not a decodable image.
    #[error("could not decode image: {reason}")]
    ImageDecode {
        /// Decoder message.
        reason: String,
    },

    /// Admission denied by the rate limiter.
    #[error("rate limit exceeded, retry in {}s", retry_in_secs(.0))]
    RateLimitExceeded(RateLimitDecision),

    /// The model could not be acquired.
    #[error("model unavailable: {reason}")]
    ModelUnavailable {
        /// Description of the acquisition failure.
        reason: String,
    },

    /// The forward pass failed or produced unusable output.
    #[error("inference failed: {reason}")]
    Inference {
        /// Description of the inference failure.
        reason: String,
    },

    /// Preprocessing plus inference exceeded the time budget.
    #[error("inference timed out after {}s", .after.as_secs())]
    Timeout {
        /// Budget that was exceeded.
        after: Duration,
    },
}

impl PredictError {
    /// Missing or malformed upload (400).
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Validation {
            status: 400,
            message: message.into(),
        }
    }

    /// Upload above the size ceiling (413).
    pub fn too_large(limit: usize) -> Self {
        Self::Validation {
            status: 413,
            message: format!("image exceeds the {limit} byte upload limit"),
        }
    }

    /// HTTP status code for this failure.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation { status, .. } => *status,
            Self::ImageDecode { .. } => 400,
            Self::RateLimitExceeded(_) => 429,
            Self::ModelUnavailable { .. } => 503,
            Self::Inference { .. } => 500,
            Self::Timeout { .. } => 504,
        }
    }

    /// Short machine-friendly tag used in logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::ImageDecode { .. } => "image_decode",
            Self::RateLimitExceeded(_) => "rate_limited",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::Inference { .. } => "inference",
            Self::Timeout { .. } => "timeout",
        }
    }
}

fn retry_in_secs(decision: &RateLimitDecision) -> u64 {
    decision.retry_after_secs(chrono::Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(PredictError::bad_request("missing").status_code(), 400);
        assert_eq!(PredictError::too_large(10).status_code(), 413);
        assert_eq!(
            PredictError::ImageDecode {
                reason: "bad".into()
            }
            .status_code(),
            400
        );
        assert_eq!(
            PredictError::ModelUnavailable {
                reason: "offline".into()
            }
            .status_code(),
            503
        );
        assert_eq!(
            PredictError::Inference {
                reason: "nan".into()
            }
            .status_code(),
            500
        );
        assert_eq!(
            PredictError::Timeout {
                after: Duration::from_secs(5)
            }
            .status_code(),
            504
        );
    }

    #[test]
    fn test_rate_limit_message_counts_seconds() {
        let reset_at = chrono::Utc::now().timestamp_millis() + 7_500;
        let err = PredictError::RateLimitExceeded(RateLimitDecision {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset_at,
        });
        let message = err.to_string();
        assert!(
            message == "rate limit exceeded, retry in 8s" || message == "rate limit exceeded, retry in 7s",
            "{message}"
        );
        assert!(!message.contains(&reset_at.to_string()));
    }

    #[test]
    fn test_too_large_message_mentions_limit() {
        let err = PredictError::too_large(4_194_304);
        assert!(err.to_string().contains("4194304"));
    }
}
