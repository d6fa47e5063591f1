//! Application-wide constants.
//!
//! All magic numbers and strings are defined here to ensure consistency
//! and make changes easy to track.

/// Application name used for config directories and user-facing messages.
pub const APP_NAME: &str = "firesight";

/// Model input geometry.
pub mod input {
    /// Square input resolution expected by the classifier.
    pub const SIZE: u32 = 224;

    /// Colour channels fed to the model (RGB).
    pub const CHANNELS: usize = 3;

    /// Full input tensor shape in NHWC order, batch of one.
    #[allow(clippy::cast_possible_truncation)]
    pub const SHAPE: [usize; 4] = [1, SIZE as usize, SIZE as usize, CHANNELS];

    /// Midpoint used to map `[0, 255]` onto `[-1, 1]`.
    pub const NORMALIZE_CENTER: f32 = 127.5;
}

/// Number of classes the model emits.
pub const NUM_CLASSES: usize = 4;

/// Upload constraints for the network boundary.
pub mod upload {
    /// Name of the multipart field carrying the image.
    pub const FIELD_NAME: &str = "image";

    /// Default upload ceiling (4 MiB).
    pub const DEFAULT_MAX_BYTES: usize = 4 * 1024 * 1024;

    /// Extra room granted to the whole request body on top of the file ceiling
    /// so multipart framing does not trip the body limit first.
    pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;
}

/// Rate-limit defaults.
pub mod rate_limit {
    /// Requests admitted per window.
    pub const DEFAULT_REQUESTS: u32 = 10;

    /// Window length in seconds.
    pub const DEFAULT_WINDOW_SECS: u64 = 30;

    /// Key prefix in the shared store.
    pub const DEFAULT_PREFIX: &str = "firesight";

    /// Environment variable holding the Upstash REST URL.
    pub const UPSTASH_URL_ENV: &str = "UPSTASH_REDIS_REST_URL";

    /// Environment variable holding the Upstash REST token.
    pub const UPSTASH_TOKEN_ENV: &str = "UPSTASH_REDIS_REST_TOKEN";

    /// Request timeout for the shared store.
    pub const STORE_TIMEOUT_SECS: u64 = 5;

    /// Key used when no client address can be determined.
    pub const ANONYMOUS_KEY: &str = "anonymous";
}

/// Response header names.
pub mod headers {
    /// Requests allowed per window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Requests left in the current window.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Window reset time in milliseconds since the Unix epoch.
    pub const RESET: &str = "x-ratelimit-reset";
}

/// Server defaults.
pub mod server {
    /// Default listen address.
    pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

    /// Default wall-clock budget for preprocessing plus inference.
    pub const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 30;
}

/// Model artifact and cache constants.
pub mod model {
    /// File name of the cached manifest.
    pub const MANIFEST_FILE: &str = "model.json";

    /// Only supported weight format.
    pub const FORMAT_ONNX: &str = "onnx";

    /// Suffix for in-progress downloads.
    pub const PARTIAL_SUFFIX: &str = "part";

    /// Lock file guarding cache population across processes.
    pub const LOCK_FILE: &str = ".firesight.lock";

    /// Default age after which a cache lock is considered abandoned.
    pub const DEFAULT_LOCK_STALE_SECS: u64 = 600;

    /// Poll interval while waiting for another process to finish populating.
    pub const LOCK_POLL_MILLIS: u64 = 250;

    /// Connect timeout for artifact downloads.
    pub const CONNECT_TIMEOUT_SECS: u64 = 30;

    /// Overall timeout for a single artifact download.
    pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
}

/// Probability bounds.
pub mod probability {
    /// Minimum valid probability.
    pub const MIN: f32 = 0.0;
    /// Maximum valid probability.
    pub const MAX: f32 = 1.0;
    /// Decimal places for human-readable formatting.
    pub const DECIMAL_PLACES: usize = 4;
}
